// API Middleware
//
// Credential resolution, organization/project/conversation scoping and the
// request deadline.

pub mod auth;
pub mod scope;
pub mod timeout;

pub use auth::{admin_middleware, auth_middleware, AuthState, RequestContext};
pub use scope::{
    conversation_middleware, item_middleware, organization_middleware, owner_only_middleware,
    project_middleware,
};
pub use timeout::{timeout_middleware, RequestDeadline};
