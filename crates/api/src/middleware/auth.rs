use crate::routes::common::ApiError;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use services::{
    auth::{AuthService, CredentialScope, Principal, User},
    conversations::{Conversation, Item},
    organization::{Organization, OrganizationMember},
    projects::{Project, ProjectMember},
};
use std::sync::Arc;
use tracing::debug;

/// State for the credential middleware
#[derive(Clone)]
pub struct AuthState {
    pub auth_service: Arc<AuthService>,
}

/// Entities resolved for the current request.
///
/// The auth middleware creates it; scoping middleware fill the remaining
/// slots. Handlers read a slot through its accessor, which fails with an
/// internal error when the route was wired without the middleware that
/// populates it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub principal: Principal,
    pub user: User,
    pub organization: Option<Organization>,
    pub organization_member: Option<OrganizationMember>,
    pub project: Option<Project>,
    pub project_member: Option<ProjectMember>,
    pub conversation: Option<Conversation>,
    pub item: Option<Item>,
}

fn missing(slot: &str) -> ApiError {
    ApiError::new(
        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        format!("{slot} was not resolved for this route"),
    )
    .with_code("missing_request_context")
}

impl RequestContext {
    pub fn new(principal: Principal, user: User) -> Self {
        Self {
            principal,
            user,
            organization: None,
            organization_member: None,
            project: None,
            project_member: None,
            conversation: None,
            item: None,
        }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn organization(&self) -> Result<&Organization, ApiError> {
        self.organization.as_ref().ok_or_else(|| missing("organization"))
    }

    pub fn organization_member(&self) -> Result<&OrganizationMember, ApiError> {
        self.organization_member
            .as_ref()
            .ok_or_else(|| missing("organization membership"))
    }

    pub fn project(&self) -> Result<&Project, ApiError> {
        self.project.as_ref().ok_or_else(|| missing("project"))
    }

    pub fn conversation(&self) -> Result<&Conversation, ApiError> {
        self.conversation.as_ref().ok_or_else(|| missing("conversation"))
    }

    pub fn item(&self) -> Result<&Item, ApiError> {
        self.item.as_ref().ok_or_else(|| missing("item"))
    }
}

/// Mutable access for middleware that run after [`auth_middleware`].
pub(crate) fn context_mut(request: &mut Request) -> Result<&mut RequestContext, ApiError> {
    request
        .extensions_mut()
        .get_mut::<RequestContext>()
        .ok_or_else(|| missing("caller"))
}

/// End-user endpoints: user tokens plus `user` and `ephemeral` keys.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    authenticate(&state, request, next, CredentialScope::EndUser).await
}

/// Administrative endpoints: user tokens plus `admin` keys.
pub async fn admin_middleware(
    State(state): State<AuthState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    authenticate(&state, request, next, CredentialScope::Admin).await
}

async fn authenticate(
    state: &AuthState,
    mut request: Request,
    next: Next,
    scope: CredentialScope,
) -> Result<Response, ApiError> {
    let authorization = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let principal = state.auth_service.authenticate(authorization, scope).await?;
    let user = state
        .auth_service
        .registered_user(principal.user_public_id())
        .await?;
    debug!(user_id = %user.public_id, api_key = principal.api_key().is_some(), "Authenticated request");

    request
        .extensions_mut()
        .insert(RequestContext::new(principal, user));
    Ok(next.run(request).await)
}
