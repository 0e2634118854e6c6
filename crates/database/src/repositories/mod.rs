pub mod api_key;
pub mod conversation;
pub mod organization;
pub mod project;
pub mod provider;
pub mod response;
pub mod user;
pub(crate) mod utils;

pub use api_key::InMemoryApiKeyRepository;
pub use conversation::{InMemoryConversationRepository, InMemoryItemRepository};
pub use organization::{InMemoryOrganizationMemberRepository, InMemoryOrganizationRepository};
pub use project::{InMemoryProjectMemberRepository, InMemoryProjectRepository};
pub use provider::InMemoryProviderRepository;
pub use response::InMemoryResponseRepository;
pub use user::InMemoryUserRepository;
