pub mod repositories;

pub use repositories::{
    InMemoryApiKeyRepository, InMemoryConversationRepository, InMemoryItemRepository,
    InMemoryOrganizationMemberRepository, InMemoryOrganizationRepository,
    InMemoryProjectMemberRepository, InMemoryProjectRepository, InMemoryProviderRepository,
    InMemoryResponseRepository, InMemoryUserRepository,
};

use std::sync::Arc;

/// Database service combining all repositories
#[derive(Clone)]
pub struct Database {
    pub users: Arc<InMemoryUserRepository>,
    pub api_keys: Arc<InMemoryApiKeyRepository>,
    pub organizations: Arc<InMemoryOrganizationRepository>,
    pub organization_members: Arc<InMemoryOrganizationMemberRepository>,
    pub projects: Arc<InMemoryProjectRepository>,
    pub project_members: Arc<InMemoryProjectMemberRepository>,
    pub providers: Arc<InMemoryProviderRepository>,
    pub conversations: Arc<InMemoryConversationRepository>,
    pub items: Arc<InMemoryItemRepository>,
    pub responses: Arc<InMemoryResponseRepository>,
}

impl Database {
    pub fn new() -> Self {
        let conversations = InMemoryConversationRepository::new();
        Self {
            users: Arc::new(InMemoryUserRepository::new()),
            api_keys: Arc::new(InMemoryApiKeyRepository::new()),
            organizations: Arc::new(InMemoryOrganizationRepository::new()),
            organization_members: Arc::new(InMemoryOrganizationMemberRepository::new()),
            projects: Arc::new(InMemoryProjectRepository::new()),
            project_members: Arc::new(InMemoryProjectMemberRepository::new()),
            providers: Arc::new(InMemoryProviderRepository::new()),
            items: Arc::new(conversations.items()),
            conversations: Arc::new(conversations),
            responses: Arc::new(InMemoryResponseRepository::new()),
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}
