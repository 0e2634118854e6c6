use cache::Cache;
use services::{
    auth::{ApiKeyService, AuthService},
    organization::OrganizationService,
    projects::ProjectService,
    CompletionService, ConversationService, ProviderRegistry, ResponseService,
};
use std::{sync::Arc, time::Duration};

/// HTTP behaviour that is not owned by any service.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Sets the `Secure` attribute on the refresh-token cookie
    pub refresh_cookie_secure: bool,
    pub request_timeout: Duration,
}

/// Application state shared across all route handlers
#[derive(Clone)]
pub struct AppState {
    pub auth_service: Arc<AuthService>,
    pub api_key_service: Arc<ApiKeyService>,
    pub organization_service: Arc<OrganizationService>,
    pub project_service: Arc<ProjectService>,
    pub provider_registry: Arc<ProviderRegistry>,
    pub conversation_service: Arc<ConversationService>,
    pub response_service: Arc<ResponseService>,
    pub completion_service: Arc<CompletionService>,
    pub cache: Arc<dyn Cache>,
    pub settings: HttpSettings,
}
