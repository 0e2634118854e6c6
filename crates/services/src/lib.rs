pub mod auth;
pub mod common;
pub mod completions;
pub mod conversations;
pub mod crypto;
pub mod id_prefixes;
pub mod inference_provider_pool;
pub mod organization;
pub mod projects;
pub mod providers;
pub mod responses;

pub use auth::AuthService;
pub use completions::CompletionService;
pub use conversations::ConversationService;
pub use inference_provider_pool::InferenceProviderPool;
pub use providers::ProviderRegistry;
pub use responses::ResponseService;
