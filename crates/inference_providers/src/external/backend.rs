//! Backend trait for upstream provider implementations

use crate::{ChatCompletionParams, ChatCompletionResponse, CompletionError, LineStream, ModelsResponse};
use async_trait::async_trait;
use std::fmt;

/// Hard cap for a single upstream call, streaming included.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 120;

/// Connection details for one provider.
#[derive(Clone)]
pub struct BackendConfig {
    /// Base URL for the provider API, e.g. `https://openrouter.ai/api/v1`
    pub base_url: String,
    /// Unsealed API key. Empty for providers that do not authenticate.
    pub api_key: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds.min(DEFAULT_TIMEOUT_SECONDS);
        self
    }
}

// Keeps the key out of debug output and logs
impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

#[async_trait]
pub trait ExternalBackend: Send + Sync {
    /// Returns the backend type identifier (e.g. "openai_compatible")
    fn backend_type(&self) -> &'static str;

    /// Sends a non-streaming chat completion to `{base_url}/chat/completions`.
    async fn chat_completion(
        &self,
        config: &BackendConfig,
        params: ChatCompletionParams,
    ) -> Result<ChatCompletionResponse, CompletionError>;

    /// Sends a streaming chat completion and yields the upstream SSE lines
    /// verbatim. Dropping the stream aborts the upstream connection.
    async fn chat_completion_stream(
        &self,
        config: &BackendConfig,
        params: ChatCompletionParams,
    ) -> Result<LineStream, CompletionError>;

    /// Lists the models served at `{base_url}/models`.
    async fn models(&self, config: &BackendConfig) -> Result<ModelsResponse, CompletionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_key() {
        let config = BackendConfig::new("https://example.com/v1/", "sk-secret");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert_eq!(config.base_url, "https://example.com/v1");
    }

    #[test]
    fn test_timeout_is_capped() {
        let config = BackendConfig::new("http://x", "").with_timeout(600);
        assert_eq!(config.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
        let config = BackendConfig::new("http://x", "").with_timeout(5);
        assert_eq!(config.timeout_seconds, 5);
    }
}
