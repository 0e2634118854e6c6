//! Dispatches chat completions to whichever provider the registry resolves
//! for a selection.

use crate::providers::{ProviderError, ProviderModel, ProviderRegistry, ProviderSelection, ResolvedProvider};
use futures::StreamExt;
use inference_providers::{
    external::backend::DEFAULT_TIMEOUT_SECONDS, ChatCompletionParams, ChatCompletionResponse,
    CompletionError, ExternalBackend, LineStream,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Provider '{provider_id}' failed: {message}")]
    Upstream {
        provider_id: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Provider '{provider_id}' did not answer in time")]
    Timeout { provider_id: String },
}

impl InferenceError {
    /// Wraps an upstream failure, scrubbing the unsealed key from the message.
    pub fn upstream(resolved: &ResolvedProvider, error: CompletionError) -> Self {
        let provider_id = resolved.provider.public_id.clone();
        match error {
            CompletionError::Timeout => InferenceError::Timeout { provider_id },
            other => InferenceError::Upstream {
                provider_id,
                status: other.status_code(),
                message: redact(&other.to_string(), &resolved.api_key),
            },
        }
    }
}

fn redact(message: &str, secret: &str) -> String {
    if secret.is_empty() {
        message.to_string()
    } else {
        message.replace(secret, "[REDACTED]")
    }
}

#[derive(Clone)]
pub struct InferenceProviderPool {
    registry: Arc<ProviderRegistry>,
    backend: Arc<dyn ExternalBackend>,
    /// Upper bound for a single upstream call
    timeout: Duration,
}

impl InferenceProviderPool {
    pub fn new(registry: Arc<ProviderRegistry>, backend: Arc<dyn ExternalBackend>) -> Self {
        Self {
            registry,
            backend,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        }
    }

    /// Lowers the per-call deadline. Values above the hard cap are clamped.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.min(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS));
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    fn backend_config(&self, resolved: &ResolvedProvider) -> inference_providers::BackendConfig {
        resolved
            .backend_config()
            .with_timeout(self.timeout.as_secs().max(1))
    }

    pub async fn create_completion(
        &self,
        selection: &ProviderSelection,
        params: ChatCompletionParams,
    ) -> Result<ChatCompletionResponse, InferenceError> {
        let resolved = self.registry.resolve(selection).await?;
        debug!(
            provider_id = %resolved.provider.public_id,
            model = %params.model,
            "Dispatching chat completion"
        );

        let config = self.backend_config(&resolved);
        match tokio::time::timeout(self.timeout, self.backend.chat_completion(&config, params)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                let error = InferenceError::upstream(&resolved, e);
                warn!(error = %error, "Chat completion failed");
                Err(error)
            }
            Err(_) => Err(InferenceError::Timeout {
                provider_id: resolved.provider.public_id,
            }),
        }
    }

    /// Opens an upstream stream. Lines are passed through untouched; read
    /// errors surface as items with the key scrubbed.
    pub async fn create_completion_stream(
        &self,
        selection: &ProviderSelection,
        params: ChatCompletionParams,
    ) -> Result<LineStream, InferenceError> {
        let resolved = self.registry.resolve(selection).await?;
        debug!(
            provider_id = %resolved.provider.public_id,
            model = %params.model,
            "Dispatching streaming chat completion"
        );

        let config = self.backend_config(&resolved);
        let stream = match tokio::time::timeout(
            self.timeout,
            self.backend.chat_completion_stream(&config, params),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(InferenceError::upstream(&resolved, e)),
            Err(_) => {
                return Err(InferenceError::Timeout {
                    provider_id: resolved.provider.public_id,
                })
            }
        };

        let secret = resolved.api_key;
        Ok(Box::pin(stream.map(move |line| {
            line.map_err(|e| match e {
                CompletionError::StreamInterrupted(message) => {
                    CompletionError::StreamInterrupted(redact(&message, &secret))
                }
                CompletionError::RequestFailed(message) => {
                    CompletionError::RequestFailed(redact(&message, &secret))
                }
                other => other,
            })
        })))
    }

    pub async fn get_models(
        &self,
        selection: &ProviderSelection,
    ) -> Result<Vec<ProviderModel>, InferenceError> {
        Ok(self.registry.get_models(selection).await?)
    }
}
