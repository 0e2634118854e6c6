//! Scripted backend for tests
//!
//! Returns canned responses, stream lines and model lists, and records every
//! request it receives so tests can assert on what was forwarded upstream.

use crate::{
    BackendConfig, ChatCompletionParams, ChatCompletionResponse, ChatCompletionResponseChoice,
    ChatResponseMessage, CompletionError, ExternalBackend, LineStream, MessageRole, ModelInfo,
    ModelsResponse, SseLine, TokenUsage,
};
use async_trait::async_trait;
use futures_util::stream;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A request captured by [`MockBackend`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub base_url: String,
    pub api_key: String,
    pub params: ChatCompletionParams,
}

#[derive(Default)]
struct Script {
    response: Option<ChatCompletionResponse>,
    stream_lines: Vec<String>,
    models: Vec<ModelInfo>,
    completion_error: Option<CompletionError>,
    models_error: Option<CompletionError>,
    requests: Vec<RecordedRequest>,
    model_calls: usize,
}

#[derive(Clone, Default)]
pub struct MockBackend {
    script: Arc<Mutex<Script>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a response with a single assistant choice.
    pub fn text_response(content: &str, reasoning: Option<&str>) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: "chatcmpl-mock".to_string(),
            object: "chat.completion".to_string(),
            created: 1_700_000_000,
            model: "mock-model".to_string(),
            choices: vec![ChatCompletionResponseChoice {
                index: 0,
                message: ChatResponseMessage {
                    role: MessageRole::Assistant,
                    content: Some(content.to_string()),
                    refusal: None,
                    function_call: None,
                    tool_calls: None,
                    reasoning_content: reasoning.map(str::to_string),
                },
                logprobs: None,
                finish_reason: Some("stop".to_string()),
            }],
            system_fingerprint: None,
            usage: Some(TokenUsage::new(2, 1)),
        }
    }

    pub async fn set_response(&self, response: ChatCompletionResponse) {
        self.script.lock().await.response = Some(response);
    }

    /// Lines are yielded verbatim, without a trailing newline.
    pub async fn set_stream_lines<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script.lock().await.stream_lines = lines.into_iter().map(Into::into).collect();
    }

    pub async fn set_models<I: IntoIterator<Item = &'static str>>(&self, ids: I) {
        self.script.lock().await.models = ids
            .into_iter()
            .map(|id| ModelInfo {
                id: id.to_string(),
                object: "model".to_string(),
                created: 1_700_000_000,
                owned_by: "mock".to_string(),
            })
            .collect();
    }

    pub async fn fail_completions(&self, error: CompletionError) {
        self.script.lock().await.completion_error = Some(error);
    }

    pub async fn fail_models(&self, error: CompletionError) {
        self.script.lock().await.models_error = Some(error);
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.script.lock().await.requests.clone()
    }

    pub async fn model_calls(&self) -> usize {
        self.script.lock().await.model_calls
    }

    async fn record(&self, config: &BackendConfig, params: &ChatCompletionParams) -> Option<CompletionError> {
        let mut script = self.script.lock().await;
        script.requests.push(RecordedRequest {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            params: params.clone(),
        });
        script.completion_error.clone()
    }
}

#[async_trait]
impl ExternalBackend for MockBackend {
    fn backend_type(&self) -> &'static str {
        "mock"
    }

    async fn chat_completion(
        &self,
        config: &BackendConfig,
        params: ChatCompletionParams,
    ) -> Result<ChatCompletionResponse, CompletionError> {
        if let Some(error) = self.record(config, &params).await {
            return Err(error);
        }
        let script = self.script.lock().await;
        Ok(script
            .response
            .clone()
            .unwrap_or_else(|| Self::text_response("mock response", None)))
    }

    async fn chat_completion_stream(
        &self,
        config: &BackendConfig,
        params: ChatCompletionParams,
    ) -> Result<LineStream, CompletionError> {
        if let Some(error) = self.record(config, &params).await {
            return Err(error);
        }
        let lines: Vec<Result<SseLine, CompletionError>> = self
            .script
            .lock()
            .await
            .stream_lines
            .iter()
            .map(|line| Ok(SseLine::new(line.clone())))
            .collect();
        Ok(Box::pin(stream::iter(lines)))
    }

    async fn models(&self, _config: &BackendConfig) -> Result<ModelsResponse, CompletionError> {
        let mut script = self.script.lock().await;
        script.model_calls += 1;
        if let Some(error) = script.models_error.clone() {
            return Err(error);
        }
        Ok(ModelsResponse {
            object: "list".to_string(),
            data: script.models.clone(),
        })
    }
}
