//! OpenAI-compatible backend implementation
//!
//! Handles any provider that implements OpenAI's chat-completions API,
//! including Jan inference servers, OpenRouter and Gemini's OpenAI endpoint.

use super::backend::{BackendConfig, ExternalBackend};
use crate::{
    extract_error_message, sse_parser::SseLineParser, ChatCompletionParams,
    ChatCompletionResponse, CompletionError, LineStream, ModelsResponse,
};
use async_trait::async_trait;
use reqwest::{header::HeaderValue, Client, Response};
use std::time::Duration;

pub struct OpenAiCompatibleBackend {
    client: Client,
}

impl OpenAiCompatibleBackend {
    pub fn new() -> Result<Self, CompletionError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| CompletionError::InvalidConfig(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    fn build_headers(&self, config: &BackendConfig) -> Result<reqwest::header::HeaderMap, CompletionError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));

        if !config.api_key.is_empty() {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
                .map_err(|_| CompletionError::InvalidConfig("API key is not a valid header value".to_string()))?;
            value.set_sensitive(true);
            headers.insert("Authorization", value);
        }

        Ok(headers)
    }

    async fn post_chat(
        &self,
        config: &BackendConfig,
        params: &ChatCompletionParams,
    ) -> Result<Response, CompletionError> {
        let url = format!("{}/chat/completions", config.base_url);
        let response = self
            .client
            .post(&url)
            .headers(self.build_headers(config)?)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .json(params)
            .send()
            .await
            .map_err(CompletionError::from_reqwest)?;

        ensure_success(response).await
    }
}

async fn ensure_success(response: Response) -> Result<Response, CompletionError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status_code = response.status().as_u16();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|e| format!("Failed to read error response body: {e}"));
    Err(CompletionError::HttpError {
        status_code,
        message: extract_error_message(&error_text),
    })
}

#[async_trait]
impl ExternalBackend for OpenAiCompatibleBackend {
    fn backend_type(&self) -> &'static str {
        "openai_compatible"
    }

    async fn chat_completion(
        &self,
        config: &BackendConfig,
        params: ChatCompletionParams,
    ) -> Result<ChatCompletionResponse, CompletionError> {
        let mut params = params;
        params.stream = Some(false);
        params.stream_options = None;

        let response = self.post_chat(config, &params).await?;
        let raw_bytes = response.bytes().await.map_err(CompletionError::from_reqwest)?;

        serde_json::from_slice(&raw_bytes).map_err(|e| {
            CompletionError::InvalidResponse(format!("Failed to parse chat completion: {e}"))
        })
    }

    async fn chat_completion_stream(
        &self,
        config: &BackendConfig,
        params: ChatCompletionParams,
    ) -> Result<LineStream, CompletionError> {
        let mut params = params;
        params.stream = Some(true);

        let response = self.post_chat(config, &params).await?;
        Ok(Box::pin(SseLineParser::new(Box::pin(response.bytes_stream()))))
    }

    async fn models(&self, config: &BackendConfig) -> Result<ModelsResponse, CompletionError> {
        let url = format!("{}/models", config.base_url);
        let response = self
            .client
            .get(&url)
            .headers(self.build_headers(config)?)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .send()
            .await
            .map_err(CompletionError::from_reqwest)?;

        let response = ensure_success(response).await?;
        response
            .json::<ModelsResponse>()
            .await
            .map_err(|e| CompletionError::InvalidResponse(format!("Failed to parse models list: {e}")))
    }
}
