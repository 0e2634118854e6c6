//! Inference providers crate for talking to OpenAI-compatible upstreams
//!
//! The gateway never reinterprets a streamed completion on the way through:
//! streaming calls yield the upstream SSE lines verbatim ([`SseLine`]), and
//! callers parse the `data:` payloads they care about on the side.
//!
//! # Usage
//!
//! ```rust,ignore
//! use inference_providers::{BackendConfig, ExternalBackend, OpenAiCompatibleBackend};
//! use futures_util::StreamExt;
//!
//! async fn example(params: ChatCompletionParams) -> Result<(), CompletionError> {
//!     let backend = OpenAiCompatibleBackend::new()?;
//!     let config = BackendConfig::new("https://openrouter.ai/api/v1", "sk-...");
//!     let mut lines = backend.chat_completion_stream(&config, params).await?;
//!     while let Some(line) = lines.next().await {
//!         let line = line?;
//!         if line.is_done() {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod external;
pub mod mock;
pub mod models;
pub mod sse_parser;

use futures_core::Stream;
use std::pin::Pin;

pub use external::{BackendConfig, ExternalBackend, OpenAiCompatibleBackend};
pub use mock::MockBackend;
pub use models::{
    ChatChoice, ChatCompletionChunk, ChatCompletionParams, ChatCompletionResponse,
    ChatCompletionResponseChoice, ChatDelta, ChatMessage, ChatResponseMessage, CompletionError,
    FunctionCall, FunctionChoice, FunctionDefinition, MessageContent, MessageContentPart,
    MessageRole, ModelInfo, ModelsResponse, StopSequences, StreamOptions, TokenUsage, ToolCall,
    ToolChoice, ToolDefinition,
};
pub use sse_parser::{SseLine, SseLineParser};

/// Upstream SSE lines in arrival order.
pub type LineStream = Pin<Box<dyn Stream<Item = Result<SseLine, CompletionError>> + Send>>;

const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Pulls a human-readable message out of an upstream error body.
///
/// Understands `{"error": {"message": ...}}`, `{"error": "..."}` and
/// `{"message": ...}`; anything else is returned as truncated text.
pub fn extract_error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        let message = json
            .get("error")
            .and_then(|e| e.get("message").or(Some(e)))
            .and_then(|m| m.as_str())
            .or_else(|| json.get("message").and_then(|m| m.as_str()));
        if let Some(message) = message {
            return truncate(message);
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty error response".to_string()
    } else {
        truncate(trimmed)
    }
}

fn truncate(message: &str) -> String {
    if message.len() <= MAX_ERROR_MESSAGE_LEN {
        return message.to_string();
    }
    let mut end = MAX_ERROR_MESSAGE_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &message[..end])
}
