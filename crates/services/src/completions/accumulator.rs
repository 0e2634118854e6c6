//! Rebuilds a full chat completion from streamed deltas.

use std::collections::BTreeMap;

use inference_providers::{
    ChatCompletionChunk, ChatCompletionResponse, ChatCompletionResponseChoice, ChatDelta,
    ChatMessage, ChatResponseMessage, FunctionCall, MessageRole, SseLine, TokenUsage, ToolCall,
};
use tracing::debug;

use crate::{
    common::now_unix,
    completions::tokens::{estimate_usage, TokenEstimator},
};

/// Arguments are considered whole once they close their JSON object.
fn arguments_closed(name: &str, arguments: &str) -> bool {
    !name.is_empty() && arguments.ends_with('}')
}

#[derive(Debug, Default, Clone)]
struct FunctionCallAccumulator {
    name: String,
    arguments: String,
    complete: bool,
}

#[derive(Debug, Default, Clone)]
struct ToolCallAccumulator {
    id: String,
    type_: String,
    name: String,
    arguments: String,
    complete: bool,
}

#[derive(Debug, Default, Clone)]
struct ChoiceText {
    content: String,
    reasoning: String,
}

#[derive(Debug, Default)]
pub struct CompletionAccumulator {
    choices: BTreeMap<i64, ChoiceText>,
    /// Legacy single function call, always at index 0
    function_calls: BTreeMap<i64, FunctionCallAccumulator>,
    tool_calls: BTreeMap<i64, ToolCallAccumulator>,
    upstream_finish_reason: Option<String>,
    upstream_usage: Option<TokenUsage>,
    skipped: usize,
}

impl CompletionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one upstream line in. Non-data lines and `[DONE]` are ignored;
    /// unparsable payloads are counted and skipped.
    pub fn push_line(&mut self, line: &SseLine) {
        let Some(data) = line.data() else {
            return;
        };
        if line.is_done() {
            return;
        }
        match serde_json::from_str::<ChatCompletionChunk>(data) {
            Ok(chunk) => self.push_chunk(chunk),
            Err(e) => {
                self.skipped += 1;
                debug!(error = %e, "Skipping unparsable stream chunk");
            }
        }
    }

    pub fn push_chunk(&mut self, chunk: ChatCompletionChunk) {
        if let Some(usage) = chunk.usage {
            self.upstream_usage = Some(usage);
        }
        for choice in chunk.choices {
            if let Some(reason) = choice.finish_reason.filter(|r| !r.is_empty()) {
                self.upstream_finish_reason = Some(reason);
            }
            if let Some(delta) = choice.delta {
                self.push_delta(choice.index, delta);
            }
        }
    }

    fn push_delta(&mut self, index: i64, delta: ChatDelta) {
        let text = self.choices.entry(index).or_default();
        if let Some(content) = delta.content {
            text.content.push_str(&content);
        }
        if let Some(reasoning) = delta.reasoning_content {
            text.reasoning.push_str(&reasoning);
        }

        if let Some(call) = delta.function_call {
            let acc = self.function_calls.entry(0).or_default();
            if let Some(name) = call.name.filter(|n| !n.is_empty()) {
                acc.name = name;
            }
            if let Some(arguments) = call.arguments {
                acc.arguments.push_str(&arguments);
            }
            acc.complete = arguments_closed(&acc.name, &acc.arguments);
        }

        for call in delta.tool_calls.into_iter().flatten() {
            let acc = self.tool_calls.entry(call.index.unwrap_or(0)).or_default();
            if acc.id.is_empty() {
                if let Some(id) = call.id.filter(|id| !id.is_empty()) {
                    acc.id = id;
                }
            }
            if acc.type_.is_empty() {
                if let Some(type_) = call.type_.filter(|t| !t.is_empty()) {
                    acc.type_ = type_;
                }
            }
            if acc.name.is_empty() {
                if let Some(name) = call.function.name.filter(|n| !n.is_empty()) {
                    acc.name = name;
                }
            }
            if let Some(arguments) = call.function.arguments {
                acc.arguments.push_str(&arguments);
            }
            acc.complete = arguments_closed(&acc.name, &acc.arguments);
        }
    }

    /// Concatenated content of the first choice.
    pub fn content(&self) -> &str {
        self.choices
            .values()
            .next()
            .map(|c| c.content.as_str())
            .unwrap_or_default()
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn completed_tool_calls(&self) -> Vec<ToolCall> {
        self.tool_calls
            .values()
            .filter(|acc| acc.complete)
            .map(|acc| ToolCall {
                id: Some(acc.id.clone()).filter(|s| !s.is_empty()),
                type_: Some(if acc.type_.is_empty() {
                    "function".to_string()
                } else {
                    acc.type_.clone()
                }),
                function: FunctionCall {
                    name: Some(acc.name.clone()),
                    arguments: Some(acc.arguments.clone()),
                },
                index: None,
            })
            .collect()
    }

    fn completed_function_call(&self) -> Option<FunctionCall> {
        self.function_calls
            .get(&0)
            .filter(|acc| acc.complete)
            .map(|acc| FunctionCall {
                name: Some(acc.name.clone()),
                arguments: Some(acc.arguments.clone()),
            })
    }

    /// Builds the synthetic response. Finish reason precedence is
    /// `tool_calls`, then `function_call`, then whatever the upstream
    /// reported, then `stop`. Upstream usage wins over the estimate.
    pub fn finish(
        self,
        id: &str,
        model: &str,
        prompt: &[ChatMessage],
        estimator: &dyn TokenEstimator,
    ) -> ChatCompletionResponse {
        let tool_calls = self.completed_tool_calls();
        let function_call = self.completed_function_call();
        let finish_reason = if !tool_calls.is_empty() {
            "tool_calls".to_string()
        } else if function_call.is_some() {
            "function_call".to_string()
        } else {
            self.upstream_finish_reason
                .clone()
                .unwrap_or_else(|| "stop".to_string())
        };

        let text = self.choices.values().next().cloned().unwrap_or_default();
        let usage = self
            .upstream_usage
            .clone()
            .unwrap_or_else(|| estimate_usage(estimator, prompt, &text.content));

        ChatCompletionResponse {
            id: id.to_string(),
            object: "chat.completion".to_string(),
            created: now_unix(),
            model: model.to_string(),
            choices: vec![ChatCompletionResponseChoice {
                index: 0,
                message: ChatResponseMessage {
                    role: MessageRole::Assistant,
                    content: Some(text.content),
                    refusal: None,
                    function_call,
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    reasoning_content: Some(text.reasoning).filter(|r| !r.is_empty()),
                },
                logprobs: None,
                finish_reason: Some(finish_reason),
            }],
            system_fingerprint: None,
            usage: Some(usage),
        }
    }
}
