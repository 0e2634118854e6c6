use inference_providers::{MessageContent, MessageRole};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversations::Item;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Pending => "pending",
            ResponseStatus::Running => "running",
            ResponseStatus::Completed => "completed",
            ResponseStatus::Cancelled => "cancelled",
            ResponseStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResponseStatus::Completed | ResponseStatus::Cancelled | ResponseStatus::Failed
        )
    }

    /// pending → running → completed | cancelled | failed. A pending
    /// response may also be cancelled or fail before it starts running.
    pub fn can_transition_to(&self, next: ResponseStatus) -> bool {
        matches!(
            (self, next),
            (ResponseStatus::Pending, ResponseStatus::Running)
                | (ResponseStatus::Pending, ResponseStatus::Cancelled)
                | (ResponseStatus::Pending, ResponseStatus::Failed)
                | (ResponseStatus::Running, ResponseStatus::Completed)
                | (ResponseStatus::Running, ResponseStatus::Cancelled)
                | (ResponseStatus::Running, ResponseStatus::Failed)
        )
    }
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sampling parameters recorded with a response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: Option<i64>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<i64>,
    pub repetition_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub seed: Option<i64>,
    pub stop: Option<Value>,
    pub logit_bias: Option<Value>,
    pub response_format: Option<Value>,
    pub tools: Option<Value>,
    pub tool_choice: Option<Value>,
    pub metadata: Option<Value>,
}

/// Drops values that carry nothing: `null`, `[]` and `{}`.
pub fn non_empty(value: Option<Value>) -> Option<Value> {
    value.filter(|v| match v {
        Value::Null => false,
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        _ => true,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseFailure {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub id: i64,
    pub public_id: String,
    pub user_id: i64,
    pub conversation_id: Option<i64>,
    /// Public ID of the response this one continues
    pub previous_response_id: Option<String>,
    pub model: String,
    pub status: ResponseStatus,
    pub system_prompt: Option<String>,
    pub input: Value,
    pub output: Option<Value>,
    pub params: SamplingParams,
    pub usage: Option<Value>,
    pub error: Option<ResponseFailure>,
    pub completed_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Item>>,
}

impl Response {
    pub fn is_owned_by(&self, user_id: i64) -> bool {
        self.user_id == user_id
    }
}

/// A role-tagged input message. Content is a bare string or typed parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputMessage {
    pub role: MessageRole,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ResponseInput {
    Text(String),
    Messages(Vec<InputMessage>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateResponseRequest {
    pub model: String,
    pub input: ResponseInput,
    #[serde(default, alias = "system_prompt")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub previous_response_id: Option<String>,
    /// Conversation public ID to continue
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub store: Option<bool>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default, alias = "max_output_tokens")]
    pub max_tokens: Option<i64>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub top_k: Option<i64>,
    #[serde(default)]
    pub repetition_penalty: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub stop: Option<Value>,
    #[serde(default)]
    pub logit_bias: Option<Value>,
    #[serde(default)]
    pub response_format: Option<Value>,
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub user: Option<String>,
}

impl CreateResponseRequest {
    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            repetition_penalty: self.repetition_penalty,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
            seed: self.seed,
            stop: non_empty(self.stop.clone()),
            logit_bias: non_empty(self.logit_bias.clone()),
            response_format: non_empty(self.response_format.clone()),
            tools: non_empty(self.tools.clone()),
            tool_choice: non_empty(self.tool_choice.clone()),
            metadata: non_empty(self.metadata.clone()),
        }
    }

    /// Storing defaults to on.
    pub fn should_store(&self) -> bool {
        self.store.unwrap_or(true)
    }
}
