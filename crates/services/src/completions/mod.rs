//! Conversation-aware chat completions.
//!
//! Loads or creates the conversation, pre-allocates the item IDs for the
//! question and the answer, dispatches unary or streaming, and stores both
//! turns when the caller asked for it.

pub mod accumulator;
pub mod streaming;
pub mod tokens;

use std::{collections::BTreeMap, sync::Arc};

use inference_providers::{ChatCompletionParams, ChatCompletionResponse, ChatMessage, MessageRole};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    common::{internal, InternalFailure},
    conversations::{Content, Conversation, ConversationError, ConversationService, Item, ItemRole, NewItem},
    id_prefixes::{generate_public_id, PREFIX_CHATCMPL, PREFIX_MSG},
    inference_provider_pool::{InferenceError, InferenceProviderPool},
    providers::{ProviderError, ProviderModel, ProviderSelection},
    responses::item_from_message,
};

pub use streaming::{ByteStream, StreamEnd, StreamMeta, StreamingEngine};
pub use tokens::{TokenEstimator, WhitespaceTokenEstimator};

pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";
/// Characters of the first user message kept in a derived title
pub const MAX_TITLE_CHARS: usize = 50;

/// Title from the first non-empty user message, cut to
/// [`MAX_TITLE_CHARS`] characters plus `...`.
pub fn derive_title(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .filter(|m| m.role == MessageRole::User)
        .map(|m| m.text_content())
        .map(|text| text.trim().to_string())
        .find(|text| !text.is_empty())
        .map(|text| match text.char_indices().nth(MAX_TITLE_CHARS) {
            Some((cut, _)) => format!("{}...", &text[..cut]),
            None => text,
        })
        .unwrap_or_else(|| DEFAULT_CONVERSATION_TITLE.to_string())
}

fn needs_title(conversation: &Conversation) -> bool {
    conversation
        .title
        .as_deref()
        .is_none_or(|t| t.trim().is_empty() || t == DEFAULT_CONVERSATION_TITLE)
}

#[derive(Debug, thiserror::Error)]
pub enum ConvCompletionError {
    #[error("Invalid parameters: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Internal(#[from] InternalFailure),
}

/// Chat completion request extended with conversation and storage options.
#[derive(Debug, Clone, Deserialize)]
pub struct ConvCompletionRequest {
    #[serde(flatten)]
    pub params: ChatCompletionParams,
    /// Public ID of the conversation to continue; a new one is created
    /// when absent
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub store: bool,
    #[serde(default)]
    pub store_reasoning: bool,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub provider_type: Option<String>,
    #[serde(default)]
    pub provider_vendor: Option<String>,
}

impl ConvCompletionRequest {
    pub fn is_stream(&self) -> bool {
        self.params.stream.unwrap_or(false)
    }

    /// Provider overrides from the body, with the model filled in.
    pub fn selection(&self) -> Result<ProviderSelection, ProviderError> {
        let mut selection = ProviderSelection::from_overrides(
            self.provider_id.as_deref(),
            self.provider_type.as_deref(),
            self.provider_vendor.as_deref(),
        )?;
        selection.model = self.params.model.trim().to_string();
        Ok(selection)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionMetadata {
    pub conversation_id: String,
    pub conversation_created: bool,
    pub conversation_title: String,
    pub ask_item_id: String,
    pub completion_item_id: String,
    pub store: bool,
    pub store_reasoning: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendedCompletionResponse {
    #[serde(flatten)]
    pub response: ChatCompletionResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CompletionMetadata>,
}

/// A model as listed to conversation clients, with its provider's name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConvModel {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
    pub provider_id: String,
    pub provider_type: String,
    pub provider_vendor: String,
    pub provider_name: String,
}

/// Everything needed to store a finished turn.
#[derive(Debug, Clone)]
struct TurnRecord {
    conversation: Conversation,
    user_id: i64,
    ask_item_id: String,
    completion_item_id: String,
    store: bool,
    store_reasoning: bool,
    last_input: Option<ChatMessage>,
}

impl TurnRecord {
    /// Stores the question and the answer when `store` is set; otherwise
    /// only inspects the finish reasons. Failures are logged, the completion
    /// has already been delivered.
    async fn persist(
        self,
        conversations: &ConversationService,
        response: &ChatCompletionResponse,
    ) -> Option<Item> {
        if !self.store {
            log_finish_reasons(&self.conversation.public_id, response);
            return None;
        }

        let mut batch = Vec::with_capacity(2);
        let mut has_answer = false;
        if let Some(ask) = self.last_input.as_ref().and_then(item_from_message) {
            batch.push(ask.with_public_id(self.ask_item_id.clone()));
        }
        match self.answer_item(response) {
            Ok(Some(answer)) => {
                batch.push(answer.with_public_id(self.completion_item_id.clone()));
                has_answer = true;
            }
            Ok(None) => {}
            Err(e) => error!(error = %e, "Failed to encode assistant answer"),
        }
        if batch.is_empty() {
            return None;
        }

        match conversations
            .add_multiple_items(&self.conversation, self.user_id, batch)
            .await
        {
            Ok(items) => {
                debug!(conversation_id = %self.conversation.public_id, count = items.len(), "Stored completion turn");
                items.into_iter().last().filter(|_| has_answer)
            }
            Err(e) => {
                error!(
                    conversation_id = %self.conversation.public_id,
                    error = %e,
                    "Failed to store completion turn"
                );
                None
            }
        }
    }

    /// The assistant item, shaped by finish reason: call lists are stored
    /// as their JSON text, anything else as the plain content.
    fn answer_item(&self, response: &ChatCompletionResponse) -> Result<Option<NewItem>, InternalFailure> {
        let Some(choice) = response.choices.first() else {
            return Ok(None);
        };
        let message = &choice.message;
        let content = message.content.clone().unwrap_or_default();
        let reasoning = message.reasoning_content.clone().filter(|r| !r.is_empty());

        let text = match choice.finish_reason.as_deref() {
            Some("tool_calls") if message.tool_calls.as_ref().is_some_and(|c| !c.is_empty()) => {
                serde_json::to_string(&message.tool_calls)
                    .map_err(internal("8e2c4a6f-1b3d-4f57-9a0c-6d8e2b4f1a39", "Failed to encode tool calls"))?
            }
            Some("function_call") if message.function_call.is_some() => {
                serde_json::to_string(&message.function_call)
                    .map_err(internal("2c0a8e6d-4b3f-4f71-95c9-8e6d4b2a0f13", "Failed to encode function call"))?
            }
            _ => content,
        };
        if text.is_empty() && reasoning.is_none() {
            return Ok(None);
        }

        let reasoning = reasoning.filter(|_| self.store_reasoning);
        Ok(Some(NewItem::message(
            ItemRole::Assistant,
            vec![Content::output_text(text, reasoning)],
        )))
    }
}

fn validate_params(params: &ChatCompletionParams) -> Result<(), ConvCompletionError> {
    if params.model.trim().is_empty() {
        return Err(ConvCompletionError::InvalidRequest("model is required".to_string()));
    }
    if params.messages.is_empty() {
        return Err(ConvCompletionError::InvalidRequest(
            "messages must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn log_finish_reasons(id: &str, response: &ChatCompletionResponse) {
    for choice in &response.choices {
        match choice.finish_reason.as_deref() {
            Some("stop" | "tool_calls" | "function_call") => {
                debug!(id, finish_reason = ?choice.finish_reason, "Completion finished");
            }
            Some("length") => warn!(id, "Completion stopped at length limit"),
            Some("content_filter") => warn!(id, "Completion stopped by content filter"),
            other => warn!(id, finish_reason = ?other, "Unknown finish reason"),
        }
    }
}

/// A prepared turn: the conversation plus pre-allocated item IDs.
#[derive(Debug, Clone)]
struct PreparedTurn {
    record: TurnRecord,
    metadata: CompletionMetadata,
}

#[derive(Clone)]
pub struct CompletionService {
    pool: Arc<InferenceProviderPool>,
    conversations: Arc<ConversationService>,
    engine: StreamingEngine,
}

impl CompletionService {
    pub fn new(pool: Arc<InferenceProviderPool>, conversations: Arc<ConversationService>) -> Self {
        Self {
            pool,
            conversations,
            engine: StreamingEngine::new(Arc::new(WhitespaceTokenEstimator)),
        }
    }

    /// Swaps the usage estimator used for rebuilt streaming completions.
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.engine = StreamingEngine::new(estimator);
        self
    }

    async fn prepare(
        &self,
        user_id: i64,
        request: &ConvCompletionRequest,
    ) -> Result<PreparedTurn, ConvCompletionError> {
        validate_params(&request.params)?;

        let messages = &request.params.messages;
        let (conversation, created) = match request.conversation.as_deref().filter(|id| !id.is_empty()) {
            Some(public_id) => {
                let mut conversation = self
                    .conversations
                    .get_by_public_id_and_user(public_id, user_id, false)
                    .await?;
                if needs_title(&conversation) {
                    let title = derive_title(messages);
                    if request.store {
                        match self
                            .conversations
                            .update(&conversation.public_id, user_id, Some(title.clone()), None)
                            .await
                        {
                            Ok(updated) => conversation = updated,
                            Err(e) => warn!(conversation_id = %public_id, error = %e, "Failed to store derived title"),
                        }
                    }
                    conversation.title = Some(title);
                }
                (conversation, false)
            }
            None => {
                let metadata = BTreeMap::from([("model".to_string(), request.params.model.clone())]);
                let conversation = self
                    .conversations
                    .create(user_id, Some(derive_title(messages)), true, metadata)
                    .await?;
                (conversation, true)
            }
        };

        let ask_item_id = generate_public_id(PREFIX_MSG)
            .map_err(internal("5e3c1a9f-7d6b-4b04-8e2a-1f9d7b5c3e60", "Failed to generate item ID"))?;
        let completion_item_id = generate_public_id(PREFIX_MSG)
            .map_err(internal("b9f7d5c3-1a0e-4e48-a6b2-5d3b1f9e7c24", "Failed to generate item ID"))?;

        let metadata = CompletionMetadata {
            conversation_id: conversation.public_id.clone(),
            conversation_created: created,
            conversation_title: conversation.title.clone().unwrap_or_default(),
            ask_item_id: ask_item_id.clone(),
            completion_item_id: completion_item_id.clone(),
            store: request.store,
            store_reasoning: request.store_reasoning,
        };
        Ok(PreparedTurn {
            record: TurnRecord {
                conversation,
                user_id,
                ask_item_id,
                completion_item_id,
                store: request.store,
                store_reasoning: request.store_reasoning,
                last_input: messages.last().cloned(),
            },
            metadata,
        })
    }

    /// Unary completion. The returned `id` is the stored answer's item ID.
    pub async fn create_completion(
        &self,
        user_id: i64,
        selection: &ProviderSelection,
        request: ConvCompletionRequest,
    ) -> Result<ExtendedCompletionResponse, ConvCompletionError> {
        let turn = self.prepare(user_id, &request).await?;
        let mut params = request.params;
        params.stream = Some(false);

        let mut response = self.pool.create_completion(selection, params).await?;
        let conversation_id = turn.metadata.conversation_id.clone();
        turn.record.persist(&self.conversations, &response).await;
        response.id = turn.metadata.completion_item_id.clone();

        info!(conversation_id = %conversation_id, "Completed conversation turn");
        Ok(ExtendedCompletionResponse {
            response,
            metadata: Some(turn.metadata),
        })
    }

    /// Streaming completion. The body starts with the metadata frame,
    /// followed by the upstream lines verbatim; the turn is stored after the
    /// upstream finishes.
    pub async fn create_completion_stream(
        &self,
        user_id: i64,
        selection: &ProviderSelection,
        request: ConvCompletionRequest,
    ) -> Result<(CompletionMetadata, ByteStream), ConvCompletionError> {
        let turn = self.prepare(user_id, &request).await?;
        let mut params = request.params;
        params.stream = Some(true);
        let meta = StreamMeta {
            completion_id: turn.metadata.completion_item_id.clone(),
            model: params.model.clone(),
            prompt: params.messages.clone(),
        };

        let upstream = self.pool.create_completion_stream(selection, params).await?;
        let leading = streaming::data_frame(&turn.metadata)
            .map_err(internal("e6c4a2f0-8d7b-4b93-b1e5-0a8c6e4f2d71", "Failed to encode stream metadata"))?;

        let conversations = self.conversations.clone();
        let record = turn.record;
        let body = self.engine.run(upstream, Some(leading), meta, move |end| async move {
            match end {
                StreamEnd::Completed(response) => {
                    record.persist(&conversations, &response).await;
                }
                StreamEnd::Failed(e) => {
                    warn!(conversation_id = %record.conversation.public_id, error = %e, "Stream failed, turn not stored")
                }
                StreamEnd::Abandoned => {
                    debug!(conversation_id = %record.conversation.public_id, "Client left before the stream finished, turn not stored")
                }
            }
            None
        });
        Ok((turn.metadata, body))
    }

    /// Plain chat completion with no conversation attached.
    pub async fn create_chat_completion(
        &self,
        selection: &ProviderSelection,
        mut params: ChatCompletionParams,
    ) -> Result<ChatCompletionResponse, ConvCompletionError> {
        validate_params(&params)?;
        params.stream = Some(false);
        let response = self.pool.create_completion(selection, params).await?;
        log_finish_reasons(&response.id, &response);
        Ok(response)
    }

    /// Streaming counterpart of [`Self::create_chat_completion`]: the
    /// upstream lines are forwarded verbatim and nothing is stored.
    pub async fn create_chat_completion_stream(
        &self,
        selection: &ProviderSelection,
        mut params: ChatCompletionParams,
    ) -> Result<ByteStream, ConvCompletionError> {
        validate_params(&params)?;
        params.stream = Some(true);
        let completion_id = generate_public_id(PREFIX_CHATCMPL)
            .map_err(internal("0c8e6a4f-2b1d-4f75-9a3c-7e5d1b9f3a82", "Failed to generate completion ID"))?;
        let meta = StreamMeta {
            completion_id: completion_id.clone(),
            model: params.model.clone(),
            prompt: params.messages.clone(),
        };

        let upstream = self.pool.create_completion_stream(selection, params).await?;
        Ok(self.engine.run(upstream, None, meta, move |end| async move {
            match end {
                StreamEnd::Completed(response) => log_finish_reasons(&completion_id, &response),
                StreamEnd::Failed(e) => warn!(completion_id = %completion_id, error = %e, "Chat completion stream failed"),
                StreamEnd::Abandoned => debug!(completion_id = %completion_id, "Client left before the stream finished"),
            }
            None
        }))
    }

    /// Models visible to the selection, each labelled with its provider's
    /// display name (falling back to the provider ID).
    pub async fn list_models(
        &self,
        selection: &ProviderSelection,
    ) -> Result<Vec<ConvModel>, ConvCompletionError> {
        let registry = self.pool.registry();
        let names: BTreeMap<String, String> = registry
            .list_providers(selection)
            .await?
            .into_iter()
            .map(|p| (p.public_id, p.name))
            .collect();
        let models = self.pool.get_models(selection).await?;

        Ok(models
            .into_iter()
            .map(|model: ProviderModel| {
                let provider_name = names
                    .get(&model.provider_id)
                    .filter(|name| !name.is_empty())
                    .cloned()
                    .unwrap_or_else(|| model.provider_id.clone());
                ConvModel {
                    id: model.id,
                    object: model.object,
                    created: model.created,
                    owned_by: model.owned_by,
                    provider_type: model.provider_type.to_string(),
                    provider_vendor: model.provider_vendor.to_string(),
                    provider_id: model.provider_id,
                    provider_name,
                }
            })
            .collect())
    }
}
