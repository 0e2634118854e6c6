use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use inference_providers::{
    ChatCompletionParams, ChatCompletionResponse, ChatMessage, MessageContent, MessageRole,
};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::{
    common::{internal, now_unix, Page, Pagination},
    completions::{
        derive_title, ByteStream, StreamEnd, StreamMeta, StreamingEngine, WhitespaceTokenEstimator,
    },
    conversations::{
        Content, Conversation, ConversationService, Item, ItemFilter, ItemRepository, ItemRole,
        ItemType, NewItem,
    },
    id_prefixes::{generate_public_id, PREFIX_MSG, PREFIX_RESP},
    inference_provider_pool::{InferenceError, InferenceProviderPool},
    providers::ProviderSelection,
    responses::{
        errors::ResponseError,
        events::{ResponseEvents, EVENT_COMPLETED, EVENT_FAILED},
        models::{
            CreateResponseRequest, Response, ResponseFailure, ResponseInput, ResponseStatus,
        },
        ports::ResponseRepository,
    },
};

/// A response stored and moved to running, ready to dispatch.
struct StartedResponse {
    response: Response,
    conversation: Option<Conversation>,
    params: ChatCompletionParams,
}

#[derive(Clone)]
pub struct ResponseService {
    responses: Arc<dyn ResponseRepository>,
    items: Arc<dyn ItemRepository>,
    conversations: Arc<ConversationService>,
    pool: Arc<InferenceProviderPool>,
    engine: StreamingEngine,
}

impl ResponseService {
    pub fn new(
        responses: Arc<dyn ResponseRepository>,
        items: Arc<dyn ItemRepository>,
        conversations: Arc<ConversationService>,
        pool: Arc<InferenceProviderPool>,
    ) -> Self {
        Self {
            responses,
            items,
            conversations,
            pool,
            engine: StreamingEngine::new(Arc::new(WhitespaceTokenEstimator)),
        }
    }

    /// Stores the request as pending, records its input in the backing
    /// conversation and moves it to running.
    async fn start(
        &self,
        user_id: i64,
        request: &CreateResponseRequest,
    ) -> Result<StartedResponse, ResponseError> {
        let mut params = Self::convert_to_chat_completion_request(request)?;
        let input_messages = params.messages.clone();

        let previous = match request.previous_response_id.as_deref().filter(|id| !id.is_empty()) {
            Some(previous_id) => Some(self.get(previous_id, user_id).await?),
            None => None,
        };
        let conversation = self
            .handle_conversation(user_id, request, previous.as_ref(), &input_messages)
            .await?;

        if let (Some(_), Some(conversation)) = (&previous, &conversation) {
            let mut history = Self::convert_conversation_items_to_messages(conversation);
            history.append(&mut params.messages);
            params.messages = history;
        }

        let input = serde_json::to_value(&request.input)
            .map_err(internal("2f6c9a1e-4b7d-4e08-a3f5-8d1b6e0c4a73", "Failed to encode response input"))?;
        let response = self
            .create(Response {
                id: 0,
                public_id: String::new(),
                user_id,
                conversation_id: conversation.as_ref().map(|c| c.id),
                previous_response_id: previous.map(|p| p.public_id),
                model: request.model.clone(),
                status: ResponseStatus::Pending,
                system_prompt: request.instructions.clone(),
                input,
                output: None,
                params: request.sampling_params(),
                usage: None,
                error: None,
                completed_at: None,
                cancelled_at: None,
                failed_at: None,
                created_at: 0,
                updated_at: 0,
                items: None,
            })
            .await?;

        if let Some(conversation) = &conversation {
            if let Err(e) = self
                .append_messages_to_conversation(conversation, user_id, &input_messages, response.id)
                .await
            {
                self.fail(response, "conversation_write_failed", &e.to_string()).await;
                return Err(e);
            }
        }

        let response = self.update_status(response, ResponseStatus::Running).await?;
        Ok(StartedResponse {
            response,
            conversation,
            params,
        })
    }

    /// Runs a non-streaming response end to end.
    ///
    /// The record is stored as pending, moved to running before dispatch and
    /// finishes as completed or failed. Input and output messages are
    /// appended to the backing conversation tagged with the response.
    pub async fn create_response(
        &self,
        user_id: i64,
        selection: &ProviderSelection,
        request: CreateResponseRequest,
    ) -> Result<Response, ResponseError> {
        let StartedResponse {
            response,
            conversation,
            mut params,
        } = self.start(user_id, &request).await?;
        params.stream = Some(false);

        match self.pool.create_completion(selection, params).await {
            Ok(completion) => Ok(self
                .complete(response, conversation.as_ref(), completion, None)
                .await),
            Err(e) => {
                self.fail(response, failure_code(&e), &e.to_string()).await;
                Err(e.into())
            }
        }
    }

    /// Streaming variant of [`create_response`](Self::create_response).
    ///
    /// Returns the running record and an SSE body of `response.*` events.
    /// The record is completed (and the answer stored) once the upstream
    /// reaches `[DONE]`, failed when it breaks, and cancelled when the
    /// client leaves first. `render` turns a record and the public ID of its
    /// conversation into the JSON embedded in the lifecycle events.
    pub async fn create_response_stream<R>(
        &self,
        user_id: i64,
        selection: &ProviderSelection,
        request: CreateResponseRequest,
        render: R,
    ) -> Result<(Response, ByteStream), ResponseError>
    where
        R: Fn(&Response, Option<&str>) -> Value + Send + Sync + 'static,
    {
        let StartedResponse {
            response,
            conversation,
            mut params,
        } = self.start(user_id, &request).await?;
        params.stream = Some(true);

        let item_id = generate_public_id(PREFIX_MSG)
            .map_err(internal("7a5e3c1b-9f0d-4c26-b8e4-3d1f9b7a5c02", "Failed to generate item ID"))?;
        let meta = StreamMeta {
            completion_id: item_id.clone(),
            model: params.model.clone(),
            prompt: params.messages.clone(),
        };

        let upstream = match self.pool.create_completion_stream(selection, params).await {
            Ok(upstream) => upstream,
            Err(e) => {
                self.fail(response, failure_code(&e), &e.to_string()).await;
                return Err(e.into());
            }
        };

        let conversation_id = conversation.as_ref().map(|c| c.public_id.clone());
        let events = Arc::new(Mutex::new(ResponseEvents::new(item_id.clone())));
        let leading = lock_events(&events).opening(render(&response, conversation_id.as_deref()));

        let service = self.clone();
        let record = response.clone();
        let closing = events.clone();
        let finish = move |end: StreamEnd| async move {
            let (event, finished) = match end {
                StreamEnd::Completed(completion) => {
                    let finished = service
                        .complete(record, conversation.as_ref(), completion, Some(item_id))
                        .await;
                    info!(response_id = %finished.public_id, "Streamed response completed");
                    (EVENT_COMPLETED, finished)
                }
                StreamEnd::Failed(e) => {
                    let failed = service.fail(record, "upstream_failure", &e.to_string()).await;
                    (EVENT_FAILED, failed)
                }
                StreamEnd::Abandoned => {
                    let public_id = record.public_id.clone();
                    if let Err(e) = service.update_status(record, ResponseStatus::Cancelled).await {
                        error!(response_id = %public_id, error = %e, "Failed to cancel abandoned response");
                    }
                    return None;
                }
            };
            lock_events(&closing).closing(event, render(&finished, conversation_id.as_deref()))
        };
        let translate = events;
        let body = self.engine.run_mapped(upstream, Some(leading), meta, finish, move |line| {
            lock_events(&translate).translate(line)
        });
        Ok((response, body))
    }

    async fn handle_conversation(
        &self,
        user_id: i64,
        request: &CreateResponseRequest,
        previous: Option<&Response>,
        input_messages: &[ChatMessage],
    ) -> Result<Option<Conversation>, ResponseError> {
        if let Some(public_id) = request.conversation.as_deref().filter(|id| !id.is_empty()) {
            return Ok(Some(
                self.conversations
                    .get_by_public_id_and_user(public_id, user_id, true)
                    .await?,
            ));
        }
        if let Some(conversation_id) = previous.and_then(|p| p.conversation_id) {
            return Ok(Some(
                self.conversations
                    .get_by_id_and_user(conversation_id, user_id, true)
                    .await?,
            ));
        }
        if !request.should_store() {
            return Ok(None);
        }

        let metadata = BTreeMap::from([("model".to_string(), request.model.clone())]);
        let conversation = self
            .conversations
            .create(user_id, Some(derive_title(input_messages)), true, metadata)
            .await?;
        Ok(Some(conversation))
    }

    /// Records the answer and marks the response completed. `item_id`
    /// pre-assigns the public ID of the stored assistant message.
    async fn complete(
        &self,
        mut response: Response,
        conversation: Option<&Conversation>,
        completion: ChatCompletionResponse,
        item_id: Option<String>,
    ) -> Response {
        let message = completion.choices.first().map(|c| &c.message);
        let text = message.and_then(|m| m.content.clone()).unwrap_or_default();
        let reasoning = message
            .and_then(|m| m.reasoning_content.clone())
            .filter(|r| !r.is_empty());

        let mut message_id = None;
        if let (Some(conversation), false) = (conversation, text.is_empty()) {
            let mut item = NewItem::message(
                ItemRole::Assistant,
                vec![Content::output_text(text.clone(), reasoning.clone())],
            )
            .with_response(response.id);
            if let Some(item_id) = &item_id {
                item = item.with_public_id(item_id.clone());
            }
            match self
                .conversations
                .add_item(conversation, response.user_id, item)
                .await
            {
                Ok(item) => message_id = Some(item.public_id),
                Err(e) => error!(
                    response_id = %response.public_id,
                    error = %e,
                    "Failed to append assistant output to conversation"
                ),
            }
        }
        let message_id = match message_id.or(item_id) {
            Some(id) => id,
            None => generate_public_id(PREFIX_MSG).unwrap_or_default(),
        };

        let mut output = Vec::new();
        if let Some(reasoning) = &reasoning {
            output.push(json!({
                "type": "reasoning",
                "content": [{"type": "reasoning_text", "text": reasoning}],
            }));
        }
        if !text.is_empty() {
            output.push(json!({
                "type": "message",
                "id": message_id,
                "status": "completed",
                "role": "assistant",
                "content": [{"type": "output_text", "text": text, "annotations": []}],
            }));
        }
        response.output = Some(Value::Array(output));
        response.usage = completion.usage.map(|u| {
            json!({
                "input_tokens": u.prompt_tokens,
                "output_tokens": u.completion_tokens,
                "total_tokens": u.total_tokens,
            })
        });

        match self.update_status(response.clone(), ResponseStatus::Completed).await {
            Ok(updated) => updated,
            Err(e) => {
                // The completion was delivered; report it even if the record lags
                error!(response_id = %response.public_id, error = %e, "Failed to mark response completed");
                response.status = ResponseStatus::Completed;
                response
            }
        }
    }

    /// Marks the response failed. The returned copy reflects the failure
    /// even when the record could not be written.
    async fn fail(&self, mut response: Response, code: &str, message: &str) -> Response {
        response.error = Some(ResponseFailure {
            code: code.to_string(),
            message: message.to_string(),
        });
        match self.update_status(response.clone(), ResponseStatus::Failed).await {
            Ok(failed) => failed,
            Err(e) => {
                error!(response_id = %response.public_id, error = %e, "Failed to mark response failed");
                response.status = ResponseStatus::Failed;
                response
            }
        }
    }

    /// Generates the public ID, stamps timestamps and stores as pending.
    pub async fn create(&self, mut response: Response) -> Result<Response, ResponseError> {
        response.public_id = generate_public_id(PREFIX_RESP)
            .map_err(internal("8e3a1c7f-5d2b-4f96-a0e4-7c9b3d1f5a28", "Failed to generate response ID"))?;
        let now = now_unix();
        response.status = ResponseStatus::Pending;
        response.created_at = now;
        response.updated_at = now;

        let response = self
            .responses
            .create(response)
            .await
            .map_err(internal("c1f7e5a3-9b0d-4d42-8e6c-4a2f0b8d6e19", "Failed to create response"))?;
        info!(response_id = %response.public_id, user_id = response.user_id, "Created response");
        Ok(response)
    }

    /// Moves a response along the status machine and persists it.
    pub async fn update_status(
        &self,
        mut response: Response,
        status: ResponseStatus,
    ) -> Result<Response, ResponseError> {
        if !response.status.can_transition_to(status) {
            return Err(ResponseError::InvalidResponseTransition {
                from: response.status,
                to: status,
            });
        }
        let now = now_unix();
        match status {
            ResponseStatus::Completed => response.completed_at = Some(now),
            ResponseStatus::Cancelled => response.cancelled_at = Some(now),
            ResponseStatus::Failed => response.failed_at = Some(now),
            ResponseStatus::Pending | ResponseStatus::Running => {}
        }
        debug!(response_id = %response.public_id, from = %response.status, to = %status, "Response status change");
        response.status = status;
        response.updated_at = now;

        Ok(self
            .responses
            .update(response)
            .await
            .map_err(internal("4d0b8f6e-2a1c-4e73-b5d9-0f6e4c2a8b31", "Failed to update response"))?)
    }

    /// Owner-only lookup.
    pub async fn get(&self, public_id: &str, user_id: i64) -> Result<Response, ResponseError> {
        let response = self
            .responses
            .find_by_public_id(public_id)
            .await
            .map_err(internal("a7c5e3b1-0f9d-4b28-86e2-5d3b1f9c7e40", "Failed to load response"))?
            .ok_or(ResponseError::NotFound)?;
        if !response.is_owned_by(user_id) {
            return Err(ResponseError::AccessDenied);
        }
        Ok(response)
    }

    /// Cancels a pending or running response.
    pub async fn cancel(&self, public_id: &str, user_id: i64) -> Result<Response, ResponseError> {
        let response = self.get(public_id, user_id).await?;
        let response = self.update_status(response, ResponseStatus::Cancelled).await?;
        info!(response_id = %response.public_id, "Cancelled response");
        Ok(response)
    }

    pub async fn delete(&self, public_id: &str, user_id: i64) -> Result<Response, ResponseError> {
        let response = self.get(public_id, user_id).await?;
        self.responses
            .delete(response.id)
            .await
            .map_err(internal("6b4f2d0a-8e7c-4a15-93d1-2c8a6e4b0f57", "Failed to delete response"))?;
        info!(response_id = %response.public_id, "Deleted response");
        Ok(response)
    }

    /// Items this response appended, excluding the assistant output.
    pub async fn list_input_items(
        &self,
        response: &Response,
        pagination: Pagination,
    ) -> Result<Page<Item>, ResponseError> {
        Ok(self
            .items
            .find_by_filter(
                ItemFilter {
                    response_id: Some(response.id),
                    exclude_role: Some(ItemRole::Assistant),
                    ..Default::default()
                },
                pagination.validated(),
            )
            .await
            .map_err(internal("f2a0c8e6-4d3b-4f91-a7c5-9e1b7d5f3a62", "Failed to list input items"))?)
    }

    /// Resolves an item public-ID cursor among the response's items.
    pub async fn input_item_cursor(
        &self,
        response: &Response,
        public_id: &str,
    ) -> Result<i64, ResponseError> {
        self.items
            .find_by_public_id(public_id)
            .await
            .map_err(internal("0e8c6a4f-2b1d-4d37-b9f5-6a4e2c0b8d13", "Failed to resolve item cursor"))?
            .filter(|item| item.response_id == Some(response.id))
            .map(|item| item.id)
            .ok_or_else(|| ResponseError::InvalidParams(format!("invalid cursor '{public_id}'")))
    }

    /// Normalizes a create request into the upstream chat-completion shape.
    /// `instructions` becomes a leading system message.
    pub fn convert_to_chat_completion_request(
        request: &CreateResponseRequest,
    ) -> Result<ChatCompletionParams, ResponseError> {
        if request.model.trim().is_empty() {
            return Err(ResponseError::InvalidParams("model is required".to_string()));
        }

        let mut messages = Vec::new();
        if let Some(instructions) = request.instructions.as_deref().filter(|s| !s.is_empty()) {
            messages.push(ChatMessage::text(MessageRole::System, instructions));
        }
        match &request.input {
            ResponseInput::Text(text) if text.trim().is_empty() => {
                return Err(ResponseError::InvalidParams("input must not be empty".to_string()))
            }
            ResponseInput::Text(text) => messages.push(ChatMessage::text(MessageRole::User, text)),
            ResponseInput::Messages(input) if input.is_empty() => {
                return Err(ResponseError::InvalidParams("input must not be empty".to_string()))
            }
            ResponseInput::Messages(input) => messages.extend(input.iter().map(|m| ChatMessage {
                role: m.role,
                content: Some(m.content.clone()),
                name: None,
                tool_call_id: None,
                tool_calls: None,
                function_call: None,
            })),
        }

        let params = request.sampling_params();
        let mut extra = std::collections::HashMap::new();
        if let Some(top_k) = params.top_k {
            extra.insert("top_k".to_string(), json!(top_k));
        }
        if let Some(penalty) = params.repetition_penalty {
            extra.insert("repetition_penalty".to_string(), json!(penalty));
        }

        Ok(ChatCompletionParams {
            model: request.model.clone(),
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            stream: Some(false),
            stop: decode_param("stop", params.stop)?,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
            logit_bias: decode_param("logit_bias", params.logit_bias)?,
            user: request.user.clone(),
            response_format: params.response_format,
            seed: params.seed,
            tools: decode_param("tools", params.tools)?,
            tool_choice: decode_param("tool_choice", params.tool_choice)?,
            extra,
            ..Default::default()
        })
    }

    /// Ordered `{role, content}` history from the conversation's loaded
    /// message items. Empty messages are skipped.
    pub fn convert_conversation_items_to_messages(conversation: &Conversation) -> Vec<ChatMessage> {
        conversation
            .items
            .iter()
            .flatten()
            .filter(|item| item.item_type == ItemType::Message)
            .filter_map(|item| {
                let role = match item.role? {
                    ItemRole::System => MessageRole::System,
                    ItemRole::User => MessageRole::User,
                    ItemRole::Assistant => MessageRole::Assistant,
                };
                let text = item.text();
                (!text.is_empty()).then(|| ChatMessage::text(role, text))
            })
            .collect()
    }

    /// Converts chat messages into items and appends them in order, tagged
    /// with the owning response.
    pub async fn append_messages_to_conversation(
        &self,
        conversation: &Conversation,
        user_id: i64,
        messages: &[ChatMessage],
        response_id: i64,
    ) -> Result<Vec<Item>, ResponseError> {
        let items: Vec<NewItem> = messages
            .iter()
            .filter_map(item_from_message)
            .map(|item| item.with_response(response_id))
            .collect();
        if items.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .conversations
            .add_multiple_items(conversation, user_id, items)
            .await?)
    }
}

fn failure_code(error: &InferenceError) -> &'static str {
    match error {
        InferenceError::Timeout { .. } => "timeout",
        InferenceError::Provider(_) => "provider_unavailable",
        InferenceError::Upstream { .. } => "upstream_failure",
    }
}

fn lock_events(events: &Mutex<ResponseEvents>) -> MutexGuard<'_, ResponseEvents> {
    events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn decode_param<T: serde::de::DeserializeOwned>(
    name: &str,
    value: Option<Value>,
) -> Result<Option<T>, ResponseError> {
    value
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| ResponseError::InvalidParams(format!("invalid {name}: {e}")))
}

/// Maps a chat message onto a conversation item. Messages without any
/// content are dropped.
pub fn item_from_message(message: &ChatMessage) -> Option<NewItem> {
    let text = message.text_content();
    match message.role {
        MessageRole::System | MessageRole::Developer => {
            Some(NewItem::message(ItemRole::System, content_parts(message)?))
        }
        MessageRole::User => Some(NewItem::message(ItemRole::User, content_parts(message)?)),
        MessageRole::Assistant => {
            if let Some(tool_calls) = message.tool_calls.as_ref().filter(|c| !c.is_empty()) {
                let encoded = serde_json::to_string(tool_calls).ok()?;
                return Some(NewItem {
                    item_type: ItemType::FunctionCall,
                    role: Some(ItemRole::Assistant),
                    ..NewItem::message(ItemRole::Assistant, vec![Content::text(encoded)])
                });
            }
            (!text.is_empty())
                .then(|| NewItem::message(ItemRole::Assistant, vec![Content::output_text(text, None)]))
        }
        MessageRole::Tool | MessageRole::Function => (!text.is_empty()).then(|| NewItem {
            item_type: ItemType::FunctionCallOutput,
            role: None,
            ..NewItem::message(ItemRole::User, vec![Content::text(text)])
        }),
    }
}

fn content_parts(message: &ChatMessage) -> Option<Vec<Content>> {
    let parts: Vec<Content> = match message.content.as_ref()? {
        MessageContent::Text(text) if text.is_empty() => Vec::new(),
        MessageContent::Text(text) => vec![Content::text(text.clone())],
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match (&part.text, &part.image_url) {
                (Some(text), _) if !text.is_empty() => Some(Content::text(text.clone())),
                (_, Some(image)) => {
                    let url = image
                        .as_str()
                        .or_else(|| image.get("url").and_then(Value::as_str))
                        .map(str::to_string);
                    if url.is_none() {
                        warn!(part_type = %part.type_, "Skipping image part without url");
                    }
                    url.map(|url| Content::Image {
                        image_url: Some(url),
                        file_id: None,
                        detail: image.get("detail").and_then(Value::as_str).map(str::to_string),
                    })
                }
                _ => None,
            })
            .collect(),
    };
    (!parts.is_empty()).then_some(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        common::RepositoryError,
        conversations::{ConversationStatus, MockConversationRepository, MockItemRepository},
        crypto::KeySealer,
        providers::{MockProviderRepository, ProviderRegistry, RegistrySettings},
        responses::ports::MockResponseRepository,
    };
    use cache::MemoryCache;
    use inference_providers::{CompletionError, ExternalBackend, MockBackend, ToolCall};
    use serde_json::json;
    use std::{sync::Mutex, time::Duration};

    fn pool(backend: &MockBackend) -> Arc<InferenceProviderPool> {
        let shared: Arc<dyn ExternalBackend> = Arc::new(backend.clone());
        let registry = ProviderRegistry::new(
            Arc::new(MockProviderRepository::new()),
            KeySealer::new(&[5u8; 32]),
            Arc::new(MemoryCache::new()),
            shared.clone(),
            RegistrySettings {
                jan_base_url: "http://jan.local/v1".to_string(),
                jan_api_key: None,
                models_ttl: Duration::from_secs(60),
                provider_ttl: Duration::from_secs(60),
                aggregation_concurrency: 1,
            },
        )
        .unwrap();
        Arc::new(InferenceProviderPool::new(Arc::new(registry), shared))
    }

    fn request(body: Value) -> CreateResponseRequest {
        serde_json::from_value(body).unwrap()
    }

    /// Response repository that keeps the latest copy of every record.
    fn recording_responses(store: Arc<Mutex<Vec<Response>>>) -> MockResponseRepository {
        let mut responses = MockResponseRepository::new();
        let created = store.clone();
        responses.expect_create().returning(move |mut r| {
            r.id = 7;
            created.lock().unwrap().push(r.clone());
            Ok(r)
        });
        let updated = store.clone();
        responses.expect_update().returning(move |r| {
            updated.lock().unwrap().push(r.clone());
            Ok(r)
        });
        responses
    }

    fn conversation_service(written: Arc<Mutex<Vec<Item>>>) -> Arc<ConversationService> {
        let mut conversations = MockConversationRepository::new();
        conversations.expect_create().returning(|mut c| {
            c.id = 3;
            Ok(c)
        });
        let bulk = written.clone();
        conversations.expect_bulk_add_items().returning(move |_, items| {
            bulk.lock().unwrap().extend(items.clone());
            Ok(items)
        });
        let single = written;
        conversations.expect_add_item().returning(move |_, item| {
            single.lock().unwrap().push(item.clone());
            Ok(item)
        });
        conversations.expect_update().returning(Ok);
        Arc::new(ConversationService::new(
            Arc::new(conversations),
            Arc::new(MockItemRepository::new()),
        ))
    }

    #[tokio::test]
    async fn test_create_response_completes_and_records_items() {
        let backend = MockBackend::new();
        backend
            .set_response(MockBackend::text_response("hi there", None))
            .await;
        let records = Arc::new(Mutex::new(Vec::new()));
        let written = Arc::new(Mutex::new(Vec::new()));
        let service = ResponseService::new(
            Arc::new(recording_responses(records.clone())),
            Arc::new(MockItemRepository::new()),
            conversation_service(written.clone()),
            pool(&backend),
        );

        let response = service
            .create_response(
                1,
                &ProviderSelection::default(),
                request(json!({"model": "jan-v1-4b", "input": "hello", "instructions": "be brief"})),
            )
            .await
            .unwrap();

        assert_eq!(response.status, ResponseStatus::Completed);
        assert!(response.public_id.starts_with("resp_"));
        assert!(response.completed_at.is_some());
        assert_eq!(response.conversation_id, Some(3));
        let output = response.output.unwrap();
        assert_eq!(output[0]["content"][0]["text"], "hi there");

        let statuses: Vec<_> = records.lock().unwrap().iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![ResponseStatus::Pending, ResponseStatus::Running, ResponseStatus::Completed]
        );

        let items = written.lock().unwrap();
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|i| i.response_id == Some(7)));
        assert_eq!(items[0].role, Some(ItemRole::System));
        assert_eq!(items[1].text(), "hello");
        assert_eq!(items[2].role, Some(ItemRole::Assistant));

        let sent = backend.requests().await;
        assert_eq!(sent[0].params.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_upstream_failure_marks_response_failed() {
        let backend = MockBackend::new();
        backend
            .fail_completions(CompletionError::HttpError {
                status_code: 503,
                message: "overloaded".to_string(),
            })
            .await;
        let records = Arc::new(Mutex::new(Vec::new()));
        let service = ResponseService::new(
            Arc::new(recording_responses(records.clone())),
            Arc::new(MockItemRepository::new()),
            conversation_service(Arc::new(Mutex::new(Vec::new()))),
            pool(&backend),
        );

        let err = service
            .create_response(
                1,
                &ProviderSelection::default(),
                request(json!({"model": "jan-v1-4b", "input": "hello", "store": false})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResponseError::Inference(InferenceError::Upstream { .. })));

        let last = records.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.status, ResponseStatus::Failed);
        assert!(last.failed_at.is_some());
        assert_eq!(last.error.unwrap().code, "upstream_failure");
        assert_eq!(last.conversation_id, None);
    }

    fn render(response: &Response, conversation: Option<&str>) -> Value {
        json!({"id": response.public_id, "status": response.status, "conversation": conversation})
    }

    fn sse_events(chunks: &[bytes::Bytes]) -> Vec<Value> {
        chunks
            .iter()
            .flat_map(|chunk| {
                String::from_utf8(chunk.to_vec())
                    .unwrap()
                    .lines()
                    .filter_map(|l| l.strip_prefix("data: ").map(str::to_string))
                    .collect::<Vec<_>>()
            })
            .map(|data| serde_json::from_str(&data).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_streamed_response_completes_after_done() {
        use futures::StreamExt;

        let backend = MockBackend::new();
        backend
            .set_stream_lines([
                r#"data: {"choices":[{"index":0,"delta":{"content":"hi "}}]}"#,
                r#"data: {"choices":[{"index":0,"delta":{"content":"there"}}]}"#,
                "data: [DONE]",
            ])
            .await;
        let records = Arc::new(Mutex::new(Vec::new()));
        let written = Arc::new(Mutex::new(Vec::new()));
        let service = ResponseService::new(
            Arc::new(recording_responses(records.clone())),
            Arc::new(MockItemRepository::new()),
            conversation_service(written.clone()),
            pool(&backend),
        );

        let (response, body) = service
            .create_response_stream(
                1,
                &ProviderSelection::default(),
                request(json!({"model": "jan-v1-4b", "input": "hello", "stream": true})),
                render,
            )
            .await
            .unwrap();
        assert_eq!(response.status, ResponseStatus::Running);
        assert_eq!(backend.requests().await[0].params.stream, Some(true));

        let chunks: Vec<_> = body.map(|b| b.unwrap()).collect().await;
        let events = sse_events(&chunks);
        let kinds: Vec<_> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(
            kinds,
            vec![
                "response.created",
                "response.in_progress",
                "response.output_item.added",
                "response.output_text.delta",
                "response.output_text.delta",
                "response.output_text.done",
                "response.completed",
            ]
        );
        assert_eq!(events[0]["response"]["status"], "running");
        assert_eq!(events[5]["text"], "hi there");
        assert_eq!(events[6]["response"]["status"], "completed");

        let statuses: Vec<_> = records.lock().unwrap().iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![ResponseStatus::Pending, ResponseStatus::Running, ResponseStatus::Completed]
        );
        let items = written.lock().unwrap();
        let answer = items.last().unwrap();
        assert_eq!(answer.role, Some(ItemRole::Assistant));
        assert_eq!(answer.text(), "hi there");
        assert_eq!(answer.public_id, events[2]["item"]["id"].as_str().unwrap());
    }

    #[tokio::test]
    async fn test_streamed_response_fails_on_broken_upstream() {
        use futures::StreamExt;

        let backend = MockBackend::new();
        backend
            .fail_completions(CompletionError::HttpError {
                status_code: 502,
                message: "bad gateway".to_string(),
            })
            .await;
        let records = Arc::new(Mutex::new(Vec::new()));
        let service = ResponseService::new(
            Arc::new(recording_responses(records.clone())),
            Arc::new(MockItemRepository::new()),
            conversation_service(Arc::new(Mutex::new(Vec::new()))),
            pool(&backend),
        );

        let result = service
            .create_response_stream(
                1,
                &ProviderSelection::default(),
                request(json!({"model": "jan-v1-4b", "input": "hello", "store": false})),
                render,
            )
            .await;
        let err = match result {
            Ok((_, body)) => {
                let _: Vec<_> = body.collect().await;
                panic!("stream should not open");
            }
            Err(e) => e,
        };
        assert!(matches!(err, ResponseError::Inference(InferenceError::Upstream { .. })));
        let last = records.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.status, ResponseStatus::Failed);
    }

    fn stored_response(status: ResponseStatus) -> Response {
        Response {
            id: 9,
            public_id: "resp_abc".to_string(),
            user_id: 1,
            conversation_id: None,
            previous_response_id: None,
            model: "m".to_string(),
            status,
            system_prompt: None,
            input: json!("x"),
            output: None,
            params: Default::default(),
            usage: None,
            error: None,
            completed_at: None,
            cancelled_at: None,
            failed_at: None,
            created_at: 0,
            updated_at: 0,
            items: None,
        }
    }

    #[tokio::test]
    async fn test_cancel_respects_state_machine() {
        let mut responses = MockResponseRepository::new();
        responses
            .expect_find_by_public_id()
            .returning(|id| match id {
                "resp_running" => Ok(Some(stored_response(ResponseStatus::Running))),
                "resp_done" => Ok(Some(stored_response(ResponseStatus::Completed))),
                _ => Ok(None),
            });
        responses.expect_update().times(1).returning(Ok);
        let service = ResponseService::new(
            Arc::new(responses),
            Arc::new(MockItemRepository::new()),
            conversation_service(Arc::new(Mutex::new(Vec::new()))),
            pool(&MockBackend::new()),
        );

        let cancelled = service.cancel("resp_running", 1).await.unwrap();
        assert_eq!(cancelled.status, ResponseStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());

        assert!(matches!(
            service.cancel("resp_done", 1).await,
            Err(ResponseError::InvalidResponseTransition {
                from: ResponseStatus::Completed,
                to: ResponseStatus::Cancelled
            })
        ));
        assert!(matches!(service.cancel("resp_missing", 1).await, Err(ResponseError::NotFound)));
        assert!(matches!(service.cancel("resp_running", 2).await, Err(ResponseError::AccessDenied)));
    }

    #[tokio::test]
    async fn test_list_input_items_filters_by_response() {
        let mut items = MockItemRepository::new();
        items
            .expect_find_by_filter()
            .withf(|filter, pagination| {
                filter.response_id == Some(9)
                    && filter.exclude_role == Some(ItemRole::Assistant)
                    && pagination.limit == 100
            })
            .returning(|_, _| Ok(Page::empty()));
        items
            .expect_find_by_public_id()
            .returning(|_| Err(RepositoryError::NotFound("item".to_string())));
        let service = ResponseService::new(
            Arc::new(MockResponseRepository::new()),
            Arc::new(items),
            conversation_service(Arc::new(Mutex::new(Vec::new()))),
            pool(&MockBackend::new()),
        );

        let response = stored_response(ResponseStatus::Completed);
        let page = service
            .list_input_items(&response, Pagination::new(500, Default::default()))
            .await
            .unwrap();
        assert!(!page.has_more);
        assert!(service.input_item_cursor(&response, "msg_x").await.is_err());
    }

    #[test]
    fn test_history_from_conversation_items() {
        let item = |role, content: Vec<Content>| Item {
            id: 1,
            public_id: "msg_a".to_string(),
            conversation_id: 1,
            response_id: None,
            item_type: ItemType::Message,
            role: Some(role),
            content,
            status: None,
            incomplete_at: None,
            incomplete_details: None,
            completed_at: None,
            created_at: 0,
        };
        let conversation = Conversation {
            id: 1,
            public_id: "conv_a".to_string(),
            title: None,
            user_id: 1,
            status: ConversationStatus::Active,
            is_private: true,
            metadata: BTreeMap::new(),
            created_at: 0,
            updated_at: 0,
            items: Some(vec![
                item(ItemRole::User, vec![Content::text("question")]),
                item(ItemRole::Assistant, vec![Content::output_text("answer", None)]),
                item(ItemRole::User, vec![]),
            ]),
        };

        let messages = ResponseService::convert_conversation_items_to_messages(&conversation);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].text_content(), "answer");
    }

    #[test]
    fn test_message_role_mapping() {
        let developer = item_from_message(&ChatMessage::text(MessageRole::Developer, "rules")).unwrap();
        assert_eq!(developer.role, Some(ItemRole::System));

        let tool = item_from_message(&ChatMessage::text(MessageRole::Tool, "42")).unwrap();
        assert_eq!(tool.item_type, ItemType::FunctionCallOutput);
        assert_eq!(tool.role, None);

        let mut call = ChatMessage::text(MessageRole::Assistant, "");
        call.tool_calls = Some(vec![ToolCall {
            id: Some("t1".to_string()),
            ..Default::default()
        }]);
        let call = item_from_message(&call).unwrap();
        assert_eq!(call.item_type, ItemType::FunctionCall);

        assert!(item_from_message(&ChatMessage::text(MessageRole::User, "")).is_none());
    }

    #[test]
    fn test_convert_rejects_bad_tools() {
        let err = ResponseService::convert_to_chat_completion_request(&request(json!({
            "model": "m",
            "input": "x",
            "tools": "not-a-list"
        })))
        .unwrap_err();
        assert!(matches!(err, ResponseError::InvalidParams(_)));

        let params = ResponseService::convert_to_chat_completion_request(&request(json!({
            "model": "m",
            "input": "x",
            "top_k": 5,
            "stop": ["END"]
        })))
        .unwrap();
        assert_eq!(params.extra.get("top_k"), Some(&json!(5)));
        assert!(params.stop.is_some());
    }
}
