use crate::{
    middleware::RequestContext,
    models::ModelsResponse,
    routes::{
        api::AppState,
        common::{caller_selection, event_stream, ApiError, Json},
    },
};
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Extension,
};
use services::{completions::ConvCompletionRequest, providers::ProviderSelection};
use tracing::debug;

/// `POST /v1/conv/chat/completions`
///
/// Unary requests answer with the completion plus a `metadata` envelope.
/// Streaming requests answer with SSE: the metadata frame first, then the
/// upstream frames untouched. The body is cut at the request deadline.
pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<ConvCompletionRequest>,
) -> Result<Response, ApiError> {
    let selection = caller_selection(&state, &context, request.selection()?).await?;
    let user_id = context.user().id;
    debug!(
        model = %request.params.model,
        stream = request.is_stream(),
        conversation = ?request.conversation,
        store = request.store,
        "Conversation completion request"
    );

    if !request.is_stream() {
        let response = state
            .completion_service
            .create_completion(user_id, &selection, request)
            .await?;
        return Ok(Json(response).into_response());
    }

    let (metadata, body) = state
        .completion_service
        .create_completion_stream(user_id, &selection, request)
        .await?;

    Ok(event_stream(
        body,
        state.settings.request_timeout,
        metadata.conversation_id,
    ))
}

/// `GET /v1/conv/models` and `GET /v1/models`: every model the caller's
/// providers serve.
pub async fn models(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
) -> Result<Json<ModelsResponse>, ApiError> {
    let selection = caller_selection(&state, &context, ProviderSelection::default()).await?;
    let data = state.completion_service.list_models(&selection).await?;
    Ok(Json(ModelsResponse {
        object: "list".to_string(),
        data,
    }))
}
