//! Stateless OpenAI-compatible surface: completions without a conversation,
//! the model catalogue and the providers behind it.

use crate::{
    conversions::provider_summary,
    middleware::RequestContext,
    models::ProviderSummariesResponse,
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
use inference_providers::ChatCompletionParams;
use services::providers::ProviderSelection;
use tracing::debug;

/// `POST /v1/chat/completions`
///
/// Routed by model like a conversation turn, but nothing is stored and no
/// metadata is added. Streams carry the upstream frames untouched.
pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(params): Json<ChatCompletionParams>,
) -> Result<Response, ApiError> {
    let requested = ProviderSelection {
        model: params.model.clone(),
        ..Default::default()
    };
    let selection = caller_selection(&state, &context, requested).await?;
    let stream = params.stream == Some(true);
    debug!(model = %params.model, stream, "Chat completion request");

    if !stream {
        let response = state
            .completion_service
            .create_chat_completion(&selection, params)
            .await?;
        return Ok(Json(response).into_response());
    }

    let model = params.model.clone();
    let body = state
        .completion_service
        .create_chat_completion_stream(&selection, params)
        .await?;
    Ok(event_stream(body, state.settings.request_timeout, model))
}

/// `GET /v1/models/providers`: the providers the caller can route to.
/// Keys only appear as their hint.
pub async fn list_model_providers(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
) -> Result<Json<ProviderSummariesResponse>, ApiError> {
    let selection = caller_selection(&state, &context, ProviderSelection::default()).await?;
    let providers = state.provider_registry.list_providers(&selection).await?;
    Ok(Json(ProviderSummariesResponse {
        object: "list".to_string(),
        data: providers.iter().map(provider_summary).collect(),
    }))
}
