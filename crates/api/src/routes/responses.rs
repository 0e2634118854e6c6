use crate::{
    conversions::response_object,
    middleware::RequestContext,
    models::{DeletedObject, ItemObject, ListQuery, ListResponse, ResponseObject},
    routes::{
        api::AppState,
        common::{caller_selection, event_stream, validate_id, ApiError, Json},
    },
};
use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response as HttpResponse},
    Extension,
};
use services::{
    common::SortOrder,
    id_prefixes::PREFIX_RESP,
    providers::ProviderSelection,
    responses::{CreateResponseRequest, Response},
};
use tracing::debug;

/// Renders a response with the public ID of its backing conversation. A
/// conversation the caller can no longer read is omitted.
async fn render(state: &AppState, response: &Response, user_id: i64) -> ResponseObject {
    let conversation = match response.conversation_id {
        Some(id) => match state
            .conversation_service
            .get_by_id_and_user(id, user_id, false)
            .await
        {
            Ok(conversation) => Some(conversation.public_id),
            Err(e) => {
                debug!(response_id = %response.public_id, error = %e, "Backing conversation unavailable");
                None
            }
        },
        None => None,
    };
    response_object(response, conversation)
}

/// `POST /v1/responses`. With `stream: true` the answer is an SSE body of
/// `response.*` events ending in `response.completed` or `response.failed`.
pub async fn create_response(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<CreateResponseRequest>,
) -> Result<HttpResponse, ApiError> {
    let selection = ProviderSelection {
        model: request.model.trim().to_string(),
        ..Default::default()
    };
    let selection = caller_selection(&state, &context, selection).await?;
    let user_id = context.user().id;

    if !request.stream.unwrap_or(false) {
        let response = state
            .response_service
            .create_response(user_id, &selection, request)
            .await?;
        return Ok(Json(render(&state, &response, user_id).await).into_response());
    }

    let (response, body) = state
        .response_service
        .create_response_stream(user_id, &selection, request, |response, conversation| {
            serde_json::to_value(response_object(response, conversation.map(str::to_string)))
                .unwrap_or_default()
        })
        .await?;
    Ok(event_stream(
        body,
        state.settings.request_timeout,
        response.public_id,
    ))
}

pub async fn get_response(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(response_id): Path<String>,
) -> Result<Json<ResponseObject>, ApiError> {
    validate_id(&response_id, PREFIX_RESP, "response_id")?;
    let user_id = context.user().id;
    let response = state.response_service.get(&response_id, user_id).await?;
    Ok(Json(render(&state, &response, user_id).await))
}

pub async fn cancel_response(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(response_id): Path<String>,
) -> Result<Json<ResponseObject>, ApiError> {
    validate_id(&response_id, PREFIX_RESP, "response_id")?;
    let user_id = context.user().id;
    let response = state.response_service.cancel(&response_id, user_id).await?;
    Ok(Json(render(&state, &response, user_id).await))
}

pub async fn delete_response(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(response_id): Path<String>,
) -> Result<Json<DeletedObject>, ApiError> {
    validate_id(&response_id, PREFIX_RESP, "response_id")?;
    let response = state
        .response_service
        .delete(&response_id, context.user().id)
        .await?;
    Ok(Json(DeletedObject {
        id: response.public_id,
        object: "response.deleted".to_string(),
        deleted: true,
    }))
}

pub async fn list_input_items(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(response_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse<ItemObject>>, ApiError> {
    validate_id(&response_id, PREFIX_RESP, "response_id")?;
    let service = &state.response_service;
    let response = service.get(&response_id, context.user().id).await?;

    let mut pagination = query.pagination(SortOrder::Asc)?;
    if let Some(after) = query.after.as_deref() {
        pagination.after = Some(service.input_item_cursor(&response, after).await?);
    }
    if let Some(before) = query.before.as_deref() {
        pagination.before = Some(service.input_item_cursor(&response, before).await?);
    }

    let page = service.list_input_items(&response, pagination).await?;
    let data: Vec<ItemObject> = page.items.iter().map(ItemObject::from).collect();
    Ok(Json(ListResponse::new(data, page.has_more, |i| &i.id)))
}
