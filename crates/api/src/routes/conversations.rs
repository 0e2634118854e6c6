use crate::{
    middleware::RequestContext,
    models::{
        AddItemsRequest, ConversationObject, CreateConversationRequest, DeletedObject, ItemObject,
        ListQuery, ListResponse, SearchItemsQuery, UpdateConversationRequest,
    },
    routes::{api::AppState, common::{ApiError, Json}},
};
use axum::{
    extract::{Query, State},
    Extension,
};
use services::{
    common::SortOrder,
    conversations::{service::MAX_ITEMS_PER_BATCH, ConversationError, NewItem},
};
use tracing::debug;

fn item_list(items: &[services::conversations::Item], has_more: bool) -> ListResponse<ItemObject> {
    let data: Vec<ItemObject> = items.iter().map(ItemObject::from).collect();
    ListResponse::new(data, has_more, |i| &i.id)
}

/// Creates a private conversation, optionally seeded with items. Seed items
/// are validated before the conversation exists.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<CreateConversationRequest>,
) -> Result<Json<ConversationObject>, ApiError> {
    let user_id = context.user().id;
    let items: Vec<NewItem> = request
        .items
        .unwrap_or_default()
        .into_iter()
        .map(NewItem::from)
        .collect();
    if items.len() > MAX_ITEMS_PER_BATCH {
        return Err(ConversationError::InvalidRequest(format!(
            "at most {MAX_ITEMS_PER_BATCH} items can be added at once, got {}",
            items.len()
        ))
        .into());
    }
    items.iter().try_for_each(NewItem::validate)?;

    let conversation = state
        .conversation_service
        .create(
            user_id,
            request.title,
            true,
            request.metadata.unwrap_or_default(),
        )
        .await?;
    if !items.is_empty() {
        let added = state
            .conversation_service
            .add_multiple_items(&conversation, user_id, items)
            .await?;
        debug!(conversation_id = %conversation.public_id, count = added.len(), "Seeded conversation");
    }
    Ok(Json(ConversationObject::from(&conversation)))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse<ConversationObject>>, ApiError> {
    let user_id = context.user().id;
    let service = &state.conversation_service;
    let mut pagination = query.pagination(SortOrder::Desc)?;
    if let Some(after) = query.after.as_deref() {
        pagination.after = Some(service.conversation_cursor(user_id, after).await?);
    }
    if let Some(before) = query.before.as_deref() {
        pagination.before = Some(service.conversation_cursor(user_id, before).await?);
    }

    let page = service.list(user_id, pagination).await?;
    let data: Vec<ConversationObject> = page.items.iter().map(ConversationObject::from).collect();
    Ok(Json(ListResponse::new(data, page.has_more, |c| &c.id)))
}

pub async fn get_conversation(
    Extension(context): Extension<RequestContext>,
) -> Result<Json<ConversationObject>, ApiError> {
    Ok(Json(ConversationObject::from(context.conversation()?)))
}

pub async fn update_conversation(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<UpdateConversationRequest>,
) -> Result<Json<ConversationObject>, ApiError> {
    let conversation = state
        .conversation_service
        .update(
            &context.conversation()?.public_id,
            context.user().id,
            request.title,
            request.metadata,
        )
        .await?;
    Ok(Json(ConversationObject::from(&conversation)))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
) -> Result<Json<DeletedObject>, ApiError> {
    let conversation = state
        .conversation_service
        .delete(&context.conversation()?.public_id, context.user().id)
        .await?;
    Ok(Json(DeletedObject {
        id: conversation.public_id,
        object: "conversation.deleted".to_string(),
        deleted: true,
    }))
}

pub async fn list_items(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse<ItemObject>>, ApiError> {
    let conversation = context.conversation()?;
    let service = &state.conversation_service;
    let mut pagination = query.pagination(SortOrder::Asc)?;
    if let Some(after) = query.after.as_deref() {
        pagination.after = Some(service.item_cursor(conversation, after).await?);
    }
    if let Some(before) = query.before.as_deref() {
        pagination.before = Some(service.item_cursor(conversation, before).await?);
    }

    let page = service
        .list_items(conversation, context.user().id, pagination)
        .await?;
    Ok(Json(item_list(&page.items, page.has_more)))
}

pub async fn add_items(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<AddItemsRequest>,
) -> Result<Json<ListResponse<ItemObject>>, ApiError> {
    let items = request.items.into_iter().map(NewItem::from).collect();
    let added = state
        .conversation_service
        .add_multiple_items(context.conversation()?, context.user().id, items)
        .await?;
    Ok(Json(item_list(&added, false)))
}

pub async fn search_items(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Query(query): Query<SearchItemsQuery>,
) -> Result<Json<ListResponse<ItemObject>>, ApiError> {
    let items = state
        .conversation_service
        .search_items(context.conversation()?, context.user().id, &query.query)
        .await?;
    Ok(Json(item_list(&items, false)))
}

pub async fn get_item(
    Extension(context): Extension<RequestContext>,
) -> Result<Json<ItemObject>, ApiError> {
    Ok(Json(ItemObject::from(context.item()?)))
}

/// Removes the item and returns the conversation it belonged to.
pub async fn delete_item(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
) -> Result<Json<ConversationObject>, ApiError> {
    let conversation = state
        .conversation_service
        .delete_item(
            context.conversation()?,
            &context.item()?.public_id,
            context.user().id,
        )
        .await?;
    Ok(Json(ConversationObject::from(&conversation)))
}
