use crate::{
    middleware::RequestContext,
    models::{ApiKeyObject, CreateApiKeyRequest, CreatedApiKeyResponse, DeletedObject, ListResponse},
    routes::{
        api::AppState,
        common::{validate_id, ApiError, Json},
    },
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension,
};
use services::{
    auth::{ApiKey, CreatedApiKey, NewApiKeyRequest},
    id_prefixes::PREFIX_KEY,
};

impl From<CreateApiKeyRequest> for NewApiKeyRequest {
    fn from(request: CreateApiKeyRequest) -> Self {
        Self {
            description: request.description,
            expires_at: request.expires_at,
        }
    }
}

fn created(created: CreatedApiKey) -> CreatedApiKeyResponse {
    CreatedApiKeyResponse {
        key: ApiKeyObject::from(&created.key),
        value: created.plaintext,
    }
}

fn key_list(keys: &[ApiKey]) -> ListResponse<ApiKeyObject> {
    let data: Vec<ApiKeyObject> = keys.iter().map(ApiKeyObject::from).collect();
    ListResponse::new(data, false, |k| &k.id)
}

fn deleted(id: String) -> DeletedObject {
    DeletedObject {
        id,
        object: "api_key.deleted".to_string(),
        deleted: true,
    }
}

pub async fn list_api_keys(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
) -> Result<Json<ListResponse<ApiKeyObject>>, ApiError> {
    let keys = state.api_key_service.list_user_keys(context.user()).await?;
    Ok(Json(key_list(&keys)))
}

pub async fn create_api_key(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<CreatedApiKeyResponse>), ApiError> {
    let key = state
        .api_key_service
        .create_user_key(context.user(), request.into())
        .await?;
    Ok((StatusCode::CREATED, Json(created(key))))
}

pub async fn delete_api_key(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(key_id): Path<String>,
) -> Result<Json<DeletedObject>, ApiError> {
    validate_id(&key_id, PREFIX_KEY, "key_id")?;
    state
        .api_key_service
        .delete_user_key(context.user(), &key_id)
        .await?;
    Ok(Json(deleted(key_id)))
}

pub async fn list_admin_api_keys(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
) -> Result<Json<ListResponse<ApiKeyObject>>, ApiError> {
    let keys = state
        .api_key_service
        .list_admin_keys(context.organization()?.id)
        .await?;
    Ok(Json(key_list(&keys)))
}

pub async fn create_admin_api_key(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<CreatedApiKeyResponse>), ApiError> {
    let key = state
        .api_key_service
        .create_admin_key(context.user(), context.organization()?.id, request.into())
        .await?;
    Ok((StatusCode::CREATED, Json(created(key))))
}

pub async fn delete_admin_api_key(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(key_id): Path<String>,
) -> Result<Json<DeletedObject>, ApiError> {
    validate_id(&key_id, PREFIX_KEY, "key_id")?;
    state
        .api_key_service
        .delete_admin_key(context.organization()?.id, &key_id)
        .await?;
    Ok(Json(deleted(key_id)))
}
