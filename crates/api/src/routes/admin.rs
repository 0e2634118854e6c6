use crate::{
    models::CacheInvalidationResponse,
    routes::{
        api::AppState,
        common::{ApiError, Json},
    },
};
use axum::{extract::State, http::StatusCode};
use tracing::{error, info};

/// `POST /v1/admin/cache/invalidate`: drops every cached record. Held locks
/// survive.
pub async fn invalidate_cache(
    State(state): State<AppState>,
) -> Result<Json<CacheInvalidationResponse>, ApiError> {
    let removed = state.cache.invalidate_all().await.map_err(|e| {
        error!(error = %e, "Cache invalidation failed");
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Failed to invalidate cache",
        )
    })?;
    info!(removed, backend = state.cache.backend_name(), "Cache invalidated");
    Ok(Json(CacheInvalidationResponse {
        object: "cache.invalidation".to_string(),
        status: "ok".to_string(),
        message: "cache invalidated".to_string(),
        removed,
    }))
}
