use crate::routes::api::AppState;
use axum::{extract::State, http::StatusCode, response::Json as ResponseJson};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok` or `degraded`
    pub status: String,
    pub cache: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Reports process liveness plus cache reachability. No authentication.
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, ResponseJson<HealthResponse>) {
    let backend = state.cache.backend_name();
    let (status, cache) = match state.cache.health_check().await {
        Ok(()) => (StatusCode::OK, backend.to_string()),
        Err(e) => {
            warn!(backend, error = %e, "Cache health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, format!("{backend}: {e}"))
        }
    };
    (
        status,
        ResponseJson(HealthResponse {
            status: if status == StatusCode::OK { "ok" } else { "degraded" }.to_string(),
            cache,
            version: option_env!("CARGO_PKG_VERSION").map(|v| v.to_string()),
        }),
    )
}
