use crate::routes::common::ApiError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Duration;
use tracing::warn;

/// Request deadline, stored as router state for [`timeout_middleware`].
#[derive(Debug, Clone, Copy)]
pub struct RequestDeadline(pub Duration);

/// Fails with 504 when the handler has not produced a response in time.
/// Streaming bodies enforce the same deadline on their own.
pub async fn timeout_middleware(
    State(RequestDeadline(deadline)): State<RequestDeadline>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    match tokio::time::timeout(deadline, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(path = %path, timeout_secs = deadline.as_secs(), "Request deadline exceeded");
            ApiError::timeout(format!(
                "request did not complete within {} seconds",
                deadline.as_secs()
            ))
            .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware::from_fn_with_state, routing::get, Router};
    use tower::ServiceExt;

    fn app(deadline: Duration) -> Router {
        Router::new()
            .route("/fast", get(|| async { "done" }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
            .layer(from_fn_with_state(RequestDeadline(deadline), timeout_middleware))
    }

    #[tokio::test]
    async fn test_passes_through_fast_handlers() {
        let response = app(Duration::from_secs(1))
            .oneshot(Request::builder().uri("/fast").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_slow_handler_times_out() {
        let response = app(Duration::from_millis(50))
            .oneshot(Request::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
