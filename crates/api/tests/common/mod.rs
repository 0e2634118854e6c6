#![allow(dead_code)]

use api::{build_app, init_services, models::*};
use axum_test::TestServer;
use cache::MemoryCache;
use config::{
    ApiConfig, AuthConfig, CacheConfig, CacheKind, LoggingConfig, ProvidersConfig, ServerConfig,
};
use database::Database;
use httpmock::prelude::*;
use inference_providers::OpenAiCompatibleBackend;
use serde_json::{json, Value};
use std::sync::Arc;

pub const TEST_MODEL: &str = "jan-v1-4b";
pub const MASTER_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

/// A running app, its storage, and the stand-in for the Jan upstream.
pub struct TestContext {
    pub server: TestServer,
    pub database: Arc<Database>,
    pub upstream: MockServer,
}

pub fn test_config(upstream: &MockServer) -> ApiConfig {
    ApiConfig {
        server: ServerConfig {
            request_timeout_secs: 10,
            ..Default::default()
        },
        logging: LoggingConfig::default(),
        auth: AuthConfig {
            jwt_secret: "test-jwt-secret".to_string(),
            api_key_secret: "test-api-key-secret".to_string(),
            access_token_ttl_secs: 900,
            refresh_token_ttl_secs: 7 * 24 * 60 * 60,
            refresh_cookie_secure: false,
        },
        cache: CacheConfig {
            kind: CacheKind::Memory,
            ..Default::default()
        },
        providers: ProvidersConfig {
            master_key: MASTER_KEY.to_string(),
            jan_base_url: upstream.url("/v1"),
            jan_api_key: None,
            models_ttl_secs: 600,
            provider_ttl_secs: 60,
            aggregation_concurrency: 4,
        },
    }
}

pub async fn setup_test_server() -> TestContext {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::level_filters::LevelFilter::DEBUG)
        .try_init();

    let upstream = MockServer::start_async().await;
    let config = test_config(&upstream);
    let database = Arc::new(Database::new());
    let backend = Arc::new(OpenAiCompatibleBackend::new().unwrap());

    let app_state = init_services(&database, Arc::new(MemoryCache::new()), backend, &config).unwrap();
    let app = build_app(app_state);

    TestContext {
        server: TestServer::new(app).unwrap(),
        database,
        upstream,
    }
}

/// Serves `GET /v1/models` on the Jan upstream.
pub async fn mock_jan_models(upstream: &MockServer, ids: &[&str]) {
    let data: Vec<Value> = ids
        .iter()
        .map(|id| json!({"id": id, "object": "model", "created": 1_700_000_000, "owned_by": "jan"}))
        .collect();
    upstream
        .mock_async(|when, then| {
            when.method(GET).path("/v1/models");
            then.status(200).json_body(json!({"object": "list", "data": data}));
        })
        .await;
}

pub fn chat_completion_body(content: &str, reasoning: Option<&str>, finish_reason: &str) -> Value {
    let mut message = json!({"role": "assistant", "content": content});
    if let Some(reasoning) = reasoning {
        message["reasoning_content"] = json!(reasoning);
    }
    json!({
        "id": "chatcmpl-upstream",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": TEST_MODEL,
        "choices": [{"index": 0, "message": message, "finish_reason": finish_reason}],
        "usage": {"prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8}
    })
}

/// One `data:` event per chunk, then `[DONE]`.
pub fn sse_body(chunks: &[Value]) -> String {
    let mut body = String::new();
    for chunk in chunks {
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

pub fn content_chunk(content: &str, finish_reason: Option<&str>) -> Value {
    json!({
        "id": "chatcmpl-upstream",
        "object": "chat.completion.chunk",
        "created": 1_700_000_000,
        "model": TEST_MODEL,
        "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": finish_reason}]
    })
}

pub async fn guest_login(server: &TestServer) -> AccessTokenResponse {
    let response = server.post("/v1/auth/guest-login").await;
    assert_eq!(response.status_code(), 200, "guest login failed: {}", response.text());
    response.json::<AccessTokenResponse>()
}

/// Bearer token of a fresh guest user.
pub async fn guest_token(server: &TestServer) -> String {
    guest_login(server).await.access_token
}

pub async fn current_user(server: &TestServer, token: &str) -> UserResponse {
    let response = server
        .get("/v1/auth/me")
        .add_header("Authorization", format!("Bearer {token}"))
        .await;
    assert_eq!(response.status_code(), 200);
    response.json::<UserResponse>()
}

pub async fn create_conversation(server: &TestServer, token: &str, body: Value) -> ConversationObject {
    let response = server
        .post("/jan/v1/conversations")
        .add_header("Authorization", format!("Bearer {token}"))
        .json(&body)
        .await;
    assert_eq!(response.status_code(), 200, "create conversation failed: {}", response.text());
    response.json::<ConversationObject>()
}

/// Creates an organization owned by the token's user.
pub async fn create_organization(server: &TestServer, token: &str, name: &str) -> OrganizationObject {
    let response = server
        .post("/v1/organization")
        .add_header("Authorization", format!("Bearer {token}"))
        .json(&json!({"name": name}))
        .await;
    assert_eq!(response.status_code(), 201, "create organization failed: {}", response.text());
    response.json::<OrganizationObject>()
}

pub fn error_of(response: &axum_test::TestResponse) -> ErrorDetail {
    response.json::<ErrorResponse>().error
}
