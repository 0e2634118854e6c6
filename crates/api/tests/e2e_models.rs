mod common;

use api::models::{CacheInvalidationResponse, ModelsResponse, ProviderSummariesResponse};
use common::*;
use httpmock::prelude::*;
use serde_json::{json, Value};
use services::providers::{ProviderType, ProviderVendor};

#[tokio::test]
async fn test_plain_chat_completion() {
    let ctx = setup_test_server().await;
    mock_jan_models(&ctx.upstream, &[TEST_MODEL]).await;
    let upstream = ctx
        .upstream
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .json_body_partial(r#"{"stream":false}"#);
            then.status(200).json_body(chat_completion_body("Plain.", None, "stop"));
        })
        .await;
    let token = guest_token(&ctx.server).await;

    let response = ctx
        .server
        .post("/v1/chat/completions")
        .add_header("Authorization", format!("Bearer {token}"))
        .json(&json!({
            "model": TEST_MODEL,
            "messages": [{"role": "user", "content": "hello"}]
        }))
        .await;
    assert_eq!(response.status_code(), 200, "{}", response.text());
    upstream.assert_async().await;
    let body = response.json::<Value>();
    assert_eq!(body["id"], "chatcmpl-upstream");
    assert_eq!(body["choices"][0]["message"]["content"], "Plain.");
    assert!(body.get("metadata").is_none());

    // No conversation is created behind the caller's back
    let response = ctx
        .server
        .get("/jan/v1/conversations")
        .add_header("Authorization", format!("Bearer {token}"))
        .await;
    assert!(response.json::<Value>()["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_plain_chat_completion_stream() {
    let ctx = setup_test_server().await;
    mock_jan_models(&ctx.upstream, &[TEST_MODEL]).await;
    let body = sse_body(&[content_chunk("Hel", None), content_chunk("lo", Some("stop"))]);
    ctx.upstream
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(body);
        })
        .await;
    let token = guest_token(&ctx.server).await;

    let response = ctx
        .server
        .post("/v1/chat/completions")
        .add_header("Authorization", format!("Bearer {token}"))
        .json(&json!({
            "model": TEST_MODEL,
            "messages": [{"role": "user", "content": "hello"}],
            "stream": true
        }))
        .await;
    assert_eq!(response.status_code(), 200, "{}", response.text());
    assert_eq!(response.header("content-type"), "text/event-stream");
    assert_eq!(response.header("access-control-allow-origin"), "*");

    let text = response.text();
    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .collect();
    assert_eq!(data.len(), 3);
    assert_eq!(data[2], "[DONE]");
    let first: Value = serde_json::from_str(data[0]).unwrap();
    assert_eq!(first["choices"][0]["delta"]["content"], "Hel");
}

#[tokio::test]
async fn test_plain_chat_completion_requires_messages() {
    let ctx = setup_test_server().await;
    let token = guest_token(&ctx.server).await;

    let response = ctx
        .server
        .post("/v1/chat/completions")
        .add_header("Authorization", format!("Bearer {token}"))
        .json(&json!({"model": TEST_MODEL, "messages": []}))
        .await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(error_of(&response).r#type, "invalid_request_error");

    let response = ctx
        .server
        .post("/v1/chat/completions")
        .json(&json!({"model": TEST_MODEL, "messages": [{"role": "user", "content": "hi"}]}))
        .await;
    assert_eq!(response.status_code(), 401);
}

#[tokio::test]
async fn test_models_and_providers_catalogue() {
    let ctx = setup_test_server().await;
    mock_jan_models(&ctx.upstream, &[TEST_MODEL, "jan-nano"]).await;
    ctx.upstream
        .mock_async(|when, then| {
            when.method(GET).path("/openrouter/models");
            then.status(200).json_body(json!({
                "object": "list",
                "data": [{"id": "openai/gpt-4o-mini", "object": "model", "created": 1_700_000_000, "owned_by": "openai"}]
            }));
        })
        .await;
    let owner = guest_token(&ctx.server).await;
    create_organization(&ctx.server, &owner, "Acme").await;
    let response = ctx
        .server
        .post("/v1/organization/providers")
        .add_header("Authorization", format!("Bearer {owner}"))
        .json(&json!({
            "name": "OpenRouter",
            "vendor": "openrouter",
            "base_url": ctx.upstream.url("/openrouter"),
            "api_key": "sk-or-v1-abcdef123456"
        }))
        .await;
    assert_eq!(response.status_code(), 201, "{}", response.text());

    let response = ctx
        .server
        .get("/v1/models")
        .add_header("Authorization", format!("Bearer {owner}"))
        .await;
    assert_eq!(response.status_code(), 200, "{}", response.text());
    let models = response.json::<ModelsResponse>();
    assert_eq!(models.object, "list");
    assert!(models.data.iter().any(|m| m.id == "jan-nano"));
    assert!(models.data.iter().any(|m| m.id == "openai/gpt-4o-mini"));

    let response = ctx
        .server
        .get("/v1/models/providers")
        .add_header("Authorization", format!("Bearer {owner}"))
        .await;
    assert_eq!(response.status_code(), 200, "{}", response.text());
    assert!(!response.text().contains("sk-or-v1-abcdef123456"));
    assert!(!response.text().contains("base_url"));
    let providers = response.json::<ProviderSummariesResponse>();
    let openrouter = providers
        .data
        .iter()
        .find(|p| p.vendor == ProviderVendor::OpenRouter)
        .expect("organization provider listed");
    assert_eq!(openrouter.r#type, ProviderType::Organization);
    assert_eq!(openrouter.api_key_hint.as_deref(), Some("***3456"));
    assert!(providers.data.iter().any(|p| p.vendor == ProviderVendor::Jan));

    // Without an organization only the built-in provider is visible
    let stranger = guest_token(&ctx.server).await;
    let response = ctx
        .server
        .get("/v1/models/providers")
        .add_header("Authorization", format!("Bearer {stranger}"))
        .await;
    let providers = response.json::<ProviderSummariesResponse>();
    assert!(providers.data.iter().all(|p| p.vendor == ProviderVendor::Jan));
}

#[tokio::test]
async fn test_cache_invalidation_is_owner_only() {
    let ctx = setup_test_server().await;
    let listing = ctx
        .upstream
        .mock_async(|when, then| {
            when.method(GET).path("/v1/models");
            then.status(200).json_body(json!({
                "object": "list",
                "data": [{"id": TEST_MODEL, "object": "model", "created": 1_700_000_000, "owned_by": "jan"}]
            }));
        })
        .await;
    let owner = guest_token(&ctx.server).await;
    let reader = guest_token(&ctx.server).await;
    let reader_user = current_user(&ctx.server, &reader).await;
    create_organization(&ctx.server, &owner, "Acme").await;
    ctx.server
        .post("/v1/organization/members")
        .add_header("Authorization", format!("Bearer {owner}"))
        .json(&json!({"user_id": reader_user.id}))
        .await;

    for _ in 0..2 {
        let response = ctx
            .server
            .get("/v1/models")
            .add_header("Authorization", format!("Bearer {owner}"))
            .await;
        assert_eq!(response.status_code(), 200, "{}", response.text());
    }
    let cached_hits = listing.hits_async().await;

    let response = ctx
        .server
        .post("/v1/admin/cache/invalidate")
        .add_header("Authorization", format!("Bearer {reader}"))
        .await;
    assert_eq!(response.status_code(), 403);

    let response = ctx
        .server
        .post("/v1/admin/cache/invalidate")
        .add_header("Authorization", format!("Bearer {owner}"))
        .await;
    assert_eq!(response.status_code(), 200, "{}", response.text());
    let invalidated = response.json::<CacheInvalidationResponse>();
    assert_eq!(invalidated.object, "cache.invalidation");
    assert_eq!(invalidated.status, "ok");
    assert!(invalidated.removed > 0);

    // The next listing goes back to the upstream
    let response = ctx
        .server
        .get("/v1/models")
        .add_header("Authorization", format!("Bearer {owner}"))
        .await;
    assert_eq!(response.status_code(), 200);
    assert!(listing.hits_async().await > cached_hits);
}
