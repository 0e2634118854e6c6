mod common;

use api::models::{AccessTokenResponse, ApiKeyObject, CreatedApiKeyResponse, DeletedObject, ListResponse};
use common::*;
use serde_json::json;

fn refresh_cookie_value(response: &axum_test::TestResponse) -> String {
    let header = response.header("set-cookie");
    let cookie = header.to_str().unwrap();
    cookie
        .split(';')
        .next()
        .and_then(|pair| pair.strip_prefix("jan_refresh_token="))
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_guest_login_issues_tokens_and_cookie() {
    let ctx = setup_test_server().await;

    let response = ctx.server.post("/v1/auth/guest-login").await;
    assert_eq!(response.status_code(), 200);

    let cookie = response.header("set-cookie");
    let cookie = cookie.to_str().unwrap();
    assert!(cookie.starts_with("jan_refresh_token="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Strict"));
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains(&format!("Max-Age={}", 7 * 24 * 60 * 60)));

    let tokens = response.json::<AccessTokenResponse>();
    assert_eq!(tokens.object, "access.token");
    assert_eq!(tokens.expires_in, 900);

    let user = current_user(&ctx.server, &tokens.access_token).await;
    assert!(user.id.starts_with("usr_"));
    assert!(user.is_guest);
}

#[tokio::test]
async fn test_refresh_rotates_tokens_for_the_same_user() {
    let ctx = setup_test_server().await;

    let login = ctx.server.post("/v1/auth/guest-login").await;
    let refresh = refresh_cookie_value(&login);
    let original = current_user(&ctx.server, &login.json::<AccessTokenResponse>().access_token).await;

    let response = ctx
        .server
        .get("/v1/auth/refresh-token")
        .add_header("Cookie", format!("jan_refresh_token={refresh}"))
        .await;
    assert_eq!(response.status_code(), 200, "{}", response.text());
    assert!(!refresh_cookie_value(&response).is_empty());

    let refreshed = current_user(&ctx.server, &response.json::<AccessTokenResponse>().access_token).await;
    assert_eq!(refreshed.id, original.id);
}

#[tokio::test]
async fn test_guest_login_with_refresh_cookie_keeps_the_guest() {
    let ctx = setup_test_server().await;

    let login = ctx.server.post("/v1/auth/guest-login").await;
    let refresh = refresh_cookie_value(&login);
    let original = current_user(&ctx.server, &login.json::<AccessTokenResponse>().access_token).await;

    let again = ctx
        .server
        .post("/v1/auth/guest-login")
        .add_header("Cookie", format!("jan_refresh_token={refresh}"))
        .await;
    assert_eq!(again.status_code(), 200);
    let user = current_user(&ctx.server, &again.json::<AccessTokenResponse>().access_token).await;
    assert_eq!(user.id, original.id);
}

#[tokio::test]
async fn test_refresh_requires_cookie() {
    let ctx = setup_test_server().await;

    let response = ctx.server.get("/v1/auth/refresh-token").await;
    assert_eq!(response.status_code(), 401);

    let response = ctx
        .server
        .get("/v1/auth/refresh-token")
        .add_header("Cookie", "jan_refresh_token=garbage")
        .await;
    assert_eq!(response.status_code(), 401);
}

#[tokio::test]
async fn test_access_token_is_not_a_refresh_token() {
    let ctx = setup_test_server().await;
    let token = guest_token(&ctx.server).await;

    let response = ctx
        .server
        .get("/v1/auth/refresh-token")
        .add_header("Cookie", format!("jan_refresh_token={token}"))
        .await;
    assert_eq!(response.status_code(), 401);
}

#[tokio::test]
async fn test_me_rejects_missing_and_invalid_credentials() {
    let ctx = setup_test_server().await;

    let response = ctx.server.get("/v1/auth/me").await;
    assert_eq!(response.status_code(), 401);
    assert_eq!(error_of(&response).r#type, "authentication_error");

    let response = ctx
        .server
        .get("/v1/auth/me")
        .add_header("Authorization", "Bearer not-a-token")
        .await;
    assert_eq!(response.status_code(), 401);

    let response = ctx
        .server
        .get("/v1/auth/me")
        .add_header("Authorization", "Bearer sk-unknownkeyvalue")
        .await;
    assert_eq!(response.status_code(), 401);
}

#[tokio::test]
async fn test_logout_clears_cookie() {
    let ctx = setup_test_server().await;

    let response = ctx.server.post("/v1/auth/logout").await;
    assert_eq!(response.status_code(), 204);
    let cookie = response.header("set-cookie");
    let cookie = cookie.to_str().unwrap();
    assert!(cookie.starts_with("jan_refresh_token=;"));
    assert!(cookie.contains("Max-Age=0"));
}

#[tokio::test]
async fn test_user_api_key_lifecycle() {
    let ctx = setup_test_server().await;
    let token = guest_token(&ctx.server).await;
    let user = current_user(&ctx.server, &token).await;

    let response = ctx
        .server
        .post("/v1/api_keys")
        .add_header("Authorization", format!("Bearer {token}"))
        .json(&json!({"description": "laptop"}))
        .await;
    assert_eq!(response.status_code(), 201, "{}", response.text());
    let created = response.json::<CreatedApiKeyResponse>();
    assert!(created.value.starts_with("sk-"));
    assert!(created.key.id.starts_with("key_"));
    assert_ne!(created.key.redacted_value, created.value);

    // The key authenticates as its owner
    let via_key = current_user(&ctx.server, &created.value).await;
    assert_eq!(via_key.id, user.id);

    let response = ctx
        .server
        .get("/v1/api_keys")
        .add_header("Authorization", format!("Bearer {token}"))
        .await;
    let keys = response.json::<ListResponse<ApiKeyObject>>();
    assert_eq!(keys.data.len(), 1);
    assert_eq!(keys.data[0].description.as_deref(), Some("laptop"));
    assert!(!serde_json::to_string(&keys).unwrap().contains(&created.value));

    let response = ctx
        .server
        .delete(&format!("/v1/api_keys/{}", created.key.id))
        .add_header("Authorization", format!("Bearer {token}"))
        .await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.json::<DeletedObject>().object, "api_key.deleted");

    let response = ctx
        .server
        .get("/v1/auth/me")
        .add_header("Authorization", format!("Bearer {}", created.value))
        .await;
    assert_eq!(response.status_code(), 401);
}

#[tokio::test]
async fn test_api_key_expiry_must_be_in_the_future() {
    let ctx = setup_test_server().await;
    let token = guest_token(&ctx.server).await;

    let response = ctx
        .server
        .post("/v1/api_keys")
        .add_header("Authorization", format!("Bearer {token}"))
        .json(&json!({"expires_at": 1}))
        .await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_healthcheck_reports_cache() {
    let ctx = setup_test_server().await;

    let response = ctx.server.get("/healthcheck").await;
    assert_eq!(response.status_code(), 200);
    let body = response.json::<serde_json::Value>();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cache"], "memory");
}
