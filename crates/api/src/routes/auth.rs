use crate::{
    middleware::RequestContext,
    models::{AccessTokenResponse, UserResponse},
    routes::{api::AppState, common::{ApiError, Json}},
};
use axum::{
    extract::State,
    http::{header::SET_COOKIE, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use axum_extra::TypedHeader;
use headers::Cookie;
use services::auth::{TokenPair, User};
use tracing::{debug, info};

pub const REFRESH_TOKEN_COOKIE: &str = "jan_refresh_token";

fn refresh_cookie(value: &str, max_age_secs: i64, secure: bool) -> String {
    let secure = if secure { " Secure;" } else { "" };
    format!(
        "{REFRESH_TOKEN_COOKIE}={value}; HttpOnly;{secure} SameSite=Strict; Path=/; Max-Age={max_age_secs}"
    )
}

fn token_response(state: &AppState, user: &User, tokens: TokenPair) -> Response {
    debug!(user_id = %user.public_id, "Issued token pair");
    let cookie = refresh_cookie(
        &tokens.refresh_token,
        tokens.refresh_expires_in,
        state.settings.refresh_cookie_secure,
    );
    (
        StatusCode::OK,
        [(SET_COOKIE, cookie)],
        Json(AccessTokenResponse {
            object: "access.token".to_string(),
            access_token: tokens.access_token,
            expires_in: tokens.expires_in,
        }),
    )
        .into_response()
}

/// Registers a guest user, or re-issues tokens for the guest behind a still
/// valid refresh cookie.
pub async fn guest_login(
    State(state): State<AppState>,
    cookies: Option<TypedHeader<Cookie>>,
) -> Result<Response, ApiError> {
    let refresh_token = cookies
        .as_ref()
        .and_then(|TypedHeader(c)| c.get(REFRESH_TOKEN_COOKIE));
    let (user, tokens) = state.auth_service.guest_login(refresh_token).await?;
    Ok(token_response(&state, &user, tokens))
}

/// Rotates the refresh cookie and returns a fresh access token.
pub async fn refresh_token(
    State(state): State<AppState>,
    cookies: Option<TypedHeader<Cookie>>,
) -> Result<Response, ApiError> {
    let refresh_token = cookies
        .as_ref()
        .and_then(|TypedHeader(c)| c.get(REFRESH_TOKEN_COOKIE))
        .ok_or_else(|| ApiError::unauthorized("refresh token cookie is missing"))?;
    let (user, tokens) = state.auth_service.refresh(refresh_token).await?;
    Ok(token_response(&state, &user, tokens))
}

pub async fn current_user(Extension(context): Extension<RequestContext>) -> Json<UserResponse> {
    Json(UserResponse::from(context.user()))
}

pub async fn logout(State(state): State<AppState>) -> Response {
    info!("Cleared refresh cookie");
    (
        StatusCode::NO_CONTENT,
        [(
            SET_COOKIE,
            refresh_cookie("", 0, state.settings.refresh_cookie_secure),
        )],
    )
        .into_response()
}
