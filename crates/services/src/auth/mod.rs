pub mod api_keys;
pub mod ports;

pub use api_keys::{ApiKeyService, CreatedApiKey, NewApiKeyRequest};
pub use ports::*;

use crate::{
    common::{internal, now_unix, InternalFailure},
    crypto::ApiKeyHasher,
    id_prefixes::{generate_public_id, API_KEY_PREFIX, PREFIX_USR},
};
use cache::Cache;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// How long a resolved user stays cached by public ID.
const USER_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    #[default]
    Access,
    Refresh,
}

/// Signed user claim carried by access and refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserClaims {
    pub public_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub exp: i64,
    pub sub: String,
    #[serde(default)]
    pub token_use: TokenUse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub refresh_token: String,
    /// Refresh token lifetime in seconds
    pub refresh_expires_in: i64,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
}

impl From<&config::AuthConfig> for AuthSettings {
    fn from(config: &config::AuthConfig) -> Self {
        Self {
            jwt_secret: config.jwt_secret.clone(),
            access_token_ttl_secs: config.access_token_ttl_secs,
            refresh_token_ttl_secs: config.refresh_token_ttl_secs,
        }
    }
}

/// Bearer credential resolution and token issuance.
pub struct AuthService {
    settings: AuthSettings,
    hasher: ApiKeyHasher,
    users: Arc<dyn UserRepository>,
    api_keys: Arc<dyn ApiKeyRepository>,
    cache: Arc<dyn Cache>,
}

impl AuthService {
    pub fn new(
        settings: AuthSettings,
        hasher: ApiKeyHasher,
        users: Arc<dyn UserRepository>,
        api_keys: Arc<dyn ApiKeyRepository>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self {
            settings,
            hasher,
            users,
            api_keys,
            cache,
        }
    }

    pub fn refresh_token_ttl_secs(&self) -> i64 {
        self.settings.refresh_token_ttl_secs
    }

    fn sign(&self, user: &User, token_use: TokenUse, ttl_secs: i64) -> Result<String, AuthError> {
        let email = user.email.clone().unwrap_or_default();
        let claims = UserClaims {
            public_id: user.public_id.clone(),
            sub: if email.is_empty() {
                user.public_id.clone()
            } else {
                email.clone()
            },
            email,
            name: user.name.clone().unwrap_or_default(),
            exp: now_unix() + ttl_secs,
            token_use,
        };

        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.settings.jwt_secret.as_bytes()),
        )
        .map_err(|e| {
            AuthError::Internal(InternalFailure::new(
                "79373f8e-d80e-489c-95ba-9e6099ef7539",
                format!("Failed to sign token: {e}"),
            ))
        })
    }

    /// Issues a short-lived access token and a long-lived refresh token.
    pub fn issue_token_pair(&self, user: &User) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access_token: self.sign(user, TokenUse::Access, self.settings.access_token_ttl_secs)?,
            expires_in: self.settings.access_token_ttl_secs,
            refresh_token: self.sign(
                user,
                TokenUse::Refresh,
                self.settings.refresh_token_ttl_secs,
            )?,
            refresh_expires_in: self.settings.refresh_token_ttl_secs,
        })
    }

    /// Validates signature, expiry and intended use of a token.
    pub fn verify_token(&self, token: &str, expected: TokenUse) -> Result<UserClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = jsonwebtoken::decode::<UserClaims>(
            token,
            &DecodingKey::from_secret(self.settings.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        if data.claims.token_use != expected {
            return Err(AuthError::InvalidToken("token used for the wrong purpose".to_string()));
        }
        Ok(data.claims)
    }

    /// Resolves an `Authorization` header value to a principal.
    ///
    /// Signed user claims are tried first; tokens carrying the API key prefix
    /// are then hashed and looked up. A key is accepted only when it is
    /// enabled, unexpired and of a type `scope` allows.
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        scope: CredentialScope,
    ) -> Result<Principal, AuthError> {
        let token = authorization
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingCredentials)?;

        if !token.starts_with(API_KEY_PREFIX) {
            let claims = self.verify_token(token, TokenUse::Access)?;
            return Ok(Principal::UserToken {
                public_id: claims.public_id,
            });
        }

        let key_hash = self
            .hasher
            .hash(token)
            .map_err(internal("5f3b7c2e-93a4-4d1e-b0a2-8e61c4d7f905", "Failed to hash API key"))?;
        let key = self
            .api_keys
            .find_by_hash(&key_hash)
            .await
            .map_err(internal("c8d0a5f1-2e7b-4b39-9a64-0f5e1d2c7b83", "Failed to look up API key"))?
            .ok_or(AuthError::InvalidApiKey)?;

        let now = now_unix();
        if !key.is_active(now) || !scope.accepts(key.key_type) {
            debug!(key_id = %key.public_id, "Rejected inactive or out-of-scope API key");
            return Err(AuthError::InvalidApiKey);
        }

        if let Err(e) = self.api_keys.touch_last_used(key.id, now).await {
            warn!(key_id = %key.public_id, error = %e, "Failed to record API key usage");
        }

        Ok(Principal::ApiKey {
            public_id: key.owner_public_id.clone(),
            key: Box::new(key),
        })
    }

    /// Loads the user behind a public ID, failing when none is registered.
    /// Only hits are cached so a user registered later is never masked.
    pub async fn registered_user(&self, public_id: &str) -> Result<User, AuthError> {
        let key = cache::keys::user_by_public_id(public_id);
        let cached = match self.cache.get::<User>(&key).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(key = %key, error = %e, "User cache read failed");
                None
            }
        };

        let user = match cached {
            Some(user) => user,
            None => {
                let user = self
                    .users
                    .find_by_public_id(public_id)
                    .await
                    .map_err(internal("2a9e6d40-71c3-4f85-b8d2-c93e0a4f6b17", "Failed to load user"))?
                    .ok_or(AuthError::UserNotRegistered)?;
                if let Err(e) = self.cache.set(&key, &user, USER_CACHE_TTL).await {
                    warn!(key = %key, error = %e, "Failed to cache user");
                }
                user
            }
        };

        if !user.enabled {
            return Err(AuthError::UserDisabled);
        }
        Ok(user)
    }

    /// Creates a guest user, or reuses the user behind a still-valid refresh
    /// token, and issues a fresh token pair.
    pub async fn guest_login(
        &self,
        refresh_token: Option<&str>,
    ) -> Result<(User, TokenPair), AuthError> {
        if let Some(claims) = refresh_token.and_then(|t| self.verify_token(t, TokenUse::Refresh).ok()) {
            if let Ok(user) = self.registered_user(&claims.public_id).await {
                let tokens = self.issue_token_pair(&user)?;
                return Ok((user, tokens));
            }
        }

        let public_id = generate_public_id(PREFIX_USR)
            .map_err(internal("9576b6ba-fcc6-4bd2-b13a-33d59d6a71f1", "Failed to generate user ID"))?;
        let tag = public_id
            .trim_start_matches("usr_")
            .to_ascii_uppercase();
        let now = now_unix();
        let user = self
            .users
            .create(User {
                id: 0,
                public_id,
                email: Some(format!("Jan-{tag}@jan.ai")),
                name: Some(format!("Jan-{tag}")),
                enabled: true,
                is_guest: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .map_err(internal("0b7e3f12-6a4d-4c8e-9d21-5e8f7a3c1b60", "Failed to register guest user"))?;

        info!(user_id = %user.public_id, "Registered guest user");
        let tokens = self.issue_token_pair(&user)?;
        Ok((user, tokens))
    }

    /// Verifies a refresh token and rotates the pair.
    pub async fn refresh(&self, refresh_token: &str) -> Result<(User, TokenPair), AuthError> {
        let claims = self.verify_token(refresh_token, TokenUse::Refresh)?;
        let user = self.registered_user(&claims.public_id).await?;
        let tokens = self.issue_token_pair(&user)?;
        Ok((user, tokens))
    }

    /// Enables or disables a user. The cached copy is dropped so the change
    /// applies to the very next request.
    pub async fn set_user_enabled(&self, public_id: &str, enabled: bool) -> Result<User, AuthError> {
        let mut user = self
            .users
            .find_by_public_id(public_id)
            .await
            .map_err(internal("c41f8a2e-93b7-4d06-a5e1-7b2d9c0f6e38", "Failed to load user"))?
            .ok_or(AuthError::UserNotRegistered)?;
        user.enabled = enabled;
        user.updated_at = now_unix();
        let user = self
            .users
            .update(user)
            .await
            .map_err(internal("8d27b5c9-1e4a-4f63-b0d8-3a6e9f1c7b52", "Failed to update user"))?;

        let key = cache::keys::user_by_public_id(public_id);
        if let Err(e) = self.cache.unlink(&key).await {
            warn!(key = %key, error = %e, "Failed to drop cached user, change applies on expiry");
        }
        info!(user_id = %public_id, enabled, "Updated user status");
        Ok(user)
    }
}
