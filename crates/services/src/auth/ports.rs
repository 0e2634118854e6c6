use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::{InternalFailure, RepositoryError};

#[cfg(any(test, feature = "test-mocks"))]
use mockall::automock;

// Domain models
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub public_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub enabled: bool,
    pub is_guest: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyType {
    User,
    Admin,
    Ephemeral,
}

impl ApiKeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKeyType::User => "user",
            ApiKeyType::Admin => "admin",
            ApiKeyType::Ephemeral => "ephemeral",
        }
    }
}

/// API key record. The plaintext key is never stored; lookups go through
/// `key_hash`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiKey {
    pub id: i64,
    pub public_id: String,
    pub key_hash: String,
    /// e.g. `sk-…ab`
    pub plaintext_hint: String,
    pub key_type: ApiKeyType,
    pub owner_public_id: String,
    pub organization_id: Option<i64>,
    pub description: Option<String>,
    pub enabled: bool,
    pub expires_at: Option<i64>,
    pub last_used_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ApiKey {
    /// Enabled and either without expiry or expiring after `now`.
    pub fn is_active(&self, now: i64) -> bool {
        self.enabled && self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiKeyFilter {
    pub owner_public_id: Option<String>,
    pub organization_id: Option<i64>,
    pub key_type: Option<ApiKeyType>,
}

impl ApiKeyFilter {
    pub fn matches(&self, key: &ApiKey) -> bool {
        self.owner_public_id
            .as_ref()
            .is_none_or(|owner| owner == &key.owner_public_id)
            && self
                .organization_id
                .is_none_or(|org| key.organization_id == Some(org))
            && self.key_type.is_none_or(|t| t == key.key_type)
    }
}

/// Which credential types an endpoint accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialScope {
    /// User tokens plus `user` and `ephemeral` API keys
    EndUser,
    /// User tokens plus `admin` API keys
    Admin,
}

impl CredentialScope {
    pub fn accepts(&self, key_type: ApiKeyType) -> bool {
        match self {
            CredentialScope::EndUser => {
                matches!(key_type, ApiKeyType::User | ApiKeyType::Ephemeral)
            }
            CredentialScope::Admin => key_type == ApiKeyType::Admin,
        }
    }
}

/// Who is calling, as established from the bearer credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    UserToken { public_id: String },
    ApiKey { public_id: String, key: Box<ApiKey> },
}

impl Principal {
    pub fn user_public_id(&self) -> &str {
        match self {
            Principal::UserToken { public_id } | Principal::ApiKey { public_id, .. } => public_id,
        }
    }

    pub fn api_key(&self) -> Option<&ApiKey> {
        match self {
            Principal::ApiKey { key, .. } => Some(key),
            Principal::UserToken { .. } => None,
        }
    }
}

// Error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing or malformed Authorization header")]
    MissingCredentials,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Invalid or expired API key")]
    InvalidApiKey,

    #[error("User is not registered")]
    UserNotRegistered,

    #[error("User is disabled")]
    UserDisabled,

    #[error(transparent)]
    Internal(#[from] InternalFailure),
}

#[derive(Debug, thiserror::Error)]
pub enum ApiKeyError {
    #[error("API key not found")]
    NotFound,

    #[error("Invalid API key request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Internal(#[from] InternalFailure),
}

// Repository traits
#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Persists a new user; `id` is assigned by the repository.
    async fn create(&self, user: User) -> Result<User, RepositoryError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, RepositoryError>;

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<User>, RepositoryError>;

    async fn update(&self, user: User) -> Result<User, RepositoryError>;
}

#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    /// Persists a new key; `id` is assigned by the repository.
    async fn create(&self, key: ApiKey) -> Result<ApiKey, RepositoryError>;

    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, RepositoryError>;

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<ApiKey>, RepositoryError>;

    /// Keys matching `filter`, newest first.
    async fn find_by_filter(&self, filter: ApiKeyFilter) -> Result<Vec<ApiKey>, RepositoryError>;

    async fn touch_last_used(&self, id: i64, at: i64) -> Result<(), RepositoryError>;

    async fn delete(&self, id: i64) -> Result<(), RepositoryError>;
}
