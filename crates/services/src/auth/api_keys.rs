use super::ports::{ApiKey, ApiKeyError, ApiKeyFilter, ApiKeyRepository, ApiKeyType, User};
use crate::{
    common::{internal, now_unix},
    crypto::ApiKeyHasher,
    id_prefixes::{generate_api_key, generate_public_id, PREFIX_KEY},
};
use std::sync::Arc;
use tracing::info;

const MAX_DESCRIPTION_LEN: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct NewApiKeyRequest {
    pub description: Option<String>,
    pub expires_at: Option<i64>,
}

/// A freshly created key. `plaintext` is shown to the caller exactly once.
#[derive(Debug, Clone)]
pub struct CreatedApiKey {
    pub key: ApiKey,
    pub plaintext: String,
}

/// `sk-…` plus the last two characters.
fn plaintext_hint(plaintext: &str) -> String {
    let tail: String = plaintext
        .chars()
        .rev()
        .take(2)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("sk-…{tail}")
}

pub struct ApiKeyService {
    repository: Arc<dyn ApiKeyRepository>,
    hasher: ApiKeyHasher,
}

impl ApiKeyService {
    pub fn new(repository: Arc<dyn ApiKeyRepository>, hasher: ApiKeyHasher) -> Self {
        Self { repository, hasher }
    }

    async fn create(
        &self,
        owner: &User,
        key_type: ApiKeyType,
        organization_id: Option<i64>,
        request: NewApiKeyRequest,
    ) -> Result<CreatedApiKey, ApiKeyError> {
        let now = now_unix();
        if request.expires_at.is_some_and(|at| at <= now) {
            return Err(ApiKeyError::InvalidRequest(
                "expires_at must be in the future".to_string(),
            ));
        }
        if request
            .description
            .as_ref()
            .is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN)
        {
            return Err(ApiKeyError::InvalidRequest(format!(
                "description must be at most {MAX_DESCRIPTION_LEN} bytes"
            )));
        }

        let plaintext = generate_api_key()
            .map_err(internal("4e1d9a7b-3c52-4f06-8b1e-d27a9c5e0f34", "Failed to generate API key"))?;
        let key_hash = self
            .hasher
            .hash(&plaintext)
            .map_err(internal("a7c3e591-0d4b-4e2f-96a8-1b5f3d7e9c20", "Failed to hash API key"))?;
        let public_id = generate_public_id(PREFIX_KEY)
            .map_err(internal("d5b2f8e0-6a1c-4937-8e4d-0c9a2b7f1e53", "Failed to generate key ID"))?;

        let key = self
            .repository
            .create(ApiKey {
                id: 0,
                public_id,
                key_hash,
                plaintext_hint: plaintext_hint(&plaintext),
                key_type,
                owner_public_id: owner.public_id.clone(),
                organization_id,
                description: request.description,
                enabled: true,
                expires_at: request.expires_at,
                last_used_at: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .map_err(internal("f08e4c7a-2b9d-4a15-b3e6-7d1c0f5a8e92", "Failed to store API key"))?;

        info!(key_id = %key.public_id, key_type = key_type.as_str(), "Created API key");
        Ok(CreatedApiKey { key, plaintext })
    }

    pub async fn create_user_key(
        &self,
        owner: &User,
        request: NewApiKeyRequest,
    ) -> Result<CreatedApiKey, ApiKeyError> {
        self.create(owner, ApiKeyType::User, None, request).await
    }

    pub async fn create_admin_key(
        &self,
        owner: &User,
        organization_id: i64,
        request: NewApiKeyRequest,
    ) -> Result<CreatedApiKey, ApiKeyError> {
        self.create(owner, ApiKeyType::Admin, Some(organization_id), request)
            .await
    }

    pub async fn list_user_keys(&self, owner: &User) -> Result<Vec<ApiKey>, ApiKeyError> {
        let keys = self
            .repository
            .find_by_filter(ApiKeyFilter {
                owner_public_id: Some(owner.public_id.clone()),
                key_type: Some(ApiKeyType::User),
                ..Default::default()
            })
            .await
            .map_err(internal("63b9d0e4-8f2a-4c71-a5e3-9e0d4b6c2f18", "Failed to list API keys"))?;
        Ok(keys)
    }

    pub async fn list_admin_keys(&self, organization_id: i64) -> Result<Vec<ApiKey>, ApiKeyError> {
        let keys = self
            .repository
            .find_by_filter(ApiKeyFilter {
                organization_id: Some(organization_id),
                key_type: Some(ApiKeyType::Admin),
                ..Default::default()
            })
            .await
            .map_err(internal("b2e7a4c9-1d06-4f83-9c5b-3a8e6d0f7b41", "Failed to list admin keys"))?;
        Ok(keys)
    }

    async fn delete_matching(
        &self,
        public_id: &str,
        filter: ApiKeyFilter,
    ) -> Result<(), ApiKeyError> {
        let key = self
            .repository
            .find_by_public_id(public_id)
            .await
            .map_err(internal("7f4a1c8e-5b3d-4e92-a0f6-2d9c7b1e5a36", "Failed to load API key"))?
            .filter(|key| filter.matches(key))
            .ok_or(ApiKeyError::NotFound)?;

        self.repository
            .delete(key.id)
            .await
            .map_err(internal("c1e9b5d3-7a2f-4068-8d4e-6f0b3a9c1d75", "Failed to delete API key"))?;
        info!(key_id = %key.public_id, "Deleted API key");
        Ok(())
    }

    pub async fn delete_user_key(&self, owner: &User, public_id: &str) -> Result<(), ApiKeyError> {
        self.delete_matching(
            public_id,
            ApiKeyFilter {
                owner_public_id: Some(owner.public_id.clone()),
                key_type: Some(ApiKeyType::User),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn delete_admin_key(
        &self,
        organization_id: i64,
        public_id: &str,
    ) -> Result<(), ApiKeyError> {
        self.delete_matching(
            public_id,
            ApiKeyFilter {
                organization_id: Some(organization_id),
                key_type: Some(ApiKeyType::Admin),
                ..Default::default()
            },
        )
        .await
    }
}
