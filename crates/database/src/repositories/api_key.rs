use async_trait::async_trait;
use services::{
    auth::ports::{ApiKey, ApiKeyFilter, ApiKeyRepository},
    common::RepositoryError,
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::repositories::utils::Table;

/// Keys are stored by hash only; the plaintext never reaches this layer.
#[derive(Debug, Default)]
pub struct InMemoryApiKeyRepository {
    table: RwLock<Table<ApiKey>>,
}

impl InMemoryApiKeyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryApiKeyRepository {
    async fn create(&self, mut key: ApiKey) -> Result<ApiKey, RepositoryError> {
        let mut table = self.table.write().await;
        if table.any(|k| k.key_hash == key.key_hash || k.public_id == key.public_id) {
            return Err(RepositoryError::AlreadyExists(key.public_id));
        }
        key.id = table.next_id();
        table.rows.insert(key.id, key.clone());
        debug!(key_id = %key.public_id, key_type = key.key_type.as_str(), "Stored API key");
        Ok(key)
    }

    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, RepositoryError> {
        Ok(self.table.read().await.find(|k| k.key_hash == key_hash))
    }

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<ApiKey>, RepositoryError> {
        Ok(self.table.read().await.find(|k| k.public_id == public_id))
    }

    async fn find_by_filter(&self, filter: ApiKeyFilter) -> Result<Vec<ApiKey>, RepositoryError> {
        let mut keys = self.table.read().await.filter(|k| filter.matches(k));
        keys.sort_by_key(|k| std::cmp::Reverse((k.created_at, k.id)));
        Ok(keys)
    }

    async fn touch_last_used(&self, id: i64, at: i64) -> Result<(), RepositoryError> {
        let mut table = self.table.write().await;
        let key = table
            .rows
            .get_mut(&id)
            .ok_or_else(|| super::utils::not_found("api key", id))?;
        key.last_used_at = Some(at);
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), RepositoryError> {
        self.table.write().await.remove(id, "api key").map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use services::auth::ports::ApiKeyType;

    fn key(public_id: &str, hash: &str, key_type: ApiKeyType, created_at: i64) -> ApiKey {
        ApiKey {
            id: 0,
            public_id: public_id.to_string(),
            key_hash: hash.to_string(),
            plaintext_hint: "sk-…ab".to_string(),
            key_type,
            owner_public_id: "usr_a".to_string(),
            organization_id: None,
            description: None,
            enabled: true,
            expires_at: None,
            last_used_at: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn test_lookup_by_hash() {
        let repo = InMemoryApiKeyRepository::new();
        let stored = repo.create(key("key_a", "h1", ApiKeyType::User, 1)).await.unwrap();
        assert_eq!(repo.find_by_hash("h1").await.unwrap(), Some(stored));
        assert_eq!(repo.find_by_hash("h2").await.unwrap(), None);
        assert!(matches!(
            repo.create(key("key_b", "h1", ApiKeyType::User, 2)).await,
            Err(RepositoryError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_filter_is_newest_first() {
        let repo = InMemoryApiKeyRepository::new();
        repo.create(key("key_a", "h1", ApiKeyType::User, 1)).await.unwrap();
        repo.create(key("key_b", "h2", ApiKeyType::Admin, 2)).await.unwrap();
        repo.create(key("key_c", "h3", ApiKeyType::User, 3)).await.unwrap();

        let users = repo
            .find_by_filter(ApiKeyFilter {
                key_type: Some(ApiKeyType::User),
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<_> = users.iter().map(|k| k.public_id.as_str()).collect();
        assert_eq!(ids, vec!["key_c", "key_a"]);
    }

    #[tokio::test]
    async fn test_touch_and_delete() {
        let repo = InMemoryApiKeyRepository::new();
        let stored = repo.create(key("key_a", "h1", ApiKeyType::User, 1)).await.unwrap();
        repo.touch_last_used(stored.id, 42).await.unwrap();
        assert_eq!(
            repo.find_by_public_id("key_a").await.unwrap().unwrap().last_used_at,
            Some(42)
        );
        repo.delete(stored.id).await.unwrap();
        assert!(matches!(repo.delete(stored.id).await, Err(RepositoryError::NotFound(_))));
    }
}
