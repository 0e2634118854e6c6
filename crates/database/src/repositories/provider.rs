use async_trait::async_trait;
use services::{
    common::RepositoryError,
    providers::ports::{ModelProvider, ProviderFilter, ProviderRepository},
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::repositories::utils::{not_found, Table};

/// Stores sealed provider keys only. At most one provider per
/// (organization, project, vendor).
#[derive(Debug, Default)]
pub struct InMemoryProviderRepository {
    table: RwLock<Table<ModelProvider>>,
}

impl InMemoryProviderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn same_scope(a: &ModelProvider, b: &ModelProvider) -> bool {
    a.organization_id == b.organization_id && a.project_id == b.project_id && a.vendor == b.vendor
}

#[async_trait]
impl ProviderRepository for InMemoryProviderRepository {
    async fn create(&self, mut provider: ModelProvider) -> Result<ModelProvider, RepositoryError> {
        let mut table = self.table.write().await;
        if table.any(|p| p.public_id == provider.public_id || same_scope(p, &provider)) {
            return Err(RepositoryError::AlreadyExists(format!(
                "{} provider in this scope",
                provider.vendor
            )));
        }
        provider.id = table.next_id();
        table.rows.insert(provider.id, provider.clone());
        debug!(provider_id = %provider.public_id, "Stored provider");
        Ok(provider)
    }

    async fn update(&self, provider: ModelProvider) -> Result<ModelProvider, RepositoryError> {
        let mut table = self.table.write().await;
        if table.any(|p| p.id != provider.id && same_scope(p, &provider)) {
            return Err(RepositoryError::AlreadyExists(format!(
                "{} provider in this scope",
                provider.vendor
            )));
        }
        table.replace(provider.id, provider, "provider")
    }

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<ModelProvider>, RepositoryError> {
        Ok(self.table.read().await.find(|p| p.public_id == public_id))
    }

    async fn find_by_filter(&self, filter: ProviderFilter) -> Result<Vec<ModelProvider>, RepositoryError> {
        let mut providers = self.table.read().await.filter(|p| filter.matches(p));
        providers.sort_by_key(|p| (p.created_at, p.id));
        Ok(providers)
    }

    async fn delete(&self, id: i64) -> Result<(), RepositoryError> {
        self.table.write().await.remove(id, "provider").map(|_| ())
    }

    async fn touch_sync(&self, id: i64, at: i64) -> Result<(), RepositoryError> {
        let mut table = self.table.write().await;
        let provider = table.rows.get_mut(&id).ok_or_else(|| not_found("provider", id))?;
        provider.last_synced_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use services::providers::ports::{ProviderType, ProviderVendor, ScopeFilter};

    fn provider(public_id: &str, project_id: Option<i64>, vendor: ProviderVendor) -> ModelProvider {
        ModelProvider {
            id: 0,
            public_id: public_id.to_string(),
            name: public_id.to_string(),
            provider_type: ProviderType::Organization,
            vendor,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            encrypted_api_key: "sealed".to_string(),
            api_key_hint: Some("***abcd".to_string()),
            organization_id: Some(1),
            project_id,
            metadata: serde_json::json!({}),
            active: true,
            last_synced_at: None,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[tokio::test]
    async fn test_vendor_unique_per_scope() {
        let repo = InMemoryProviderRepository::new();
        repo.create(provider("prv_a", None, ProviderVendor::OpenRouter)).await.unwrap();
        repo.create(provider("prv_b", Some(5), ProviderVendor::OpenRouter)).await.unwrap();
        repo.create(provider("prv_c", None, ProviderVendor::Gemini)).await.unwrap();
        assert!(matches!(
            repo.create(provider("prv_d", None, ProviderVendor::OpenRouter)).await,
            Err(RepositoryError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_scope_filter_and_sync_stamp() {
        let repo = InMemoryProviderRepository::new();
        let org = repo.create(provider("prv_a", None, ProviderVendor::OpenRouter)).await.unwrap();
        repo.create(provider("prv_b", Some(5), ProviderVendor::OpenRouter)).await.unwrap();

        let projects = repo
            .find_by_filter(ProviderFilter {
                organization_id: Some(1),
                scope: ScopeFilter::Projects(vec![5]),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].public_id, "prv_b");

        repo.touch_sync(org.id, 99).await.unwrap();
        let stored = repo.find_by_public_id("prv_a").await.unwrap().unwrap();
        assert_eq!(stored.last_synced_at, Some(99));
        assert_eq!(stored.recency(), 99);

        repo.delete(org.id).await.unwrap();
        assert!(repo.find_by_public_id("prv_a").await.unwrap().is_none());
    }
}
