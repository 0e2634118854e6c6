//! Scope-aware registry of upstream providers.
//!
//! Providers are registered per organization, optionally narrowed to a
//! project. Resolution walks project providers, then organization providers,
//! then the built-in Jan provider. Sealed keys are unsealed on every
//! resolution and never cached in plaintext.

pub mod ports;

pub use ports::*;

use crate::{
    common::{internal, now_unix, RepositoryError},
    crypto::{key_hint, KeySealer},
    id_prefixes::{generate_public_id, PREFIX_PRV},
};
use cache::{keys, Cache};
use futures::stream::{self, StreamExt};
use inference_providers::{BackendConfig, ExternalBackend};
use serde_json::json;
use std::{collections::HashSet, fmt, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

const REGISTER_LOCK_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub jan_base_url: String,
    pub jan_api_key: Option<String>,
    pub models_ttl: Duration,
    pub provider_ttl: Duration,
    pub aggregation_concurrency: usize,
}

impl From<&config::ProvidersConfig> for RegistrySettings {
    fn from(config: &config::ProvidersConfig) -> Self {
        Self {
            jan_base_url: config.jan_base_url.clone(),
            jan_api_key: config.jan_api_key.clone(),
            models_ttl: Duration::from_secs(config.models_ttl_secs),
            provider_ttl: Duration::from_secs(config.provider_ttl_secs),
            aggregation_concurrency: config.aggregation_concurrency.max(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegisterProviderRequest {
    pub organization_id: i64,
    pub project_id: Option<i64>,
    pub name: String,
    pub vendor: ProviderVendor,
    pub base_url: Option<String>,
    pub api_key: String,
    pub metadata: Option<serde_json::Value>,
    pub active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateProviderRequest {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub active: Option<bool>,
}

/// A provider paired with its unsealed key, for the duration of one call.
#[derive(Clone)]
pub struct ResolvedProvider {
    pub provider: ModelProvider,
    pub api_key: String,
}

impl ResolvedProvider {
    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig::new(self.provider.base_url.clone(), self.api_key.clone())
    }
}

impl fmt::Debug for ResolvedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedProvider")
            .field("provider", &self.provider.public_id)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

pub struct ProviderRegistry {
    repository: Arc<dyn ProviderRepository>,
    sealer: KeySealer,
    cache: Arc<dyn Cache>,
    backend: Arc<dyn ExternalBackend>,
    builtin: ModelProvider,
    settings: RegistrySettings,
}

impl ProviderRegistry {
    pub fn new(
        repository: Arc<dyn ProviderRepository>,
        sealer: KeySealer,
        cache: Arc<dyn Cache>,
        backend: Arc<dyn ExternalBackend>,
        settings: RegistrySettings,
    ) -> Result<Self, ProviderError> {
        let jan_key = settings.jan_api_key.clone().unwrap_or_default();
        let sealed = sealer
            .seal(&jan_key)
            .map_err(internal("5e3c1a9f-7b2d-4f84-a6e0-9d1b3f5c7a28", "Failed to seal built-in provider key"))?;
        let now = now_unix();
        let builtin = ModelProvider {
            id: 0,
            public_id: JAN_DEFAULT_PROVIDER_ID.to_string(),
            name: "Jan".to_string(),
            provider_type: ProviderType::Jan,
            vendor: ProviderVendor::Jan,
            base_url: settings.jan_base_url.trim_end_matches('/').to_string(),
            encrypted_api_key: sealed.ciphertext,
            api_key_hint: settings.jan_api_key.as_deref().map(key_hint),
            organization_id: None,
            project_id: None,
            metadata: json!({}),
            active: true,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        };

        Ok(Self {
            repository,
            sealer,
            cache,
            backend,
            builtin,
            settings,
        })
    }

    pub fn builtin(&self) -> &ModelProvider {
        &self.builtin
    }

    /// Providers visible to the selection: the built-in provider when the
    /// type/vendor filters allow it, organization providers, and project
    /// providers whose project is in scope.
    pub async fn list_providers(
        &self,
        selection: &ProviderSelection,
    ) -> Result<Vec<ModelProvider>, ProviderError> {
        let mut providers = Vec::new();
        if selection.includes_builtin() {
            providers.push(self.builtin.clone());
        }

        let Some(organization_id) = selection.organization_id else {
            return Ok(providers);
        };
        if !selection.includes_organization_providers() {
            return Ok(providers);
        }

        let projects = selection.project_set();
        let rows = self
            .repository
            .find_by_filter(ProviderFilter {
                organization_id: Some(organization_id),
                scope: ScopeFilter::Any,
                vendor: selection.vendor,
                provider_type: Some(ProviderType::Organization),
                active: None,
            })
            .await
            .map_err(internal("a8d6f4b2-0c1e-4e97-b3a5-7f9d1c3e5b60", "Failed to list providers"))?;
        providers.extend(
            rows.into_iter()
                .filter(|p| p.project_id.is_none_or(|id| projects.contains(&id))),
        );
        Ok(providers)
    }

    /// Loads a provider through the provider-entry cache. The cached entry
    /// only ever carries the sealed key.
    pub async fn get_by_public_id(&self, public_id: &str) -> Result<ModelProvider, ProviderError> {
        if public_id == JAN_DEFAULT_PROVIDER_ID {
            return Ok(self.builtin.clone());
        }

        let repository = self.repository.clone();
        self.cache
            .get_with_fallback(&keys::provider(public_id), self.settings.provider_ttl, || async move {
                repository
                    .find_by_public_id(public_id)
                    .await
                    .map_err(internal("2c0a8e6d-4f1b-4d38-9e7c-5b3a1f9d0e42", "Failed to load provider"))?
                    .ok_or(ProviderError::NotFound)
            })
            .await
    }

    /// Loads a provider that belongs to `organization_id`, bypassing the
    /// cache. Rows from other organizations are reported as missing.
    pub async fn get_for_organization(
        &self,
        organization_id: i64,
        public_id: &str,
    ) -> Result<ModelProvider, ProviderError> {
        self.repository
            .find_by_public_id(public_id)
            .await
            .map_err(internal("7f5d3b1a-9e2c-4a06-8d4f-1b7e9c5a3d82", "Failed to load provider"))?
            .filter(|p| p.organization_id == Some(organization_id))
            .ok_or(ProviderError::NotFound)
    }

    pub async fn register_organization_provider(
        &self,
        request: RegisterProviderRequest,
    ) -> Result<ModelProvider, ProviderError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(ProviderError::InvalidRequest("name is required".to_string()));
        }
        if !ProviderType::Organization.allows(request.vendor) {
            return Err(ProviderError::InvalidVendorForType {
                provider_type: ProviderType::Organization,
                vendor: request.vendor,
            });
        }
        let api_key = request.api_key.trim();
        if api_key.is_empty() {
            return Err(ProviderError::MissingProviderKey);
        }
        let base_url = normalize_base_url(request.base_url.as_deref())
            .or_else(|| request.vendor.default_base_url().map(str::to_string))
            .ok_or_else(|| ProviderError::InvalidRequest("base_url is required".to_string()))?;
        let metadata = normalize_metadata(request.metadata)?;

        let sealed = self
            .sealer
            .seal(api_key)
            .map_err(internal("c4a2e0b8-6d3f-4b19-a7e5-3c1f9b7d5a04", "Failed to seal provider key"))?;

        let (organization_id, project_id, vendor, active) = (
            request.organization_id,
            request.project_id,
            request.vendor,
            request.active,
        );
        let organization_key = organization_id.to_string();
        let project_key = project_id.map(|id| id.to_string());
        let lock_name = keys::provider_scope_lock(&organization_key, project_key.as_deref());

        let provider = self
            .cache
            .with_lock(&lock_name, REGISTER_LOCK_TTL, || async move {
                self.ensure_vendor_unique(organization_id, project_id, vendor).await?;

                let public_id = generate_public_id(PREFIX_PRV)
                    .map_err(internal("0e8c6a4f-2b1d-4f73-95a9-7d5b3e1c9f16", "Failed to generate provider ID"))?;
                let now = now_unix();
                self.repository
                    .create(ModelProvider {
                        id: 0,
                        public_id,
                        name,
                        provider_type: ProviderType::Organization,
                        vendor,
                        base_url,
                        encrypted_api_key: sealed.ciphertext,
                        api_key_hint: Some(sealed.hint),
                        organization_id: Some(organization_id),
                        project_id,
                        metadata,
                        active,
                        last_synced_at: None,
                        created_at: now,
                        updated_at: now,
                    })
                    .await
                    .map_err(|e| match e {
                        RepositoryError::AlreadyExists(_) => ProviderError::Conflict(vendor),
                        other => internal("9a7e5c3b-1d0f-4e28-b6a4-2f8d0b6e4c91", "Failed to create provider")(other)
                            .into(),
                    })
            })
            .await?;

        self.invalidate(&provider).await;
        info!(
            provider_id = %provider.public_id,
            vendor = %provider.vendor,
            organization_id,
            project_id = ?project_id,
            "Registered provider"
        );
        Ok(provider)
    }

    pub async fn update_organization_provider(
        &self,
        organization_id: i64,
        public_id: &str,
        request: UpdateProviderRequest,
    ) -> Result<ModelProvider, ProviderError> {
        let mut provider = self.get_for_organization(organization_id, public_id).await?;

        if let Some(name) = request.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(ProviderError::InvalidRequest("name must not be empty".to_string()));
            }
            provider.name = name.to_string();
        }
        if let Some(base_url) = request.base_url {
            provider.base_url = normalize_base_url(Some(&base_url))
                .ok_or_else(|| ProviderError::InvalidRequest("base_url must not be empty".to_string()))?;
        }
        if let Some(api_key) = request.api_key {
            let api_key = api_key.trim();
            if api_key.is_empty() {
                return Err(ProviderError::MissingProviderKey);
            }
            let sealed = self
                .sealer
                .seal(api_key)
                .map_err(internal("3b1f9d7e-5c4a-4a82-b0e6-8d2c4a0f6e37", "Failed to seal provider key"))?;
            provider.encrypted_api_key = sealed.ciphertext;
            provider.api_key_hint = Some(sealed.hint);
        }
        if let Some(metadata) = request.metadata {
            provider.metadata = normalize_metadata(Some(metadata))?;
        }
        if let Some(active) = request.active {
            provider.active = active;
        }
        provider.updated_at = now_unix();

        let provider = self
            .repository
            .update(provider)
            .await
            .map_err(internal("e1c9a7f5-3d2b-4c60-8e4a-6f0b2d8c4a19", "Failed to update provider"))?;
        self.invalidate(&provider).await;
        info!(provider_id = %provider.public_id, "Updated provider");
        Ok(provider)
    }

    pub async fn delete_by_public_id(
        &self,
        organization_id: i64,
        public_id: &str,
    ) -> Result<(), ProviderError> {
        let provider = self.get_for_organization(organization_id, public_id).await?;
        self.repository.delete(provider.id).await.map_err(|e| match e {
            RepositoryError::NotFound(_) => ProviderError::NotFound,
            other => internal("6d4b2f0e-8a1c-4f95-a3d7-0e8c6a4f2b53", "Failed to delete provider")(other).into(),
        })?;
        self.invalidate(&provider).await;
        info!(provider_id = %provider.public_id, "Deleted provider");
        Ok(())
    }

    /// Eligible providers for a selection in resolution order: project
    /// providers, then organization providers, each most recently synced
    /// first, then the built-in provider.
    pub async fn candidates(
        &self,
        selection: &ProviderSelection,
    ) -> Result<Vec<ModelProvider>, ProviderError> {
        let mut candidates = Vec::new();

        if let (Some(organization_id), true) =
            (selection.organization_id, selection.includes_organization_providers())
        {
            let projects = selection.project_set();
            if !projects.is_empty() {
                candidates.extend(
                    self.scoped_providers(organization_id, ScopeFilter::Projects(projects), selection.vendor)
                        .await?,
                );
            }
            candidates.extend(
                self.scoped_providers(organization_id, ScopeFilter::OrganizationOnly, selection.vendor)
                    .await?,
            );
        }

        if selection.includes_builtin() {
            candidates.push(self.builtin.clone());
        }
        Ok(candidates)
    }

    /// Picks the provider for a request and unseals its key.
    ///
    /// With a model set, the first candidate whose model list offers it
    /// wins; when none does, plain scope order applies.
    pub async fn resolve(&self, selection: &ProviderSelection) -> Result<ResolvedProvider, ProviderError> {
        if let Some(public_id) = &selection.provider_public_id {
            let provider = self.get_by_public_id(public_id).await?;
            if !provider.is_builtin() && !(provider.active && can_access(&provider, selection)) {
                return Err(ProviderError::NotFound);
            }
            return self.unseal(provider);
        }

        let candidates = self.candidates(selection).await?;
        let model = selection.model.trim();
        if !model.is_empty() {
            for candidate in &candidates {
                match self.provider_models(candidate).await {
                    Ok(models) if models.iter().any(|m| m.id == model) => {
                        debug!(provider_id = %candidate.public_id, model = %model, "Resolved provider by model");
                        return self.unseal(candidate.clone());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(provider_id = %candidate.public_id, error = %e, "Skipping provider during model lookup")
                    }
                }
            }
        }

        let provider = candidates
            .into_iter()
            .next()
            .ok_or(ProviderError::NoProviderAvailable)?;
        self.unseal(provider)
    }

    /// Model list of one provider, cached per provider.
    pub async fn provider_models(
        &self,
        provider: &ModelProvider,
    ) -> Result<Vec<ProviderModel>, ProviderError> {
        let key = if provider.is_builtin() {
            keys::models_list()
        } else {
            keys::provider_models(&provider.public_id)
        };

        self.cache
            .get_with_fallback(&key, self.settings.models_ttl, || self.fetch_models(provider))
            .await
    }

    /// Models available to a selection: project aggregates, then the
    /// organization aggregate, then the built-in list, de-duplicated by
    /// `(vendor, model id)`. Fails only when every source failed.
    pub async fn get_models(&self, selection: &ProviderSelection) -> Result<Vec<ProviderModel>, ProviderError> {
        let mut sources: Vec<Result<Vec<ProviderModel>, ProviderError>> = Vec::new();

        if let (Some(organization_id), true) =
            (selection.organization_id, selection.includes_organization_providers())
        {
            for project_id in selection.project_set() {
                let key = keys::project_models(&project_id.to_string());
                sources.push(
                    self.aggregate(&key, organization_id, ScopeFilter::Projects(vec![project_id]))
                        .await,
                );
            }
            let key = keys::organization_models(&organization_id.to_string());
            sources.push(
                self.aggregate(&key, organization_id, ScopeFilter::OrganizationOnly)
                    .await,
            );
        }
        if selection.includes_builtin() {
            sources.push(self.provider_models(&self.builtin).await);
        }

        let mut seen = HashSet::new();
        let mut models = Vec::new();
        let mut last_error = None;
        let mut succeeded = 0usize;
        for source in sources {
            match source {
                Ok(list) => {
                    succeeded += 1;
                    for model in list {
                        if selection.vendor.is_some_and(|v| v != model.provider_vendor) {
                            continue;
                        }
                        if seen.insert((model.provider_vendor, model.id.clone())) {
                            models.push(model);
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Model source failed, omitting its models");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if succeeded == 0 => Err(e),
            _ => Ok(models),
        }
    }

    async fn aggregate(
        &self,
        key: &str,
        organization_id: i64,
        scope: ScopeFilter,
    ) -> Result<Vec<ProviderModel>, ProviderError> {
        self.cache
            .get_with_fallback(key, self.settings.models_ttl, || async move {
                let providers = self.scoped_providers(organization_id, scope, None).await?;
                if providers.is_empty() {
                    return Ok(Vec::new());
                }

                let results: Vec<_> = stream::iter(providers)
                    .map(|provider| async move {
                        let models = self.provider_models(&provider).await;
                        (provider, models)
                    })
                    .buffered(self.settings.aggregation_concurrency)
                    .collect()
                    .await;

                let mut models = Vec::new();
                let mut last_error = None;
                let mut succeeded = 0usize;
                for (provider, result) in results {
                    match result {
                        Ok(list) => {
                            succeeded += 1;
                            models.extend(list);
                        }
                        Err(e) => {
                            warn!(provider_id = %provider.public_id, error = %e, "Provider model listing failed");
                            last_error = Some(e);
                        }
                    }
                }
                match last_error {
                    Some(e) if succeeded == 0 => Err(e),
                    _ => Ok(models),
                }
            })
            .await
    }

    async fn scoped_providers(
        &self,
        organization_id: i64,
        scope: ScopeFilter,
        vendor: Option<ProviderVendor>,
    ) -> Result<Vec<ModelProvider>, ProviderError> {
        let mut providers = self
            .repository
            .find_by_filter(ProviderFilter {
                organization_id: Some(organization_id),
                scope,
                vendor,
                provider_type: Some(ProviderType::Organization),
                active: Some(true),
            })
            .await
            .map_err(internal("8b6f4d2a-0e9c-4b71-a5f3-1d7b9e3c5a06", "Failed to load scoped providers"))?;
        providers.sort_by(|a, b| b.recency().cmp(&a.recency()));
        Ok(providers)
    }

    async fn fetch_models(&self, provider: &ModelProvider) -> Result<Vec<ProviderModel>, ProviderError> {
        let resolved = self.unseal(provider.clone())?;
        let response = self
            .backend
            .models(&resolved.backend_config())
            .await
            .map_err(|e| ProviderError::Upstream {
                provider_id: provider.public_id.clone(),
                message: e.to_string(),
            })?;

        if !provider.is_builtin() {
            if let Err(e) = self.repository.touch_sync(provider.id, now_unix()).await {
                warn!(provider_id = %provider.public_id, error = %e, "Failed to record provider sync");
            }
        }

        Ok(response
            .data
            .into_iter()
            .map(|model| ProviderModel {
                id: model.id,
                object: model.object,
                created: model.created,
                owned_by: model.owned_by,
                provider_id: provider.public_id.clone(),
                provider_type: provider.provider_type,
                provider_vendor: provider.vendor,
            })
            .collect())
    }

    async fn ensure_vendor_unique(
        &self,
        organization_id: i64,
        project_id: Option<i64>,
        vendor: ProviderVendor,
    ) -> Result<(), ProviderError> {
        let scope = match project_id {
            Some(id) => ScopeFilter::Projects(vec![id]),
            None => ScopeFilter::OrganizationOnly,
        };
        let existing = self
            .repository
            .find_by_filter(ProviderFilter {
                organization_id: Some(organization_id),
                scope,
                vendor: Some(vendor),
                provider_type: Some(ProviderType::Organization),
                active: None,
            })
            .await
            .map_err(internal("f2e0c8a6-4b3d-4e19-9c7f-5a1d3b9f7e24", "Failed to check provider uniqueness"))?;
        if existing.is_empty() {
            Ok(())
        } else {
            Err(ProviderError::Conflict(vendor))
        }
    }

    fn unseal(&self, provider: ModelProvider) -> Result<ResolvedProvider, ProviderError> {
        let api_key = self
            .sealer
            .unseal(&provider.encrypted_api_key)
            .map_err(internal("1a9e7c5f-3b0d-4d86-a2e4-8c6a4e2f0b75", "Failed to unseal provider key"))?;
        Ok(ResolvedProvider { provider, api_key })
    }

    /// Drops every cache entry derived from the provider.
    async fn invalidate(&self, provider: &ModelProvider) {
        let mut stale = vec![
            keys::provider(&provider.public_id),
            keys::provider_models(&provider.public_id),
        ];
        if let Some(organization_id) = provider.organization_id {
            stale.push(keys::organization_models(&organization_id.to_string()));
        }
        if let Some(project_id) = provider.project_id {
            stale.push(keys::project_models(&project_id.to_string()));
        }
        for key in stale {
            if let Err(e) = self.cache.delete(&key).await {
                warn!(key = %key, error = %e, "Failed to invalidate provider cache entry");
            }
        }
    }
}

/// A project provider requires its project in scope; an organization
/// provider requires the selection's organization.
fn can_access(provider: &ModelProvider, selection: &ProviderSelection) -> bool {
    if provider.organization_id.is_none() || provider.organization_id != selection.organization_id {
        return false;
    }
    match provider.project_id {
        Some(project_id) => selection.project_set().contains(&project_id),
        None => true,
    }
}

fn normalize_base_url(base_url: Option<&str>) -> Option<String> {
    base_url
        .map(|url| url.trim().trim_end_matches('/'))
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

fn normalize_metadata(metadata: Option<serde_json::Value>) -> Result<serde_json::Value, ProviderError> {
    match metadata {
        None | Some(serde_json::Value::Null) => Ok(json!({})),
        Some(value @ serde_json::Value::Object(_)) => Ok(value),
        Some(_) => Err(ProviderError::InvalidRequest("metadata must be a JSON object".to_string())),
    }
}
