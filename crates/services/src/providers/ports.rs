use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::common::{InternalFailure, RepositoryError};

#[cfg(any(test, feature = "test-mocks"))]
use mockall::automock;

/// Public ID of the built-in provider configured from the environment.
pub const JAN_DEFAULT_PROVIDER_ID: &str = "jan-default";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Jan,
    Organization,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Jan => "jan",
            ProviderType::Organization => "organization",
        }
    }

    /// Vendors a provider of this type may use.
    pub fn allowed_vendors(&self) -> &'static [ProviderVendor] {
        match self {
            ProviderType::Jan => &[ProviderVendor::Jan],
            ProviderType::Organization => &[ProviderVendor::OpenRouter, ProviderVendor::Gemini],
        }
    }

    pub fn allows(&self, vendor: ProviderVendor) -> bool {
        self.allowed_vendors().contains(&vendor)
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jan" => Ok(ProviderType::Jan),
            "organization" => Ok(ProviderType::Organization),
            other => Err(ProviderError::InvalidRequest(format!(
                "unsupported provider type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderVendor {
    Jan,
    #[serde(rename = "openrouter")]
    OpenRouter,
    Gemini,
}

impl ProviderVendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderVendor::Jan => "jan",
            ProviderVendor::OpenRouter => "openrouter",
            ProviderVendor::Gemini => "gemini",
        }
    }

    /// Base URL used when a registration omits one.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            ProviderVendor::Jan => None,
            ProviderVendor::OpenRouter => Some("https://openrouter.ai/api/v1"),
            ProviderVendor::Gemini => {
                Some("https://generativelanguage.googleapis.com/v1beta/openai")
            }
        }
    }
}

impl fmt::Display for ProviderVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderVendor {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jan" => Ok(ProviderVendor::Jan),
            "openrouter" => Ok(ProviderVendor::OpenRouter),
            "gemini" => Ok(ProviderVendor::Gemini),
            other => Err(ProviderError::InvalidRequest(format!(
                "unsupported provider vendor '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderScope {
    Organization,
    Project,
}

/// A configured upstream. `encrypted_api_key` holds sealed material only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelProvider {
    pub id: i64,
    pub public_id: String,
    pub name: String,
    pub provider_type: ProviderType,
    pub vendor: ProviderVendor,
    pub base_url: String,
    pub encrypted_api_key: String,
    pub api_key_hint: Option<String>,
    pub organization_id: Option<i64>,
    pub project_id: Option<i64>,
    pub metadata: serde_json::Value,
    pub active: bool,
    pub last_synced_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ModelProvider {
    pub fn scope(&self) -> ProviderScope {
        if self.project_id.is_some() {
            ProviderScope::Project
        } else {
            ProviderScope::Organization
        }
    }

    /// Last successful sync, falling back to the last update.
    pub fn recency(&self) -> i64 {
        self.last_synced_at.unwrap_or(self.updated_at)
    }

    pub fn is_builtin(&self) -> bool {
        self.public_id == JAN_DEFAULT_PROVIDER_ID
    }
}

/// Which scope rows a provider listing covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ScopeFilter {
    #[default]
    Any,
    /// Rows without a project
    OrganizationOnly,
    /// Rows bound to one of these projects
    Projects(Vec<i64>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderFilter {
    pub organization_id: Option<i64>,
    pub scope: ScopeFilter,
    pub vendor: Option<ProviderVendor>,
    pub provider_type: Option<ProviderType>,
    pub active: Option<bool>,
}

impl ProviderFilter {
    pub fn matches(&self, provider: &ModelProvider) -> bool {
        let scope_ok = match &self.scope {
            ScopeFilter::Any => true,
            ScopeFilter::OrganizationOnly => provider.project_id.is_none(),
            ScopeFilter::Projects(ids) => provider.project_id.is_some_and(|id| ids.contains(&id)),
        };
        scope_ok
            && self
                .organization_id
                .is_none_or(|org| provider.organization_id == Some(org))
            && self.vendor.is_none_or(|v| provider.vendor == v)
            && self.provider_type.is_none_or(|t| provider.provider_type == t)
            && self.active.is_none_or(|a| provider.active == a)
    }
}

/// Request-time inputs used to pick a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderSelection {
    pub organization_id: Option<i64>,
    pub project_id: Option<i64>,
    pub project_ids: Vec<i64>,
    pub provider_public_id: Option<String>,
    pub vendor: Option<ProviderVendor>,
    pub provider_type: Option<ProviderType>,
    pub model: String,
}

impl ProviderSelection {
    /// Builds a selection from raw request overrides. Type and vendor are
    /// case-insensitive and must name known values.
    pub fn from_overrides(
        provider_id: Option<&str>,
        provider_type: Option<&str>,
        vendor: Option<&str>,
    ) -> Result<Self, ProviderError> {
        fn non_empty(value: Option<&str>) -> Option<&str> {
            value.map(str::trim).filter(|v| !v.is_empty())
        }

        Ok(Self {
            provider_public_id: non_empty(provider_id).map(str::to_string),
            provider_type: non_empty(provider_type).map(str::parse).transpose()?,
            vendor: non_empty(vendor).map(str::parse).transpose()?,
            ..Default::default()
        })
    }

    /// Project IDs in scope, de-duplicated and sorted.
    pub fn project_set(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.project_id.into_iter().chain(self.project_ids.iter().copied()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn includes_type(&self, provider_type: ProviderType) -> bool {
        self.provider_type.is_none_or(|t| t == provider_type)
    }

    /// Whether the built-in provider can satisfy this selection.
    pub fn includes_builtin(&self) -> bool {
        self.includes_type(ProviderType::Jan) && self.vendor.is_none_or(|v| v == ProviderVendor::Jan)
    }

    pub fn includes_organization_providers(&self) -> bool {
        self.includes_type(ProviderType::Organization)
    }
}

/// A model offered by some provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderModel {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
    pub provider_id: String,
    pub provider_type: ProviderType,
    pub provider_vendor: ProviderVendor,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider not found")]
    NotFound,

    #[error("No provider is available for this request")]
    NoProviderAvailable,

    #[error("Vendor '{vendor}' is not allowed for provider type '{provider_type}'")]
    InvalidVendorForType {
        provider_type: ProviderType,
        vendor: ProviderVendor,
    },

    #[error("An API key is required for organization providers")]
    MissingProviderKey,

    #[error("Provider vendor already exists for this scope: {0}")]
    Conflict(ProviderVendor),

    #[error("Invalid provider request: {0}")]
    InvalidRequest(String),

    #[error("Provider '{provider_id}' failed to list models: {message}")]
    Upstream { provider_id: String, message: String },

    #[error(transparent)]
    Internal(#[from] InternalFailure),
}

impl From<cache::CacheError> for ProviderError {
    fn from(e: cache::CacheError) -> Self {
        match e {
            cache::CacheError::LockTimeout(name) => ProviderError::Internal(InternalFailure::new(
                "d3b1f9e7-5c4a-4a02-b8e6-1f9d7b5c3a40",
                format!("Timed out waiting for provider lock {name}"),
            )),
            other => ProviderError::Internal(InternalFailure::new(
                "94e2c0a8-6f1d-4b57-a3c9-8e6a4c2f0d15",
                format!("Cache failure: {other}"),
            )),
        }
    }
}

#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait ProviderRepository: Send + Sync {
    async fn create(&self, provider: ModelProvider) -> Result<ModelProvider, RepositoryError>;

    async fn update(&self, provider: ModelProvider) -> Result<ModelProvider, RepositoryError>;

    async fn find_by_public_id(
        &self,
        public_id: &str,
    ) -> Result<Option<ModelProvider>, RepositoryError>;

    /// Providers matching `filter`, oldest first.
    async fn find_by_filter(
        &self,
        filter: ProviderFilter,
    ) -> Result<Vec<ModelProvider>, RepositoryError>;

    async fn delete(&self, id: i64) -> Result<(), RepositoryError>;

    /// Stamps `last_synced_at` after a successful model listing.
    async fn touch_sync(&self, id: i64, at: i64) -> Result<(), RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_type_table() {
        assert!(ProviderType::Jan.allows(ProviderVendor::Jan));
        assert!(!ProviderType::Jan.allows(ProviderVendor::Gemini));
        assert!(ProviderType::Organization.allows(ProviderVendor::OpenRouter));
        assert!(!ProviderType::Organization.allows(ProviderVendor::Jan));
    }

    #[test]
    fn test_overrides_are_case_insensitive() {
        let selection =
            ProviderSelection::from_overrides(Some(" prv_1 "), Some("Organization"), Some("OPENROUTER"))
                .unwrap();
        assert_eq!(selection.provider_public_id.as_deref(), Some("prv_1"));
        assert_eq!(selection.provider_type, Some(ProviderType::Organization));
        assert_eq!(selection.vendor, Some(ProviderVendor::OpenRouter));
        assert!(!selection.includes_builtin());
    }

    #[test]
    fn test_unknown_override_is_invalid() {
        assert!(matches!(
            ProviderSelection::from_overrides(None, Some("cloud"), None),
            Err(ProviderError::InvalidRequest(_))
        ));
        assert!(matches!(
            ProviderSelection::from_overrides(None, None, Some("anthropic")),
            Err(ProviderError::InvalidRequest(_))
        ));
        let empty = ProviderSelection::from_overrides(Some(""), Some(" "), None).unwrap();
        assert_eq!(empty, ProviderSelection::default());
    }

    #[test]
    fn test_project_set_is_unique_and_sorted() {
        let selection = ProviderSelection {
            project_id: Some(5),
            project_ids: vec![3, 5, 1],
            ..Default::default()
        };
        assert_eq!(selection.project_set(), vec![1, 3, 5]);
    }

    #[test]
    fn test_vendor_serialization() {
        assert_eq!(
            serde_json::to_string(&ProviderVendor::OpenRouter).unwrap(),
            "\"openrouter\""
        );
    }
}
