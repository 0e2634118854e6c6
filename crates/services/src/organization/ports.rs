use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::{InternalFailure, RepositoryError};

#[cfg(any(test, feature = "test-mocks"))]
use mockall::automock;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organization {
    pub id: i64,
    pub public_id: String,
    pub name: String,
    pub owner_id: i64,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrganizationRole {
    Owner,
    Reader,
}

impl OrganizationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrganizationRole::Owner => "owner",
            OrganizationRole::Reader => "reader",
        }
    }
}

impl std::str::FromStr for OrganizationRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "owner" => Ok(OrganizationRole::Owner),
            "reader" => Ok(OrganizationRole::Reader),
            other => Err(format!("unknown organization role '{other}'")),
        }
    }
}

/// One membership per (organization, user).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrganizationMember {
    pub id: i64,
    pub organization_id: i64,
    pub user_id: i64,
    pub role: OrganizationRole,
    pub is_primary: bool,
    pub created_at: i64,
}

/// Role an organization-scoped endpoint requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolePolicy {
    All,
    OwnerOnly,
}

impl RolePolicy {
    pub fn allows(&self, role: OrganizationRole) -> bool {
        match self {
            RolePolicy::All => true,
            RolePolicy::OwnerOnly => role == OrganizationRole::Owner,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrganizationError {
    #[error("Organization not found")]
    NotFound,

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Caller is not a member of this organization")]
    NotMember,

    #[error("Insufficient organization role")]
    Forbidden,

    #[error("User is already a member of this organization")]
    AlreadyMember,

    #[error("Invalid organization request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Internal(#[from] InternalFailure),
}

#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    async fn create(&self, organization: Organization) -> Result<Organization, RepositoryError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Organization>, RepositoryError>;

    async fn find_by_public_id(
        &self,
        public_id: &str,
    ) -> Result<Option<Organization>, RepositoryError>;
}

#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait OrganizationMemberRepository: Send + Sync {
    /// Fails with `AlreadyExists` when the user is already a member.
    async fn create(
        &self,
        member: OrganizationMember,
    ) -> Result<OrganizationMember, RepositoryError>;

    async fn find(
        &self,
        organization_id: i64,
        user_id: i64,
    ) -> Result<Option<OrganizationMember>, RepositoryError>;

    async fn find_primary(
        &self,
        user_id: i64,
    ) -> Result<Option<OrganizationMember>, RepositoryError>;

    async fn list_by_organization(
        &self,
        organization_id: i64,
    ) -> Result<Vec<OrganizationMember>, RepositoryError>;
}
