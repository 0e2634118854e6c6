use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::{InternalFailure, Page, Pagination, RepositoryError};

#[cfg(any(test, feature = "test-mocks"))]
use mockall::automock;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: i64,
    pub public_id: String,
    pub organization_id: i64,
    pub name: String,
    pub status: ProjectStatus,
    pub archived_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProjectRole {
    Owner,
    Member,
}

impl std::str::FromStr for ProjectRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "owner" => Ok(ProjectRole::Owner),
            "member" => Ok(ProjectRole::Member),
            other => Err(format!("unknown project role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectMember {
    pub id: i64,
    pub project_id: i64,
    pub user_id: i64,
    pub role: ProjectRole,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectFilter {
    pub organization_id: Option<i64>,
    /// Restrict to these project IDs
    pub ids: Option<Vec<i64>>,
    pub status: Option<ProjectStatus>,
}

impl ProjectFilter {
    pub fn matches(&self, project: &Project) -> bool {
        self.organization_id
            .is_none_or(|org| project.organization_id == org)
            && self.ids.as_ref().is_none_or(|ids| ids.contains(&project.id))
            && self.status.is_none_or(|status| project.status == status)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("Project not found")]
    NotFound,

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Caller is not a member of this project")]
    NotMember,

    #[error("User is already a member of this project")]
    AlreadyMember,

    #[error("Project is archived")]
    Archived,

    #[error("Invalid project request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Internal(#[from] InternalFailure),
}

#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn create(&self, project: Project) -> Result<Project, RepositoryError>;

    async fn update(&self, project: Project) -> Result<Project, RepositoryError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Project>, RepositoryError>;

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<Project>, RepositoryError>;

    async fn find_by_filter(
        &self,
        filter: ProjectFilter,
        pagination: Pagination,
    ) -> Result<Page<Project>, RepositoryError>;
}

#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait ProjectMemberRepository: Send + Sync {
    /// Fails with `AlreadyExists` when the user is already a member.
    async fn create(&self, member: ProjectMember) -> Result<ProjectMember, RepositoryError>;

    async fn find(
        &self,
        project_id: i64,
        user_id: i64,
    ) -> Result<Option<ProjectMember>, RepositoryError>;

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<ProjectMember>, RepositoryError>;

    async fn list_by_project(&self, project_id: i64)
        -> Result<Vec<ProjectMember>, RepositoryError>;
}
