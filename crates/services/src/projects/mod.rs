pub mod ports;

pub use ports::*;

use crate::{
    auth::{User, UserRepository},
    common::{internal, now_unix, Page, Pagination, RepositoryError, SortOrder},
    id_prefixes::{generate_public_id, PREFIX_PROJ},
    organization::{Organization, OrganizationMember, OrganizationRole},
};
use std::sync::Arc;
use tracing::info;

const MAX_NAME_LEN: usize = 128;
/// Upper bound when enumerating every project of an organization.
const MAX_PROJECTS_PER_ORGANIZATION: i64 = 1000;

fn validate_name(name: &str) -> Result<String, ProjectError> {
    let name = name.trim();
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ProjectError::InvalidRequest(format!(
            "name must be between 1 and {MAX_NAME_LEN} bytes"
        )));
    }
    Ok(name.to_string())
}

pub struct ProjectService {
    projects: Arc<dyn ProjectRepository>,
    members: Arc<dyn ProjectMemberRepository>,
    users: Arc<dyn UserRepository>,
}

impl ProjectService {
    pub fn new(
        projects: Arc<dyn ProjectRepository>,
        members: Arc<dyn ProjectMemberRepository>,
        users: Arc<dyn UserRepository>,
    ) -> Self {
        Self {
            projects,
            members,
            users,
        }
    }

    /// Creates an active project; the creator becomes its owner.
    pub async fn create(
        &self,
        organization: &Organization,
        creator: &User,
        name: &str,
    ) -> Result<Project, ProjectError> {
        let name = validate_name(name)?;
        let public_id = generate_public_id(PREFIX_PROJ)
            .map_err(internal("7c5a3e1f-9d0b-4b86-a4f2-0e8c6a2d4f19", "Failed to generate project ID"))?;
        let now = now_unix();
        let project = self
            .projects
            .create(Project {
                id: 0,
                public_id,
                organization_id: organization.id,
                name,
                status: ProjectStatus::Active,
                archived_at: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .map_err(internal("2e0c8a6d-4f3b-4a95-b7e1-9d5f3b1c8e07", "Failed to create project"))?;

        self.members
            .create(ProjectMember {
                id: 0,
                project_id: project.id,
                user_id: creator.id,
                role: ProjectRole::Owner,
                created_at: now,
            })
            .await
            .map_err(internal("a9f7d5b3-1e0c-4c42-8b6e-5a3f1d9b7c24", "Failed to add project owner"))?;

        info!(project_id = %project.public_id, organization_id = %organization.public_id, "Created project");
        Ok(project)
    }

    /// Loads a project of `organization` by public ID.
    pub async fn get(
        &self,
        organization: &Organization,
        public_id: &str,
    ) -> Result<Project, ProjectError> {
        self.projects
            .find_by_public_id(public_id)
            .await
            .map_err(internal("5d3b1f9e-7c6a-4e08-92d4-1b9e7c5a3f60", "Failed to load project"))?
            .filter(|project| project.organization_id == organization.id)
            .ok_or(ProjectError::NotFound)
    }

    /// Organization owners see every project; other members see the projects
    /// they belong to.
    pub async fn list(
        &self,
        organization: &Organization,
        user: &User,
        organization_role: OrganizationRole,
        pagination: Pagination,
    ) -> Result<Page<Project>, ProjectError> {
        let ids = match organization_role {
            OrganizationRole::Owner => None,
            OrganizationRole::Reader => Some(self.member_project_ids(user.id).await?),
        };
        let page = self
            .projects
            .find_by_filter(
                ProjectFilter {
                    organization_id: Some(organization.id),
                    ids,
                    status: None,
                },
                pagination,
            )
            .await
            .map_err(internal("e3a1c9f7-5b4d-4f60-a8c2-7f1d5b3e9a86", "Failed to list projects"))?;
        Ok(page)
    }

    pub async fn rename(&self, project: &Project, name: &str) -> Result<Project, ProjectError> {
        if project.status == ProjectStatus::Archived {
            return Err(ProjectError::Archived);
        }
        let mut updated = project.clone();
        updated.name = validate_name(name)?;
        updated.updated_at = now_unix();
        let project = self
            .projects
            .update(updated)
            .await
            .map_err(internal("1b9f7d5c-3a2e-4d84-b6a0-9c7e5b3d1f42", "Failed to update project"))?;
        Ok(project)
    }

    /// Archiving is idempotent and keeps the original timestamp.
    pub async fn archive(&self, project: &Project) -> Result<Project, ProjectError> {
        if project.status == ProjectStatus::Archived {
            return Ok(project.clone());
        }
        let now = now_unix();
        let mut updated = project.clone();
        updated.status = ProjectStatus::Archived;
        updated.archived_at = Some(now);
        updated.updated_at = now;
        let project = self
            .projects
            .update(updated)
            .await
            .map_err(internal("8f6d4b2a-0e9c-4a73-95f1-6d4b2f0e8c35", "Failed to archive project"))?;
        info!(project_id = %project.public_id, "Archived project");
        Ok(project)
    }

    /// Organization owners pass without a project membership; everybody else
    /// needs one.
    pub async fn authorize(
        &self,
        organization_member: &OrganizationMember,
        project: &Project,
        user: &User,
    ) -> Result<Option<ProjectMember>, ProjectError> {
        let member = self
            .members
            .find(project.id, user.id)
            .await
            .map_err(internal("4c2a0e8f-6d5b-4b19-a3e7-0f8d6b4a2c51", "Failed to load project membership"))?;
        if member.is_none() && organization_member.role != OrganizationRole::Owner {
            return Err(ProjectError::NotMember);
        }
        Ok(member)
    }

    pub async fn add_member(
        &self,
        project: &Project,
        user_public_id: &str,
        role: ProjectRole,
    ) -> Result<(ProjectMember, User), ProjectError> {
        let user = self
            .users
            .find_by_public_id(user_public_id)
            .await
            .map_err(internal("d0b8f6e4-2c1a-4e97-8d5b-3a1f9e7c5b28", "Failed to load user"))?
            .ok_or_else(|| ProjectError::UserNotFound(user_public_id.to_string()))?;

        let member = self
            .members
            .create(ProjectMember {
                id: 0,
                project_id: project.id,
                user_id: user.id,
                role,
                created_at: now_unix(),
            })
            .await
            .map_err(|e| match e {
                RepositoryError::AlreadyExists(_) => ProjectError::AlreadyMember,
                other => internal("6e4c2a0b-8f7d-4d35-b9a3-1c7f5d3b9e06", "Failed to add project member")(other).into(),
            })?;
        Ok((member, user))
    }

    pub async fn list_members(
        &self,
        project: &Project,
    ) -> Result<Vec<(ProjectMember, User)>, ProjectError> {
        let members = self
            .members
            .list_by_project(project.id)
            .await
            .map_err(internal("b7f5d3a1-9c8e-4a64-85d2-4e0a8c6f2b93", "Failed to list project members"))?;

        let mut result = Vec::with_capacity(members.len());
        for member in members {
            let user = self
                .users
                .find_by_id(member.user_id)
                .await
                .map_err(internal("3a1f9d7b-5e4c-4c20-a6e8-2b0d8f6a4c17", "Failed to load member user"))?;
            if let Some(user) = user {
                result.push((member, user));
            }
        }
        Ok(result)
    }

    pub async fn member_project_ids(&self, user_id: i64) -> Result<Vec<i64>, ProjectError> {
        let memberships = self
            .members
            .list_by_user(user_id)
            .await
            .map_err(internal("f1d9b7e5-3c2a-4f86-9e4b-8d6f4a2c0e59", "Failed to list project memberships"))?;
        Ok(memberships.into_iter().map(|m| m.project_id).collect())
    }

    /// Projects of `organization` whose resources the user may see: all of
    /// them for an organization owner, otherwise those the user belongs to.
    pub async fn visible_project_ids(
        &self,
        organization: &Organization,
        user: &User,
        organization_role: Option<OrganizationRole>,
    ) -> Result<Vec<i64>, ProjectError> {
        let ids = match organization_role {
            Some(OrganizationRole::Owner) => None,
            _ => Some(self.member_project_ids(user.id).await?),
        };
        let page = self
            .projects
            .find_by_filter(
                ProjectFilter {
                    organization_id: Some(organization.id),
                    ids,
                    status: Some(ProjectStatus::Active),
                },
                Pagination::new(MAX_PROJECTS_PER_ORGANIZATION, SortOrder::Asc),
            )
            .await
            .map_err(internal("7d5b3f1a-0e9c-4b48-a2f6-5c3e1a9d7b80", "Failed to list visible projects"))?;
        Ok(page.items.into_iter().map(|p| p.id).collect())
    }
}
