use async_trait::async_trait;
use services::{
    common::{Page, Pagination, RepositoryError},
    projects::ports::{Project, ProjectFilter, ProjectMember, ProjectMemberRepository, ProjectRepository},
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::repositories::utils::{paginate, Table};

#[derive(Debug, Default)]
pub struct InMemoryProjectRepository {
    table: RwLock<Table<Project>>,
}

impl InMemoryProjectRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectRepository for InMemoryProjectRepository {
    async fn create(&self, mut project: Project) -> Result<Project, RepositoryError> {
        let mut table = self.table.write().await;
        if table.any(|p| p.public_id == project.public_id) {
            return Err(RepositoryError::AlreadyExists(project.public_id));
        }
        project.id = table.next_id();
        table.rows.insert(project.id, project.clone());
        debug!(project_id = project.id, organization_id = project.organization_id, "Created project");
        Ok(project)
    }

    async fn update(&self, project: Project) -> Result<Project, RepositoryError> {
        self.table.write().await.replace(project.id, project, "project")
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Project>, RepositoryError> {
        Ok(self.table.read().await.get(id))
    }

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<Project>, RepositoryError> {
        Ok(self.table.read().await.find(|p| p.public_id == public_id))
    }

    async fn find_by_filter(
        &self,
        filter: ProjectFilter,
        pagination: Pagination,
    ) -> Result<Page<Project>, RepositoryError> {
        let table = self.table.read().await;
        paginate(
            table.filter(|p| filter.matches(p)),
            pagination,
            |p| (p.created_at, p.id),
            |id| table.rows.get(&id).map(|p| (p.created_at, p.id)),
        )
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProjectMemberRepository {
    table: RwLock<Table<ProjectMember>>,
}

impl InMemoryProjectMemberRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectMemberRepository for InMemoryProjectMemberRepository {
    async fn create(&self, mut member: ProjectMember) -> Result<ProjectMember, RepositoryError> {
        let mut table = self.table.write().await;
        if table.any(|m| m.project_id == member.project_id && m.user_id == member.user_id) {
            return Err(RepositoryError::AlreadyExists(format!(
                "member {} of project {}",
                member.user_id, member.project_id
            )));
        }
        member.id = table.next_id();
        table.rows.insert(member.id, member.clone());
        Ok(member)
    }

    async fn find(&self, project_id: i64, user_id: i64) -> Result<Option<ProjectMember>, RepositoryError> {
        Ok(self
            .table
            .read()
            .await
            .find(|m| m.project_id == project_id && m.user_id == user_id))
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<ProjectMember>, RepositoryError> {
        Ok(self.table.read().await.filter(|m| m.user_id == user_id))
    }

    async fn list_by_project(&self, project_id: i64) -> Result<Vec<ProjectMember>, RepositoryError> {
        Ok(self.table.read().await.filter(|m| m.project_id == project_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use services::{
        common::SortOrder,
        projects::ports::{ProjectRole, ProjectStatus},
    };

    fn project(public_id: &str, organization_id: i64, created_at: i64) -> Project {
        Project {
            id: 0,
            public_id: public_id.to_string(),
            organization_id,
            name: public_id.to_string(),
            status: ProjectStatus::Active,
            archived_at: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn test_filter_by_organization_pages_in_order() {
        let repo = InMemoryProjectRepository::new();
        repo.create(project("proj_a", 1, 3)).await.unwrap();
        repo.create(project("proj_b", 2, 1)).await.unwrap();
        repo.create(project("proj_c", 1, 2)).await.unwrap();

        let page = repo
            .find_by_filter(
                ProjectFilter {
                    organization_id: Some(1),
                    ..Default::default()
                },
                Pagination::new(1, SortOrder::Asc),
            )
            .await
            .unwrap();
        assert_eq!(page.items[0].public_id, "proj_c");
        assert!(page.has_more);
    }

    #[tokio::test]
    async fn test_archived_filter() {
        let repo = InMemoryProjectRepository::new();
        let mut archived = repo.create(project("proj_a", 1, 1)).await.unwrap();
        repo.create(project("proj_b", 1, 2)).await.unwrap();
        archived.status = ProjectStatus::Archived;
        archived.archived_at = Some(5);
        repo.update(archived).await.unwrap();

        let page = repo
            .find_by_filter(
                ProjectFilter {
                    status: Some(ProjectStatus::Active),
                    ..Default::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].public_id, "proj_b");
    }

    #[tokio::test]
    async fn test_duplicate_project_member() {
        let repo = InMemoryProjectMemberRepository::new();
        let member = ProjectMember {
            id: 0,
            project_id: 1,
            user_id: 2,
            role: ProjectRole::Member,
            created_at: 1,
        };
        repo.create(member.clone()).await.unwrap();
        assert!(matches!(repo.create(member).await, Err(RepositoryError::AlreadyExists(_))));
        assert_eq!(repo.list_by_user(2).await.unwrap().len(), 1);
        assert_eq!(repo.list_by_project(1).await.unwrap().len(), 1);
    }
}
