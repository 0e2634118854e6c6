use async_trait::async_trait;
use services::{
    common::RepositoryError,
    organization::ports::{
        Organization, OrganizationMember, OrganizationMemberRepository, OrganizationRepository,
    },
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::repositories::utils::Table;

#[derive(Debug, Default)]
pub struct InMemoryOrganizationRepository {
    table: RwLock<Table<Organization>>,
}

impl InMemoryOrganizationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrganizationRepository for InMemoryOrganizationRepository {
    async fn create(&self, mut organization: Organization) -> Result<Organization, RepositoryError> {
        let mut table = self.table.write().await;
        if table.any(|o| o.public_id == organization.public_id) {
            return Err(RepositoryError::AlreadyExists(organization.public_id));
        }
        organization.id = table.next_id();
        table.rows.insert(organization.id, organization.clone());
        debug!(organization_id = organization.id, "Created organization");
        Ok(organization)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Organization>, RepositoryError> {
        Ok(self.table.read().await.get(id))
    }

    async fn find_by_public_id(
        &self,
        public_id: &str,
    ) -> Result<Option<Organization>, RepositoryError> {
        Ok(self.table.read().await.find(|o| o.public_id == public_id))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryOrganizationMemberRepository {
    table: RwLock<Table<OrganizationMember>>,
}

impl InMemoryOrganizationMemberRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrganizationMemberRepository for InMemoryOrganizationMemberRepository {
    async fn create(
        &self,
        mut member: OrganizationMember,
    ) -> Result<OrganizationMember, RepositoryError> {
        let mut table = self.table.write().await;
        if table.any(|m| m.organization_id == member.organization_id && m.user_id == member.user_id) {
            return Err(RepositoryError::AlreadyExists(format!(
                "member {} of organization {}",
                member.user_id, member.organization_id
            )));
        }
        member.id = table.next_id();
        table.rows.insert(member.id, member.clone());
        Ok(member)
    }

    async fn find(
        &self,
        organization_id: i64,
        user_id: i64,
    ) -> Result<Option<OrganizationMember>, RepositoryError> {
        Ok(self
            .table
            .read()
            .await
            .find(|m| m.organization_id == organization_id && m.user_id == user_id))
    }

    async fn find_primary(&self, user_id: i64) -> Result<Option<OrganizationMember>, RepositoryError> {
        Ok(self
            .table
            .read()
            .await
            .find(|m| m.user_id == user_id && m.is_primary))
    }

    async fn list_by_organization(
        &self,
        organization_id: i64,
    ) -> Result<Vec<OrganizationMember>, RepositoryError> {
        let mut members = self
            .table
            .read()
            .await
            .filter(|m| m.organization_id == organization_id);
        members.sort_by_key(|m| (m.created_at, m.id));
        Ok(members)
    }
}
