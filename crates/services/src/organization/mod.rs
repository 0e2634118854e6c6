pub mod ports;

pub use ports::*;

use crate::{
    auth::{Principal, User, UserRepository},
    common::{internal, now_unix, RepositoryError},
    id_prefixes::{generate_public_id, PREFIX_ORG},
};
use std::sync::Arc;
use tracing::info;

const MAX_NAME_LEN: usize = 128;

pub struct OrganizationService {
    organizations: Arc<dyn OrganizationRepository>,
    members: Arc<dyn OrganizationMemberRepository>,
    users: Arc<dyn UserRepository>,
}

impl OrganizationService {
    pub fn new(
        organizations: Arc<dyn OrganizationRepository>,
        members: Arc<dyn OrganizationMemberRepository>,
        users: Arc<dyn UserRepository>,
    ) -> Self {
        Self {
            organizations,
            members,
            users,
        }
    }

    /// Creates an organization owned by `owner`. The owner's membership
    /// becomes primary unless they already have a primary organization.
    pub async fn create_organization(
        &self,
        owner: &User,
        name: &str,
    ) -> Result<(Organization, OrganizationMember), OrganizationError> {
        let name = name.trim();
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(OrganizationError::InvalidRequest(format!(
                "name must be between 1 and {MAX_NAME_LEN} bytes"
            )));
        }

        let public_id = generate_public_id(PREFIX_ORG)
            .map_err(internal("3d8f0b6a-9c2e-4a71-85d4-e1b7c9f0a263", "Failed to generate organization ID"))?;
        let now = now_unix();
        let organization = self
            .organizations
            .create(Organization {
                id: 0,
                public_id,
                name: name.to_string(),
                owner_id: owner.id,
                enabled: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .map_err(internal("8a1e5c3f-0b7d-4e29-a6f4-2c9d8b1e7a50", "Failed to create organization"))?;

        let has_primary = self
            .members
            .find_primary(owner.id)
            .await
            .map_err(internal("e6c4a2b8-5f1d-4093-9e7a-0d3b8f6c2e14", "Failed to load memberships"))?
            .is_some();
        let member = self
            .members
            .create(OrganizationMember {
                id: 0,
                organization_id: organization.id,
                user_id: owner.id,
                role: OrganizationRole::Owner,
                is_primary: !has_primary,
                created_at: now,
            })
            .await
            .map_err(internal("1f9b7d5e-3a0c-4862-b4e8-7c2a0f9d6b31", "Failed to add organization owner"))?;

        info!(organization_id = %organization.public_id, owner = %owner.public_id, "Created organization");
        Ok((organization, member))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Organization, OrganizationError> {
        self.organizations
            .find_by_id(id)
            .await
            .map_err(internal("b5a3e1c7-4d9f-4b06-8a2e-6f0c4d8b1e95", "Failed to load organization"))?
            .filter(|org| org.enabled)
            .ok_or(OrganizationError::NotFound)
    }

    pub async fn get_by_public_id(&self, public_id: &str) -> Result<Organization, OrganizationError> {
        self.organizations
            .find_by_public_id(public_id)
            .await
            .map_err(internal("c0e8a6f4-2b1d-4d57-9f3c-8e5a1b7d0c62", "Failed to load organization"))?
            .filter(|org| org.enabled)
            .ok_or(OrganizationError::NotFound)
    }

    /// The organization a request acts on: the admin key's organization, or
    /// for user credentials the caller's primary membership.
    pub async fn resolve_for(
        &self,
        principal: &Principal,
        user: &User,
    ) -> Result<Organization, OrganizationError> {
        if let Some(organization_id) = principal.api_key().and_then(|key| key.organization_id) {
            return self.get_by_id(organization_id).await;
        }

        let primary = self
            .members
            .find_primary(user.id)
            .await
            .map_err(internal("4a2c0e8b-6d3f-4a19-b7e5-1c9f3a5d8e07", "Failed to load primary membership"))?
            .ok_or(OrganizationError::NotFound)?;
        self.get_by_id(primary.organization_id).await
    }

    pub async fn membership(
        &self,
        organization: &Organization,
        user: &User,
    ) -> Result<Option<OrganizationMember>, OrganizationError> {
        Ok(self
            .members
            .find(organization.id, user.id)
            .await
            .map_err(internal("9e7c5a3d-1b8f-4c64-a2d0-5f3b9e1c7a48", "Failed to load membership"))?)
    }

    /// Requires a membership whose role satisfies `policy`.
    pub async fn authorize(
        &self,
        organization: &Organization,
        user: &User,
        policy: RolePolicy,
    ) -> Result<OrganizationMember, OrganizationError> {
        let member = self
            .membership(organization, user)
            .await?
            .ok_or(OrganizationError::NotMember)?;
        if !policy.allows(member.role) {
            return Err(OrganizationError::Forbidden);
        }
        Ok(member)
    }

    pub async fn add_member(
        &self,
        organization: &Organization,
        user_public_id: &str,
        role: OrganizationRole,
    ) -> Result<(OrganizationMember, User), OrganizationError> {
        let user = self
            .users
            .find_by_public_id(user_public_id)
            .await
            .map_err(internal("6b4d2f0a-8c5e-4e31-9a7f-3d1b5c9e2f86", "Failed to load user"))?
            .ok_or_else(|| OrganizationError::UserNotFound(user_public_id.to_string()))?;

        let has_primary = self
            .members
            .find_primary(user.id)
            .await
            .map_err(internal("d2f0b8e6-4a1c-4b7d-83e5-9c7a1f3d6b20", "Failed to load memberships"))?
            .is_some();

        let member = self
            .members
            .create(OrganizationMember {
                id: 0,
                organization_id: organization.id,
                user_id: user.id,
                role,
                is_primary: !has_primary,
                created_at: now_unix(),
            })
            .await
            .map_err(|e| match e {
                RepositoryError::AlreadyExists(_) => OrganizationError::AlreadyMember,
                other => internal("0a8e6c4f-2d9b-4f15-b1a3-7e5c3f0b9d74", "Failed to add member")(other).into(),
            })?;

        info!(organization_id = %organization.public_id, user = %user.public_id, role = role.as_str(), "Added organization member");
        Ok((member, user))
    }

    pub async fn list_members(
        &self,
        organization: &Organization,
    ) -> Result<Vec<(OrganizationMember, User)>, OrganizationError> {
        let members = self
            .members
            .list_by_organization(organization.id)
            .await
            .map_err(internal("f7d5b3a1-9e0c-4a28-8c6f-4b2e0d8a5c13", "Failed to list members"))?;

        let mut result = Vec::with_capacity(members.len());
        for member in members {
            let user = self
                .users
                .find_by_id(member.user_id)
                .await
                .map_err(internal("58c6e4a2-0f7d-4b39-a5e1-3c9b7d1f0e86", "Failed to load member user"))?;
            if let Some(user) = user {
                result.push((member, user));
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ApiKey, ApiKeyType, MockUserRepository};

    fn user(id: i64) -> User {
        User {
            id,
            public_id: format!("usr_{id}"),
            email: None,
            name: None,
            enabled: true,
            is_guest: false,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn organization(id: i64) -> Organization {
        Organization {
            id,
            public_id: format!("org_{id}"),
            name: "Acme".to_string(),
            owner_id: 1,
            enabled: true,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_role_policy() {
        assert!(RolePolicy::All.allows(OrganizationRole::Reader));
        assert!(RolePolicy::OwnerOnly.allows(OrganizationRole::Owner));
        assert!(!RolePolicy::OwnerOnly.allows(OrganizationRole::Reader));
    }

    #[tokio::test]
    async fn test_create_organization_makes_primary_owner() {
        let mut orgs = MockOrganizationRepository::new();
        orgs.expect_create().returning(|mut org| {
            org.id = 10;
            Ok(org)
        });
        let mut members = MockOrganizationMemberRepository::new();
        members.expect_find_primary().returning(|_| Ok(None));
        members.expect_create().returning(|mut m| {
            m.id = 1;
            Ok(m)
        });

        let service = OrganizationService::new(
            Arc::new(orgs),
            Arc::new(members),
            Arc::new(MockUserRepository::new()),
        );
        let (org, member) = service.create_organization(&user(1), " Acme ").await.unwrap();
        assert_eq!(org.name, "Acme");
        assert!(org.public_id.starts_with("org_"));
        assert_eq!(member.role, OrganizationRole::Owner);
        assert!(member.is_primary);
        assert_eq!(member.organization_id, 10);
    }

    #[tokio::test]
    async fn test_create_organization_rejects_blank_name() {
        let service = OrganizationService::new(
            Arc::new(MockOrganizationRepository::new()),
            Arc::new(MockOrganizationMemberRepository::new()),
            Arc::new(MockUserRepository::new()),
        );
        assert!(matches!(
            service.create_organization(&user(1), "  ").await,
            Err(OrganizationError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_authorize_reader_on_owner_only_route() {
        let mut members = MockOrganizationMemberRepository::new();
        members.expect_find().returning(|org, user| {
            Ok(Some(OrganizationMember {
                id: 1,
                organization_id: org,
                user_id: user,
                role: OrganizationRole::Reader,
                is_primary: true,
                created_at: 0,
            }))
        });

        let service = OrganizationService::new(
            Arc::new(MockOrganizationRepository::new()),
            Arc::new(members),
            Arc::new(MockUserRepository::new()),
        );
        assert!(service
            .authorize(&organization(1), &user(2), RolePolicy::All)
            .await
            .is_ok());
        assert!(matches!(
            service
                .authorize(&organization(1), &user(2), RolePolicy::OwnerOnly)
                .await,
            Err(OrganizationError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_resolve_prefers_admin_key_organization() {
        let mut orgs = MockOrganizationRepository::new();
        orgs.expect_find_by_id()
            .withf(|id| *id == 5)
            .returning(|id| Ok(Some(organization(id))));

        let service = OrganizationService::new(
            Arc::new(orgs),
            Arc::new(MockOrganizationMemberRepository::new()),
            Arc::new(MockUserRepository::new()),
        );
        let principal = Principal::ApiKey {
            public_id: "usr_1".to_string(),
            key: Box::new(ApiKey {
                id: 1,
                public_id: "key_1".to_string(),
                key_hash: "h".to_string(),
                plaintext_hint: "sk-…aa".to_string(),
                key_type: ApiKeyType::Admin,
                owner_public_id: "usr_1".to_string(),
                organization_id: Some(5),
                description: None,
                enabled: true,
                expires_at: None,
                last_used_at: None,
                created_at: 0,
                updated_at: 0,
            }),
        };
        let org = service.resolve_for(&principal, &user(1)).await.unwrap();
        assert_eq!(org.id, 5);
    }
}
