use async_trait::async_trait;
use services::{
    auth::ports::{User, UserRepository},
    common::RepositoryError,
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::repositories::utils::Table;

#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    table: RwLock<Table<User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, mut user: User) -> Result<User, RepositoryError> {
        let mut table = self.table.write().await;
        if table.any(|u| u.public_id == user.public_id) {
            return Err(RepositoryError::AlreadyExists(user.public_id));
        }
        user.id = table.next_id();
        table.rows.insert(user.id, user.clone());
        debug!(user_id = user.id, "Created user");
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, RepositoryError> {
        Ok(self.table.read().await.get(id))
    }

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self.table.read().await.find(|u| u.public_id == public_id))
    }

    async fn update(&self, user: User) -> Result<User, RepositoryError> {
        self.table.write().await.replace(user.id, user, "user")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(public_id: &str) -> User {
        User {
            id: 0,
            public_id: public_id.to_string(),
            email: Some("a@example.com".to_string()),
            name: None,
            enabled: true,
            is_guest: false,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_ids_and_rejects_duplicates() {
        let repo = InMemoryUserRepository::new();
        let first = repo.create(user("usr_a")).await.unwrap();
        let second = repo.create(user("usr_b")).await.unwrap();
        assert_eq!((first.id, second.id), (1, 2));
        assert!(matches!(
            repo.create(user("usr_a")).await,
            Err(RepositoryError::AlreadyExists(_))
        ));
        assert_eq!(repo.find_by_public_id("usr_b").await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_update_unknown_user_is_not_found() {
        let repo = InMemoryUserRepository::new();
        let mut ghost = user("usr_x");
        ghost.id = 7;
        assert!(matches!(repo.update(ghost).await, Err(RepositoryError::NotFound(_))));
    }
}
