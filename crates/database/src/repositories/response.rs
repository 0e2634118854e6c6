use async_trait::async_trait;
use services::{
    common::RepositoryError,
    responses::{Response, ResponseRepository},
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::repositories::utils::Table;

#[derive(Debug, Default)]
pub struct InMemoryResponseRepository {
    table: RwLock<Table<Response>>,
}

impl InMemoryResponseRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResponseRepository for InMemoryResponseRepository {
    async fn create(&self, mut response: Response) -> Result<Response, RepositoryError> {
        let mut table = self.table.write().await;
        if table.any(|r| r.public_id == response.public_id) {
            return Err(RepositoryError::AlreadyExists(response.public_id));
        }
        response.id = table.next_id();
        response.items = None;
        table.rows.insert(response.id, response.clone());
        debug!(response_id = %response.public_id, "Stored response");
        Ok(response)
    }

    async fn update(&self, mut response: Response) -> Result<Response, RepositoryError> {
        response.items = None;
        self.table.write().await.replace(response.id, response, "response")
    }

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<Response>, RepositoryError> {
        Ok(self.table.read().await.find(|r| r.public_id == public_id))
    }

    async fn delete(&self, id: i64) -> Result<(), RepositoryError> {
        self.table.write().await.remove(id, "response").map(|_| ())
    }
}
