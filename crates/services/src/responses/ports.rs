use async_trait::async_trait;

use crate::{common::RepositoryError, responses::models::Response};

#[cfg(any(test, feature = "test-mocks"))]
use mockall::automock;

#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait ResponseRepository: Send + Sync {
    async fn create(&self, response: Response) -> Result<Response, RepositoryError>;

    async fn update(&self, response: Response) -> Result<Response, RepositoryError>;

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<Response>, RepositoryError>;

    async fn delete(&self, id: i64) -> Result<(), RepositoryError>;
}
