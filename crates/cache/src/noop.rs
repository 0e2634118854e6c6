use crate::{Cache, CacheError, DistributedMutex};
use async_trait::async_trait;
use std::time::Duration;

/// Cache that stores nothing; every read is a miss.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCache;

#[async_trait]
impl Cache for NoOpCache {
    async fn set_raw(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    async fn get_raw(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Ok(None)
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }

    async fn unlink(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete_pattern(&self, _pattern: &str) -> Result<u64, CacheError> {
        Ok(0)
    }

    async fn exists(&self, _key: &str) -> Result<bool, CacheError> {
        Ok(false)
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn new_mutex(&self, _name: &str, _ttl: Duration) -> Box<dyn DistributedMutex> {
        Box::new(NoOpMutex)
    }

    fn backend_name(&self) -> &'static str {
        "noop"
    }
}

/// Without a shared backend there is nothing to coordinate on, so locking
/// always succeeds immediately.
struct NoOpMutex;

#[async_trait]
impl DistributedMutex for NoOpMutex {
    async fn lock(&mut self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn unlock(&mut self) -> Result<(), CacheError> {
        Ok(())
    }
}
