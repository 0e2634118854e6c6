use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache connection error: {0}")]
    Connection(String),
    #[error("Cache command failed: {0}")]
    Command(String),
    #[error("Cache value could not be encoded or decoded: {0}")]
    Serialization(String),
    #[error("Timed out waiting for lock '{0}'")]
    LockTimeout(String),
    #[error("Lock '{0}' is not held")]
    LockNotHeld(String),
    #[error("Cache client is closed")]
    Closed,
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            CacheError::Connection(e.to_string())
        } else {
            CacheError::Command(e.to_string())
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}
