//! Key/value cache used for model registries, per-scope model aggregates
//! and cross-process coordination.
//!
//! Values are JSON-encoded strings. Backings:
//! - [`RedisCache`] for Redis and Valkey
//! - [`MemoryCache`] for single-process deployments and tests
//! - [`NoOpCache`] when the configured backend is unreachable at startup
//!
//! Every write made after a mutating operation is best-effort: callers must
//! stay correct if the whole cache is flushed.

pub mod error;
pub mod keys;
mod memory;
mod noop;
mod redis_cache;

use async_trait::async_trait;
use config::{CacheConfig, CacheKind};
use serde::{de::DeserializeOwned, Serialize};
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, warn};

pub use error::CacheError;
pub use memory::MemoryCache;
pub use noop::NoOpCache;
pub use redis_cache::RedisCache;

/// Raw string operations every backing implements.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Removes the key before returning.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Removes the key; the backend may reclaim memory in the background.
    async fn unlink(&self, key: &str) -> Result<(), CacheError>;

    /// Removes every key matching a glob pattern (`*` wildcard) and returns
    /// how many were removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    async fn health_check(&self) -> Result<(), CacheError>;

    async fn close(&self) -> Result<(), CacheError>;

    /// Creates a mutex named `name` whose hold expires after `ttl`.
    fn new_mutex(&self, name: &str, ttl: Duration) -> Box<dyn DistributedMutex>;

    fn backend_name(&self) -> &'static str;
}

/// Mutex shared between processes through the cache backend.
#[async_trait]
pub trait DistributedMutex: Send + Sync {
    /// Blocks until the lock is acquired or the wait budget is exhausted.
    async fn lock(&mut self) -> Result<(), CacheError>;

    /// Releases the lock if this holder still owns it.
    async fn unlock(&mut self) -> Result<(), CacheError>;
}

impl dyn Cache {
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_string(value)?;
        self.set_raw(key, json, ttl).await
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get_raw(key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Looks the key up and on a miss runs `loader`, caching its result for
    /// `ttl`. Loader errors are returned to the caller; failures to read or
    /// store the cached value are logged and otherwise ignored.
    pub async fn get_with_fallback<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.get::<T>(key).await {
            Ok(Some(value)) => {
                debug!(key = %key, "Cache hit");
                return Ok(value);
            }
            Ok(None) => debug!(key = %key, "Cache miss"),
            Err(e) => warn!(key = %key, error = %e, "Cache read failed, loading from source"),
        }

        let value = loader().await?;

        if let Err(e) = self.set(key, &value, ttl).await {
            warn!(key = %key, error = %e, "Failed to cache value, continuing without cache");
        }

        Ok(value)
    }

    /// Runs `f` while holding the named mutex. The lock is released on every
    /// exit path, including when `f` fails or the returned future is dropped.
    pub async fn with_lock<T, E, F, Fut>(&self, name: &str, ttl: Duration, f: F) -> Result<T, E>
    where
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut mutex = self.new_mutex(name, ttl);
        mutex.lock().await?;
        let guard = LockGuard {
            name: name.to_string(),
            mutex: Some(mutex),
        };
        let result = f().await;
        guard.release().await;
        result
    }

    /// Removes every cached record and returns how many keys went.
    pub async fn invalidate_all(&self) -> Result<u64, CacheError> {
        let mut removed = 0;
        for pattern in keys::invalidation_patterns() {
            removed += self.delete_pattern(&pattern).await?;
        }
        Ok(removed)
    }
}

/// A held mutex. Dropping it unreleased hands the unlock to the runtime.
struct LockGuard {
    name: String,
    mutex: Option<Box<dyn DistributedMutex>>,
}

impl LockGuard {
    async fn release(mut self) {
        if let Some(mut mutex) = self.mutex.take() {
            unlock_logged(&self.name, mutex.as_mut()).await;
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(mut mutex) = self.mutex.take() else {
            return;
        };
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(lock = %name, "Lock holder dropped, releasing in the background");
                handle.spawn(async move { unlock_logged(&name, mutex.as_mut()).await });
            }
            Err(_) => warn!(lock = %name, "Lock dropped outside a runtime, it will expire on its own"),
        }
    }
}

async fn unlock_logged(name: &str, mutex: &mut dyn DistributedMutex) {
    if let Err(e) = mutex.unlock().await {
        warn!(lock = %name, error = %e, "Failed to release lock, it will expire on its own");
    }
}

/// Builds the configured backing. A Redis or Valkey backend that cannot be
/// reached at startup degrades to the no-op cache.
pub async fn connect(config: &CacheConfig) -> Arc<dyn Cache> {
    match config.kind {
        CacheKind::Noop => Arc::new(NoOpCache),
        CacheKind::Memory => Arc::new(MemoryCache::new()),
        CacheKind::Redis | CacheKind::Valkey => match RedisCache::connect(config).await {
            Ok(cache) => match cache.health_check().await {
                Ok(()) => {
                    tracing::info!(backend = cache.backend_name(), "Connected to cache");
                    Arc::new(cache)
                }
                Err(e) => {
                    warn!(error = %e, "Cache health check failed, falling back to no-op cache");
                    Arc::new(NoOpCache)
                }
            },
            Err(e) => {
                warn!(error = %e, "Cache unreachable, falling back to no-op cache");
                Arc::new(NoOpCache)
            }
        },
    }
}

/// Translates a glob pattern with `*` and `?` wildcards into an anchored regex.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<regex::Regex, CacheError> {
    let mut expr = String::with_capacity(pattern.len() + 2);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    regex::Regex::new(&expr).map_err(|e| CacheError::Command(format!("invalid pattern: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    enum LoadError {
        #[error("source unavailable")]
        Unavailable,
        #[error(transparent)]
        Cache(#[from] CacheError),
    }

    #[tokio::test]
    async fn test_get_with_fallback_loads_once() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Vec<String> = cache
                .get_with_fallback("k", Duration::from_secs(60), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, LoadError>(vec!["a".to_string()])
                })
                .await
                .unwrap();
            assert_eq!(value, vec!["a".to_string()]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_with_fallback_propagates_loader_error() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let result: Result<String, LoadError> = cache
            .get_with_fallback("k", Duration::from_secs(60), || async {
                Err(LoadError::Unavailable)
            })
            .await;

        assert!(matches!(result, Err(LoadError::Unavailable)));
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_noop_cache_always_loads() {
        let cache: Arc<dyn Cache> = Arc::new(NoOpCache);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let _: u32 = cache
                .get_with_fallback("k", Duration::from_secs(60), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, LoadError>(7)
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());

        let failed: Result<(), LoadError> = cache
            .with_lock("scope", Duration::from_secs(5), || async {
                Err(LoadError::Unavailable)
            })
            .await;
        assert!(failed.is_err());

        let mut mutex = cache.new_mutex("scope", Duration::from_secs(5));
        mutex.lock().await.unwrap();
        mutex.unlock().await.unwrap();
    }

    #[tokio::test]
    async fn test_with_lock_releases_when_cancelled() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());

        let holder = cache.clone();
        let task = tokio::spawn(async move {
            holder
                .with_lock("scope", Duration::from_secs(30), || {
                    std::future::pending::<Result<(), LoadError>>()
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        let mut mutex = cache.new_mutex("scope", Duration::from_secs(30));
        tokio::time::timeout(Duration::from_secs(1), mutex.lock())
            .await
            .expect("lock released after cancellation")
            .unwrap();
        mutex.unlock().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalidate_all_keeps_locks() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let ttl = Duration::from_secs(60);
        cache.set_raw(&keys::models_list(), "[]".to_string(), ttl).await.unwrap();
        cache.set_raw(&keys::user_by_public_id("usr_1"), "{}".to_string(), ttl).await.unwrap();
        cache.set_raw(&keys::provider("prv_1"), "{}".to_string(), ttl).await.unwrap();

        let mut held = cache.new_mutex("scope", ttl);
        held.lock().await.unwrap();

        assert_eq!(cache.invalidate_all().await.unwrap(), 3);
        assert!(!cache.exists(&keys::models_list()).await.unwrap());

        let mut contender = cache.new_mutex("scope", Duration::from_millis(100));
        assert!(contender.lock().await.is_err());
        held.unlock().await.unwrap();
    }

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("v1:models:*").unwrap();
        assert!(re.is_match("v1:models:org:org_1"));
        assert!(re.is_match("v1:models:"));
        assert!(!re.is_match("v1:user:public_id:usr_1"));

        let re = glob_to_regex("a?c").unwrap();
        assert!(re.is_match("abc"));
        assert!(!re.is_match("abbc"));
    }
}
