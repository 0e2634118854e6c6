use crate::{Cache, CacheError, DistributedMutex};
use async_trait::async_trait;
use config::{CacheConfig, CacheKind};
use redis::{aio::ConnectionManager, AsyncCommands, Client, IntoConnectionInfo, Script};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};
use tracing::debug;

const SCAN_BATCH: usize = 1000;
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(1);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Deletes the lock only when it still carries our token.
const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Cache over a Redis-protocol server. `ConnectionManager` reconnects on its
/// own and multiplexes commands, so clones share one connection.
pub struct RedisCache {
    connection: ConnectionManager,
    backend: &'static str,
    closed: AtomicBool,
}

impl RedisCache {
    pub async fn connect(config: &CacheConfig) -> Result<Self, CacheError> {
        let mut info = config
            .url
            .as_str()
            .into_connection_info()
            .map_err(|e| CacheError::Connection(format!("Invalid cache URL: {e}")))?;
        info.redis.db = config.db;
        if let Some(password) = &config.password {
            info.redis.password = Some(password.clone());
        }

        let client = Client::open(info)
            .map_err(|e| CacheError::Connection(format!("Failed to create cache client: {e}")))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Connection(format!("Failed to connect to cache: {e}")))?;

        Ok(Self {
            connection,
            backend: match config.kind {
                CacheKind::Redis => "redis",
                _ => "valkey",
            },
            closed: AtomicBool::new(false),
        })
    }

    fn conn(&self) -> Result<ConnectionManager, CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(self.connection.clone())
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn()?;
        // SET EX rejects zero, so round sub-second TTLs up
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, seconds).await?;
        debug!(key = %key, ttl_secs = seconds, "Cache set");
        Ok(())
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn()?;
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn()?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn unlink(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn()?;
        conn.unlink::<_, ()>(key).await?;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn()?;
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let count: u64 = conn.unlink(&keys).await?;
                removed += count;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(pattern = %pattern, removed, "Cache pattern delete");
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn()?;
        Ok(conn.exists::<_, bool>(key).await?)
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        let mut conn = self.conn()?;
        let cmd = redis::cmd("PING");
        let ping = cmd.query_async::<String>(&mut conn);
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, ping).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(CacheError::Connection(format!("Cache ping failed: {e}"))),
            Err(_) => Err(CacheError::Connection("Cache ping timed out".to_string())),
        }
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn new_mutex(&self, name: &str, ttl: Duration) -> Box<dyn DistributedMutex> {
        Box::new(RedisMutex {
            connection: self.connection.clone(),
            name: name.to_string(),
            token: uuid::Uuid::new_v4().to_string(),
            ttl,
            held: false,
        })
    }

    fn backend_name(&self) -> &'static str {
        self.backend
    }
}

/// `SET NX PX` lock. The random token keeps one holder from releasing a lock
/// that expired and was taken by another.
struct RedisMutex {
    connection: ConnectionManager,
    name: String,
    token: String,
    ttl: Duration,
    held: bool,
}

#[async_trait]
impl DistributedMutex for RedisMutex {
    async fn lock(&mut self) -> Result<(), CacheError> {
        let deadline = Instant::now() + self.ttl;
        let ttl_ms = self.ttl.as_millis().max(1) as u64;

        loop {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&self.name)
                .arg(&self.token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut self.connection)
                .await?;

            if acquired.is_some() {
                self.held = true;
                debug!(lock = %self.name, "Lock acquired");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(CacheError::LockTimeout(self.name.clone()));
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }

    async fn unlock(&mut self) -> Result<(), CacheError> {
        if !self.held {
            return Err(CacheError::LockNotHeld(self.name.clone()));
        }
        self.held = false;

        let released: i64 = Script::new(RELEASE_LOCK_SCRIPT)
            .key(&self.name)
            .arg(&self.token)
            .invoke_async(&mut self.connection)
            .await?;

        if released == 0 {
            return Err(CacheError::LockNotHeld(self.name.clone()));
        }
        debug!(lock = %self.name, "Lock released");
        Ok(())
    }
}
