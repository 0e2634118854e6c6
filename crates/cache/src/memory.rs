use crate::{glob_to_regex, Cache, CacheError, DistributedMutex};
use async_trait::async_trait;
use moka::{future::Cache as MokaCache, Expiry};
use std::time::{Duration, Instant};

const MAX_ENTRIES: u64 = 100_000;
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Duration,
}

/// Gives each entry the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process cache backed by moka.
#[derive(Clone)]
pub struct MemoryCache {
    entries: MokaCache<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: MokaCache::builder()
                .max_capacity(MAX_ENTRIES)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), Entry { value, ttl }).await;
        Ok(())
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.get(key).await.map(|entry| entry.value))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.invalidate(key).await;
        Ok(())
    }

    async fn unlink(&self, key: &str) -> Result<(), CacheError> {
        self.delete(key).await
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let matcher = glob_to_regex(pattern)?;
        let matching: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, _)| matcher.is_match(key))
            .map(|(key, _)| String::clone(&key))
            .collect();

        for key in &matching {
            self.entries.invalidate(key).await;
        }
        Ok(matching.len() as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.contains_key(key))
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.entries.invalidate_all();
        Ok(())
    }

    fn new_mutex(&self, name: &str, ttl: Duration) -> Box<dyn DistributedMutex> {
        Box::new(MemoryMutex {
            entries: self.entries.clone(),
            key: format!("lock:{name}"),
            token: uuid::Uuid::new_v4().to_string(),
            ttl,
            held: false,
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryMutex {
    entries: MokaCache<String, Entry>,
    key: String,
    token: String,
    ttl: Duration,
    held: bool,
}

#[async_trait]
impl DistributedMutex for MemoryMutex {
    async fn lock(&mut self) -> Result<(), CacheError> {
        let deadline = Instant::now() + self.ttl;
        loop {
            let entry = self
                .entries
                .entry(self.key.clone())
                .or_insert_with(async {
                    Entry {
                        value: self.token.clone(),
                        ttl: self.ttl,
                    }
                })
                .await;

            if entry.value().value == self.token {
                self.held = true;
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(CacheError::LockTimeout(self.key.clone()));
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }

    async fn unlock(&mut self) -> Result<(), CacheError> {
        if !self.held {
            return Err(CacheError::LockNotHeld(self.key.clone()));
        }
        self.held = false;
        match self.entries.get(&self.key).await {
            Some(entry) if entry.value == self.token => {
                self.entries.invalidate(&self.key).await;
                Ok(())
            }
            _ => Err(CacheError::LockNotHeld(self.key.clone())),
        }
    }
}
