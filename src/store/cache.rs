use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::AppError;

/// TTL-capable key-value cache. Values are opaque strings; expiry is the
/// cache's responsibility and an expired key reads as absent.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), AppError>;

    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn delete(&self, key: &str) -> Result<(), AppError>;

    /// Drops expired entries, returning how many were removed. Backends with
    /// native expiry return 0.
    async fn purge_expired(&self) -> usize {
        0
    }
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), AppError> {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }

        // Expired: drop it unless a fresh write raced in after the read guard.
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

/// Periodically purges expired entries so keys that are never read again do
/// not accumulate.
pub async fn run_cache_sweeper(cache: Arc<dyn KeyValueCache>, every: Duration) {
    info!(interval_secs = every.as_secs(), "cache sweeper started");

    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let purged = cache.purge_expired().await;
        if purged > 0 {
            debug!(purged, "expired cache entries removed");
        }
    }
}

#[cfg(feature = "redis")]
pub use self::redis_backend::RedisCache;

#[cfg(feature = "redis")]
mod redis_backend {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::KeyValueCache;
    use crate::error::AppError;

    /// Redis-backed cache; expiry is delegated to `SET ... EX`.
    #[derive(Clone)]
    pub struct RedisCache {
        client: redis::Client,
    }

    impl RedisCache {
        pub fn new(redis_url: impl AsRef<str>) -> Result<Self, AppError> {
            let client = redis::Client::open(redis_url.as_ref())
                .map_err(|err| AppError::Internal(format!("invalid redis url: {err}")))?;
            Ok(Self { client })
        }

        async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, AppError> {
            self.client
                .get_multiplexed_async_connection()
                .await
                .map_err(|err| AppError::Internal(format!("redis connection failed: {err}")))
        }
    }

    #[async_trait]
    impl KeyValueCache for RedisCache {
        async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), AppError> {
            let mut conn = self.connection().await?;
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl.as_secs().max(1))
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(|err| AppError::Internal(format!("redis SET failed: {err}")))
        }

        async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
            let mut conn = self.connection().await?;
            redis::cmd("GET")
                .arg(key)
                .query_async::<_, Option<String>>(&mut conn)
                .await
                .map_err(|err| AppError::Internal(format!("redis GET failed: {err}")))
        }

        async fn delete(&self, key: &str) -> Result<(), AppError> {
            let mut conn = self.connection().await?;
            redis::cmd("DEL")
                .arg(key)
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(|err| AppError::Internal(format!("redis DEL failed: {err}")))
        }
    }
}
