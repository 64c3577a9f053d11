//! Redis-backed cache backend (spec §4.1 "Remote").
//!
//! Grounded in the teacher's `backends/redis_cache.rs`: a `ConnectionManager`
//! for transparent reconnection, TTL delegated to Redis's own `SET EX`
//! rather than tracked by hand. Keys are namespaced by adapter name so one
//! Redis instance can back several adapters without collision.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{CacheBackend, CacheEntry};
use crate::error::{AdapterError, Result};

/// Redis-backed cache backend.
///
/// On transport error, operations surface [`AdapterError::CacheUnavailable`]
/// rather than panicking; they never treat a connection failure as a cache
/// miss (spec §4.1: "never throws on cache miss", i.e. a *miss* is only ever
/// the store genuinely not having the key).
pub struct RemoteCache {
    conn: ConnectionManager,
    namespace: String,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    sets: Arc<AtomicU64>,
}

impl RemoteCache {
    /// # Errors
    ///
    /// Returns an error if the Redis client cannot be constructed or the
    /// initial connection/PING fails.
    pub async fn new(redis_url: &str, namespace: impl Into<String>) -> anyhow::Result<Self> {
        info!(redis_url = %redis_url, "connecting remote cache backend");
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;

        let mut probe = conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut probe).await?;

        Ok(Self {
            conn,
            namespace: namespace.into(),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            sets: Arc::new(AtomicU64::new(0)),
        })
    }

    fn namespaced(&self, key: &str) -> String {
        Self::namespace_key(&self.namespace, key)
    }

    fn namespace_key(namespace: &str, key: &str) -> String {
        format!("{namespace}:{key}")
    }
}

#[async_trait]
impl CacheBackend for RemoteCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut conn = self.conn.clone();
        let raw: Option<Vec<u8>> = conn
            .get(self.namespaced(key))
            .await
            .map_err(|e| AdapterError::CacheUnavailable(e.to_string()))?;

        let Some(bytes) = raw else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry))
            }
            Err(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, entry: CacheEntry, ttl: Duration) -> Result<()> {
        let bytes = serde_json::to_vec(&entry)
            .map_err(|e| AdapterError::Internal(format!("failed to serialize cache entry: {e}")))?;

        let mut conn = self.conn.clone();
        let ttl_secs = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(self.namespaced(key), bytes, ttl_secs)
            .await
            .map_err(|e| AdapterError::CacheUnavailable(e.to_string()))?;

        self.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ttl_secs, "[Remote] cached key");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(self.namespaced(key))
            .await
            .map_err(|e| AdapterError::CacheUnavailable(e.to_string()))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Remote"
    }
}
