//! Cache backend abstraction (spec §4.1).
//!
//! Polymorphic over `{ get, set, delete }`, with two implementations: an
//! in-process bounded LRU (`local`) and a remote key-value store (`remote`).
//! Mirrors the teacher's `CacheBackend` trait, generalized to carry the
//! full [`CacheEntry`] spec §3 requires (status code, provider-indicated
//! time, write timestamp) instead of a bare JSON value.

pub mod local;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// `writtenAt`/`maxAge`/`providerIndicatedTime` envelope around a cached
/// response body, per spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub status_code: u16,
    /// Epoch milliseconds this entry was written; drives eviction.
    pub written_at: u64,
    /// Epoch milliseconds the upstream attached to the value, if any; used
    /// for total-staleness metrics rather than eviction.
    pub provider_indicated_time: Option<u64>,
    /// TTL this entry was written with, in milliseconds. `expiry = written_at + max_age`.
    pub max_age_ms: u64,
}

impl CacheEntry {
    #[must_use]
    pub fn expires_at(&self) -> u64 {
        self.written_at + self.max_age_ms
    }

    #[must_use]
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at()
    }
}

/// Core cache backend trait (spec §4.1).
///
/// Implementations never panic on a miss; a miss is always represented as
/// `Ok(None)`/`None`, never an error. Errors are reserved for transport
/// failures against the backing store (`AdapterError::CacheUnavailable`).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch an entry by key. An expired entry must behave as a miss *and*
    /// be removed so the backend doesn't grow unboundedly with dead rows
    /// (spec §4.1: "a lookup with expired entry returns miss AND deletes
    /// the entry").
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Store `entry`, expiring after `ttl`. Overwrites any existing entry
    /// for `key`; last writer wins (spec §4.3 concurrency contract).
    async fn set(&self, key: &str, entry: CacheEntry, ttl: Duration) -> Result<()>;

    /// Remove `key` unconditionally; a no-op if absent.
    async fn delete(&self, key: &str) -> Result<()>;

    fn name(&self) -> &'static str;
}
