//! Expiring parameter-tuple sets (spec §4.2 "SubscriptionSet").
//!
//! A subscription set tracks which distinct request parameter tuples a
//! streaming transport is currently expected to keep warm. Entries expire
//! on their own schedule independent of the response cache; `local` bounds
//! the set by evicting the oldest entry (FIFO) once at capacity, `remote`
//! stores the set as a Redis sorted set keyed by expiry.

pub mod local;
pub mod remote;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// A single tracked subscription: the value the streaming transport
/// actually subscribes with (e.g. the decoded request parameters), plus
/// when this entry expires.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionEntry {
    pub value: Value,
    /// Epoch milliseconds after which this entry is no longer returned by
    /// `get`/`get_all` and is eligible for eviction.
    pub expires_at: u64,
}

/// Set of live subscriptions for one streaming endpoint (spec §4.2).
#[async_trait]
pub trait SubscriptionSet: Send + Sync {
    /// Insert or refresh `key`, resetting its expiry to `now + ttl`. If the
    /// set is at capacity and `key` is new, the oldest entry is evicted
    /// first (spec §8 bounded-set scenario).
    async fn add(&self, key: &str, value: Value, ttl_ms: u64) -> Result<()>;

    /// Look up a single entry by key, `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// All non-expired entries, oldest insertion first.
    async fn get_all(&self) -> Result<Vec<Value>>;

    /// Remove `key` unconditionally.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Number of live (non-expired) entries.
    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
