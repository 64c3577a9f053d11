//! In-process bounded subscription set (spec §4.2 "Local").
//!
//! Backed by a `HashMap` plus a `VecDeque` tracking insertion order, because
//! the bound has to evict the single oldest entry deterministically (spec
//! §8: "CACHE_MAX_SUBSCRIPTIONS=3, add a 4th distinct key, the oldest is
//! evicted, not an arbitrary one") — a requirement plain LRU/TinyLFU caches
//! like Moka don't guarantee, so this one is hand-rolled rather than reused
//! from the cache backends.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

use super::{SubscriptionEntry, SubscriptionSet};
use crate::error::Result;
use crate::time::now_ms;

struct State {
    order: VecDeque<String>,
    entries: HashMap<String, SubscriptionEntry>,
}

/// Bounded, insertion-ordered subscription set.
pub struct LocalSubscriptionSet {
    max_entries: usize,
    state: Mutex<State>,
}

impl LocalSubscriptionSet {
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            state: Mutex::new(State {
                order: VecDeque::new(),
                entries: HashMap::new(),
            }),
        }
    }

    /// Drop expired entries from the front-independent of insertion order;
    /// expiry and insertion order are unrelated so this is a full sweep.
    fn sweep_expired(state: &mut State, now: u64) {
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            state.entries.remove(&key);
            state.order.retain(|k| k != &key);
        }
    }
}

#[async_trait]
impl SubscriptionSet for LocalSubscriptionSet {
    async fn add(&self, key: &str, value: Value, ttl_ms: u64) -> Result<()> {
        let now = now_ms();
        let mut state = self.state.lock();
        Self::sweep_expired(&mut state, now);

        let is_new = !state.entries.contains_key(key);
        if is_new && state.entries.len() >= self.max_entries {
            if let Some(oldest) = state.order.pop_front() {
                state.entries.remove(&oldest);
            }
        }

        if is_new {
            state.order.push_back(key.to_string());
        }
        state.entries.insert(
            key.to_string(),
            SubscriptionEntry {
                value,
                expires_at: now + ttl_ms,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = now_ms();
        let mut state = self.state.lock();
        Self::sweep_expired(&mut state, now);
        Ok(state.entries.get(key).map(|e| e.value.clone()))
    }

    async fn get_all(&self) -> Result<Vec<Value>> {
        let now = now_ms();
        let mut state = self.state.lock();
        Self::sweep_expired(&mut state, now);
        Ok(state
            .order
            .iter()
            .filter_map(|k| state.entries.get(k))
            .map(|e| e.value.clone())
            .collect())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.entries.remove(key);
        state.order.retain(|k| k != key);
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        let now = now_ms();
        let mut state = self.state.lock();
        Self::sweep_expired(&mut state, now);
        Ok(state.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn bounded_set_evicts_oldest_on_overflow() {
        let set = LocalSubscriptionSet::new(3);
        set.add("a", json!(1), 60_000).await.unwrap();
        set.add("b", json!(2), 60_000).await.unwrap();
        set.add("c", json!(3), 60_000).await.unwrap();
        set.add("d", json!(4), 60_000).await.unwrap();

        assert_eq!(set.len().await.unwrap(), 3);
        assert!(set.get("a").await.unwrap().is_none());
        let all = set.get_all().await.unwrap();
        assert_eq!(all, vec![json!(2), json!(3), json!(4)]);
    }

    #[tokio::test]
    async fn refreshing_an_existing_key_does_not_evict() {
        let set = LocalSubscriptionSet::new(2);
        set.add("a", json!(1), 60_000).await.unwrap();
        set.add("b", json!(2), 60_000).await.unwrap();
        set.add("a", json!("refreshed"), 60_000).await.unwrap();

        assert_eq!(set.len().await.unwrap(), 2);
        assert_eq!(set.get("a").await.unwrap(), Some(json!("refreshed")));
    }

    #[tokio::test]
    async fn expired_entries_are_excluded_and_swept() {
        let set = LocalSubscriptionSet::new(10);
        set.add("a", json!(1), 0).await.unwrap();
        // ttl_ms = 0 means expires_at == now, already expired on next check.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        assert!(set.get("a").await.unwrap().is_none());
        assert_eq!(set.len().await.unwrap(), 0);
    }
}
