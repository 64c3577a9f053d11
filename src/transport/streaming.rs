//! Subscription delta computation shared by streaming-style transports
//! (spec §4.6).
//!
//! A subscription's identity for diffing purposes is its canonicalized JSON
//! encoding (the same canonicalization `fingerprint` uses), since the spec
//! defines `SubscriptionSet::getAll` to return bare values rather than
//! `(key, value)` pairs and two structurally-equal values always represent
//! the same logical subscription.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

use crate::fingerprint::canonicalize;

fn identity(value: &Value) -> String {
    serde_json::to_string(&canonicalize(value)).unwrap_or_default()
}

/// Result of diffing one tick's desired set against the previous tick's
/// `lastKnown` set (spec §4.6 step 2).
#[derive(Debug, Clone, Default)]
pub struct SubscriptionDelta {
    /// Entries desired now but absent from `lastKnown`.
    pub new: Vec<Value>,
    /// Entries in `lastKnown` but no longer desired.
    pub stale: Vec<Value>,
    /// The full desired set for this tick, verbatim.
    pub desired: Vec<Value>,
}

/// Tracks `lastKnown` across ticks and computes the per-tick delta.
///
/// Grounded in the spec's invariant that `(new ∪ lastKnown) \ stale =
/// desired`: after each `tick`, `lastKnown` is replaced wholesale by
/// `desired`, which trivially preserves that invariant for the next call.
pub struct StreamingState {
    last_known: Mutex<HashMap<String, Value>>,
}

impl StreamingState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_known: Mutex::new(HashMap::new()),
        }
    }

    /// Compute `new`/`stale`/`desired` for this tick and advance `lastKnown`
    /// to `desired`.
    pub fn tick(&self, desired: Vec<Value>) -> SubscriptionDelta {
        let desired_by_id: HashMap<String, Value> =
            desired.iter().map(|v| (identity(v), v.clone())).collect();

        let mut last_known = self.last_known.lock();

        let new: Vec<Value> = desired_by_id
            .iter()
            .filter(|(id, _)| !last_known.contains_key(*id))
            .map(|(_, v)| v.clone())
            .collect();

        let stale: Vec<Value> = last_known
            .iter()
            .filter(|(id, _)| !desired_by_id.contains_key(*id))
            .map(|(_, v)| v.clone())
            .collect();

        *last_known = desired_by_id;

        SubscriptionDelta { new, stale, desired }
    }

    #[must_use]
    pub fn last_known_count(&self) -> usize {
        self.last_known.lock().len()
    }
}

impl Default for StreamingState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_tick_everything_is_new() {
        let state = StreamingState::new();
        let delta = state.tick(vec![json!({"base": "ETH"}), json!({"base": "BTC"})]);
        assert_eq!(delta.new.len(), 2);
        assert!(delta.stale.is_empty());
    }

    #[test]
    fn unchanged_entries_are_neither_new_nor_stale() {
        let state = StreamingState::new();
        state.tick(vec![json!({"base": "ETH"})]);
        let delta = state.tick(vec![json!({"base": "ETH"})]);
        assert!(delta.new.is_empty());
        assert!(delta.stale.is_empty());
    }

    #[test]
    fn delta_correctness_invariant_holds() {
        let state = StreamingState::new();
        state.tick(vec![json!({"base": "ETH"}), json!({"base": "BTC"})]);
        let delta = state.tick(vec![json!({"base": "BTC"}), json!({"base": "LTC"})]);

        assert_eq!(delta.new, vec![json!({"base": "LTC"})]);
        assert_eq!(delta.stale, vec![json!({"base": "ETH"})]);
        assert_eq!(delta.desired.len(), 2);
    }

    #[test]
    fn dropping_an_entry_marks_it_stale() {
        let state = StreamingState::new();
        state.tick(vec![json!({"base": "ETH"})]);
        let delta = state.tick(vec![]);
        assert_eq!(delta.stale, vec![json!({"base": "ETH"})]);
        assert_eq!(state.last_known_count(), 0);
    }
}
