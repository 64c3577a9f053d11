//! Wall-clock helpers.
//!
//! Every staleness/expiry computation in this crate (spec §3, §8) is defined
//! against epoch milliseconds rather than `Instant`, because cache entries
//! and subscription expiries are compared against `providerIndicatedTime`
//! values that arrive from the outside world already as epoch timestamps.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as epoch milliseconds.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
