//! Transport abstraction (spec §4.5) and shared plumbing used by the
//! concrete transports.

pub mod http;
pub mod streaming;
pub mod websocket;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::Result;
use crate::metrics::Metrics;
use crate::response_cache::ResponseCache;
use crate::subscription::SubscriptionSet;
use crate::types::{AdapterRequest, AdapterResponse};

/// Dependencies every transport is wired with at `initialize` (spec §4.5).
pub struct TransportContext {
    pub adapter_name: String,
    pub endpoint_name: String,
    pub transport_name: String,
    pub cache: Arc<ResponseCache>,
    pub subscriptions: Arc<dyn SubscriptionSet>,
    pub shutdown: CancellationToken,
    pub metrics: Arc<Metrics>,
}

/// Transport lifecycle (spec §4.5).
///
/// `foreground_execute` answers a client request directly; `background_execute`
/// is invoked by the `BackgroundExecutor` on a fixed cadence and does the
/// work that keeps the cache warm for the *next* foreground read.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Wire dependencies. Implementations must tolerate being called more
    /// than once (spec: "idempotent").
    async fn initialize(&self, ctx: Arc<TransportContext>) -> Result<()>;

    /// Serve one request. `Ok(None)` on a cache miss with no in-line fetch
    /// available — the endpoint then surfaces a retry hint to the client.
    async fn foreground_execute(&self, ctx: &TransportContext, req: &AdapterRequest) -> Result<Option<AdapterResponse>>;

    /// Run one tick of background work. Returns once the tick's work (not
    /// necessarily every in-flight provider call) is complete.
    async fn background_execute(&self, ctx: &TransportContext) -> Result<()>;
}

/// Register `params` for background refresh, downgrading a subscription-set
/// outage to a no-op instead of failing the whole request (spec §7
/// `CacheUnavailable` recovery: "downgrade to no-cache for the request;
/// log; continue" — the remote subscription-set backend shares the same
/// failure mode as the remote cache backend).
pub async fn register_subscription(subscriptions: &Arc<dyn SubscriptionSet>, key: &str, params: Value, ttl_ms: u64) {
    if let Err(e) = subscriptions.add(key, params, ttl_ms).await {
        warn!(key = %key, error = %e, "failed to register subscription, background refresh will not pick this up until it succeeds");
    }
}

/// In-flight request coalescing: ensures at most one concurrent fetch per
/// key proceeds to the provider while others wait on the same lock and
/// then re-check the cache.
///
/// Grounded in the teacher's `cache_manager.rs` in-flight map: a
/// `DashMap<String, Arc<Mutex<()>>>` handed out per key, paired with a
/// `CleanupGuard` so the entry is removed on every exit path (including a
/// panic), not just the success path.
pub struct InFlightCoalescer {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl InFlightCoalescer {
    #[must_use]
    pub fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    /// Acquire the per-key lock, returning a guard that releases it and
    /// removes the map entry on drop.
    pub async fn acquire(&self, key: &str) -> CoalesceGuard<'_> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let permit = lock.lock_owned().await;
        CoalesceGuard {
            map: &self.locks,
            key: key.to_string(),
            _permit: permit,
        }
    }
}

impl Default for InFlightCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CoalesceGuard<'a> {
    map: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    _permit: tokio::sync::OwnedMutexGuard<()>,
}

impl Drop for CoalesceGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}
