//! Typed façade over a [`CacheBackend`] (spec §3 "ResponseCache").
//!
//! Endpoints never touch `CacheEntry`/fingerprints directly; they call
//! `write`/`read` with already-fingerprinted keys and get back/hand in the
//! provider timestamps the spec's staleness metrics are computed from.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheBackend, CacheEntry};
use crate::error::Result;
use crate::time::now_ms;

/// One upstream response destined for the cache, as produced by a
/// transport's foreground or background execute (spec §4.4/§4.7).
#[derive(Debug, Clone)]
pub struct CacheWrite {
    pub fingerprint: String,
    pub value: Value,
    pub status_code: u16,
    /// Timestamp the upstream attached to this value, if it reported one
    /// (e.g. an exchange's own `timestamp` field); used for total-staleness
    /// metrics, never for expiry.
    pub provider_indicated_time: Option<u64>,
}

/// A read from the cache plus the staleness bookkeeping spec §3 attaches to
/// every cached response (`providerDataStreamEstablished`, etc. are tracked
/// by the endpoint/transport layer; this carries only what the cache knows).
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub value: Value,
    pub status_code: u16,
    pub written_at: u64,
    pub provider_indicated_time: Option<u64>,
    pub max_age_ms: u64,
}

impl CachedResponse {
    #[must_use]
    pub fn is_stale(&self, now_ms: u64) -> bool {
        now_ms >= self.written_at + self.max_age_ms
    }
}

/// Thin wrapper around a [`CacheBackend`] speaking in fingerprints and
/// provider timestamps instead of raw `get`/`set`.
pub struct ResponseCache {
    backend: Arc<dyn CacheBackend>,
}

impl ResponseCache {
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Write one resolved response, keyed by its fingerprint, with `max_age`
    /// as both the backend TTL hint and the authoritative expiry baked into
    /// the stored [`CacheEntry`].
    pub async fn write(&self, write: CacheWrite, max_age: Duration) -> Result<()> {
        let entry = CacheEntry {
            value: write.value,
            status_code: write.status_code,
            written_at: now_ms(),
            provider_indicated_time: write.provider_indicated_time,
            max_age_ms: max_age.as_millis() as u64,
        };
        self.backend.set(&write.fingerprint, entry, max_age).await
    }

    /// Batch form used by transports that resolve several fingerprints per
    /// tick (spec §4.4 `StreamingTransport`, §4.8 `HttpTransport`).
    pub async fn write_all(&self, writes: Vec<CacheWrite>, max_age: Duration) -> Result<()> {
        for write in writes {
            self.write(write, max_age).await?;
        }
        Ok(())
    }

    /// Read by fingerprint. An expired entry is a miss (the backend itself
    /// deletes it); this never distinguishes "never cached" from "expired".
    pub async fn read(&self, fingerprint: &str) -> Result<Option<CachedResponse>> {
        let Some(entry) = self.backend.get(fingerprint).await? else {
            return Ok(None);
        };
        Ok(Some(CachedResponse {
            value: entry.value,
            status_code: entry.status_code,
            written_at: entry.written_at,
            provider_indicated_time: entry.provider_indicated_time,
            max_age_ms: entry.max_age_ms,
        }))
    }

    /// Read by fingerprint, downgrading a remote-backend outage to a plain
    /// miss instead of propagating it (spec §7 `CacheUnavailable` recovery:
    /// "downgrade to no-cache for the request; log; continue"). Foreground
    /// request paths use this so a flaky remote cache never turns into a
    /// client-facing 500 on what should otherwise be servable.
    pub async fn read_or_degrade(&self, fingerprint: &str) -> Option<CachedResponse> {
        match self.read(fingerprint).await {
            Ok(cached) => cached,
            Err(crate::error::AdapterError::CacheUnavailable(msg)) => {
                tracing::warn!(fingerprint = %fingerprint, error = %msg, "cache backend unavailable, serving without cache");
                None
            }
            Err(e) => {
                tracing::warn!(fingerprint = %fingerprint, error = %e, "unexpected cache read error, serving without cache");
                None
            }
        }
    }

    pub async fn invalidate(&self, fingerprint: &str) -> Result<()> {
        self.backend.delete(fingerprint).await
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::local::LocalCache;
    use serde_json::json;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let rc = ResponseCache::new(Arc::new(LocalCache::default()));
        rc.write(
            CacheWrite {
                fingerprint: "fp1".into(),
                value: json!({"result": 42}),
                status_code: 200,
                provider_indicated_time: Some(1_000),
            },
            Duration::from_secs(30),
        )
        .await
        .unwrap();

        let got = rc.read("fp1").await.unwrap().unwrap();
        assert_eq!(got.value, json!({"result": 42}));
        assert_eq!(got.provider_indicated_time, Some(1_000));
        assert!(!got.is_stale(now_ms()));
    }

    #[tokio::test]
    async fn read_on_unknown_fingerprint_is_none() {
        let rc = ResponseCache::new(Arc::new(LocalCache::default()));
        assert!(rc.read("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let rc = ResponseCache::new(Arc::new(LocalCache::default()));
        rc.write(
            CacheWrite {
                fingerprint: "fp2".into(),
                value: json!(1),
                status_code: 200,
                provider_indicated_time: None,
            },
            Duration::from_secs(30),
        )
        .await
        .unwrap();
        rc.invalidate("fp2").await.unwrap();
        assert!(rc.read("fp2").await.unwrap().is_none());
    }
}
