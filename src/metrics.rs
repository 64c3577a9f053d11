//! Prometheus metrics registry (spec §6 "Metrics surface", GLOSSARY
//! "Required metrics").
//!
//! `prometheus` is pulled in for this purely because the spec calls for a
//! Prometheus text-exposition endpoint; the crate isn't otherwise exercised
//! anywhere in the teacher, so the registration style below follows the
//! crate's own idiomatic macros rather than a pattern lifted from the pack.

use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder, register_histogram_vec_with_registry,
    register_int_counter_vec_with_registry, register_int_gauge_with_registry,
};

/// All series named in the spec's GLOSSARY "Required metrics" list.
pub struct Metrics {
    registry: Registry,
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
    pub cache_data_get_count: IntCounterVec,
    pub cache_data_set_count: IntCounterVec,
    pub cache_data_staleness_seconds: HistogramVec,
    pub total_data_staleness_seconds: HistogramVec,
    pub bg_execute_total: IntCounterVec,
    pub bg_execute_errors: IntCounterVec,
    pub bg_execute_duration_seconds: HistogramVec,
    pub ws_connection_active: IntGauge,
    pub ws_connection_errors: IntCounterVec,
    pub ws_subscription_active: IntGauge,
    pub ws_subscription_total: IntCounterVec,
    pub ws_message_total: IntCounterVec,
    pub transport_polling_failure_count: IntCounterVec,
    pub transport_polling_duration_seconds: HistogramVec,
    pub rate_limit_credits_spent_total: IntCounterVec,
}

impl Metrics {
    /// # Errors
    ///
    /// Returns an error if a series fails to register (e.g. a duplicate
    /// name), which the spec treats as fatal at startup (§7 "failure to
    /// initialize metrics registry").
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let http_requests_total =
            register_int_counter_vec_with_registry!("http_requests_total", "Total HTTP requests served", &["endpoint", "status"], registry)?;
        let http_request_duration_seconds = register_histogram_vec_with_registry!(
            "http_request_duration_seconds",
            "HTTP request latency",
            &["endpoint"],
            registry
        )?;
        let cache_data_get_count =
            register_int_counter_vec_with_registry!("cache_data_get_count", "Cache get operations", &["backend", "result"], registry)?;
        let cache_data_set_count =
            register_int_counter_vec_with_registry!("cache_data_set_count", "Cache set operations", &["backend"], registry)?;
        let cache_data_staleness_seconds = register_histogram_vec_with_registry!(
            "cache_data_staleness_seconds",
            "now - writtenAt for a served cache entry",
            &["endpoint"],
            registry
        )?;
        let total_data_staleness_seconds = register_histogram_vec_with_registry!(
            "total_data_staleness_seconds",
            "now - providerIndicatedTime for a served value",
            &["endpoint"],
            registry
        )?;
        let bg_execute_total =
            register_int_counter_vec_with_registry!("bg_execute_total", "Background execute ticks run", &["transport"], registry)?;
        let bg_execute_errors =
            register_int_counter_vec_with_registry!("bg_execute_errors", "Background execute ticks that errored", &["transport"], registry)?;
        let bg_execute_duration_seconds =
            register_histogram_vec_with_registry!("bg_execute_duration_seconds", "Background execute tick duration", &["transport"], registry)?;
        let ws_connection_active = register_int_gauge_with_registry!("ws_connection_active", "Open WebSocket connections", registry)?;
        let ws_connection_errors =
            register_int_counter_vec_with_registry!("ws_connection_errors", "WebSocket socket errors", &["endpoint"], registry)?;
        let ws_subscription_active = register_int_gauge_with_registry!("ws_subscription_active", "Live WebSocket subscriptions", registry)?;
        let ws_subscription_total =
            register_int_counter_vec_with_registry!("ws_subscription_total", "WebSocket subscribe/unsubscribe frames sent", &["action"], registry)?;
        let ws_message_total = register_int_counter_vec_with_registry!("ws_message_total", "Inbound WebSocket messages", &["endpoint"], registry)?;
        let transport_polling_failure_count = register_int_counter_vec_with_registry!(
            "transport_polling_failure_count",
            "HTTP transport polling batch failures",
            &["endpoint"],
            registry
        )?;
        let transport_polling_duration_seconds = register_histogram_vec_with_registry!(
            "transport_polling_duration_seconds",
            "HTTP transport polling batch duration",
            &["endpoint"],
            registry
        )?;
        let rate_limit_credits_spent_total =
            register_int_counter_vec_with_registry!("rate_limit_credits_spent_total", "Rate limiter credits spent", &["endpoint"], registry)?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            cache_data_get_count,
            cache_data_set_count,
            cache_data_staleness_seconds,
            total_data_staleness_seconds,
            bg_execute_total,
            bg_execute_errors,
            bg_execute_duration_seconds,
            ws_connection_active,
            ws_connection_errors,
            ws_subscription_active,
            ws_subscription_total,
            ws_message_total,
            transport_polling_failure_count,
            transport_polling_duration_seconds,
            rate_limit_credits_spent_total,
        })
    }

    /// Render in Prometheus text exposition format, for `GET /metrics`
    /// (spec §6).
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails (not expected in practice).
    pub fn render(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_without_duplicate_name_conflicts() {
        Metrics::new().unwrap();
    }

    #[test]
    fn render_produces_prometheus_text_format() {
        let metrics = Metrics::new().unwrap();
        metrics.http_requests_total.with_label_values(&["crypto", "200"]).inc();
        let text = metrics.render().unwrap();
        assert!(text.contains("http_requests_total"));
    }
}
