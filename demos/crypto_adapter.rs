//! Minimal external-adapter usage example.
//!
//! Wires a single `crypto` endpoint backed by an `HttpTransport` polling a
//! fake in-memory provider, drives a foreground request (first sighting,
//! inline fetch), then a manual background tick, then a second foreground
//! request (now served straight from cache).
//!
//! Run with: cargo run --example crypto_adapter

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ea_core::cache::local::LocalCache;
use ea_core::endpoint::AdapterEndpointBuilder;
use ea_core::response_cache::ResponseCache;
use ea_core::subscription::local::LocalSubscriptionSet;
use ea_core::subscription::SubscriptionSet;
use ea_core::transport::http::{HttpPoller, HttpTransport, PollResult, PollSuccess};
use ea_core::transport::{Transport, TransportContext};
use ea_core::validation::{ParamSpec, ParamType, ValidationPlan};
use ea_core::{AdapterBuilder, AdapterRequest};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// Pretends to be an exchange price endpoint: `base` in, a fixed-ish price out.
struct FakeExchange;

#[async_trait]
impl HttpPoller for FakeExchange {
    fn batch(&self, desired: &[Value]) -> Vec<Vec<Value>> {
        // One provider call can price every symbol at once.
        vec![desired.to_vec()]
    }

    async fn poll_batch(&self, _client: &reqwest::Client, batch: &[Value]) -> Vec<PollResult> {
        batch
            .iter()
            .map(|params| {
                let base = params.get("base").and_then(Value::as_str).unwrap_or("UNKNOWN");
                let price = match base {
                    "BTC" => 60_000.0,
                    "ETH" => 3_000.0,
                    _ => 1.0,
                };
                PollResult {
                    params: params.clone(),
                    outcome: Ok(PollSuccess {
                        value: json!({ "base": base, "quote": "USD", "result": price }),
                        status_code: 200,
                        provider_indicated_time: Some(ea_core::time::now_ms()),
                    }),
                }
            })
            .collect()
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::try_init().ok();

    let validation = ValidationPlan::new(vec![
        ParamSpec::new("base", ParamType::String).required(),
        ParamSpec::new("quote", ParamType::String).with_default(json!("USD")),
    ])
    .expect("endpoint schema is internally consistent");

    let cache = Arc::new(ResponseCache::new(Arc::new(LocalCache::default())));
    let subscriptions: Arc<dyn SubscriptionSet> = Arc::new(LocalSubscriptionSet::new(1_000));
    let metrics = Arc::new(ea_core::metrics::Metrics::new().expect("metrics registry initializes"));
    let ctx = Arc::new(TransportContext {
        adapter_name: "demo-adapter".into(),
        endpoint_name: "crypto".into(),
        transport_name: "http".into(),
        cache,
        subscriptions,
        shutdown: CancellationToken::new(),
        metrics: Arc::clone(&metrics),
    });

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(Arc::new(FakeExchange), Duration::from_secs(5), 4, Duration::from_secs(300), Duration::from_secs(30)));
    let endpoint = AdapterEndpointBuilder::new("crypto", validation)
        .with_transport("http", Arc::clone(&transport), Arc::clone(&ctx))
        .expect("transport name is valid")
        .with_default_transport("http")
        .build();

    let adapter = AdapterBuilder::new("demo-adapter")
        .with_endpoint(endpoint)
        .with_metrics(Arc::clone(&metrics))
        .build()
        .expect("metrics registry initializes");

    let request = AdapterRequest {
        id: json!(1),
        data: json!({ "endpoint": "crypto", "base": "BTC" }),
    };

    println!("=== First request (cold, inline fetch) ===");
    let first = adapter.handle(&request).await.expect("request succeeds");
    println!("{}\n", serde_json::to_string_pretty(&first).unwrap());

    println!("=== Background tick (refreshes the subscription) ===");
    transport.background_execute(&ctx).await.expect("tick succeeds");

    println!("=== Second request (served from cache) ===");
    let second = adapter.handle(&request).await.expect("request succeeds");
    println!("{}\n", serde_json::to_string_pretty(&second).unwrap());

    println!("=== /metrics (excerpt) ===");
    println!("{}", adapter.metrics.render().expect("metrics encode"));
}
