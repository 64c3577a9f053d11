//! Adapter: top-level owner of endpoints, shared cache, and the background
//! executor (spec §4.9).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::AdapterConfig;
use crate::endpoint::AdapterEndpoint;
use crate::error::{AdapterError, Result};
use crate::metrics::Metrics;
use crate::types::{AdapterRequest, AdapterResponse};

/// Builder for [`Adapter`], mirroring the teacher's `CacheSystemBuilder`
/// shape (fields accumulate, `build` validates and assembles).
pub struct AdapterBuilder {
    name: String,
    endpoints: HashMap<String, Arc<AdapterEndpoint>>,
    metrics: Option<Arc<Metrics>>,
}

impl AdapterBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoints: HashMap::new(),
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: AdapterEndpoint) -> Self {
        let name = endpoint.name.clone();
        let aliases = endpoint.aliases.clone();
        let shared = Arc::new(endpoint);
        self.endpoints.insert(name, Arc::clone(&shared));
        for alias in aliases {
            self.endpoints.insert(alias, Arc::clone(&shared));
        }
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// # Errors
    ///
    /// Returns [`AdapterError::Internal`] if metrics registry
    /// initialization was not provided and cannot be built (spec §7:
    /// "failure to initialize metrics registry" is fatal at startup).
    pub fn build(self) -> Result<Adapter> {
        let metrics = match self.metrics {
            Some(m) => m,
            None => Arc::new(Metrics::new().map_err(|e| AdapterError::Internal(e.to_string()))?),
        };

        Ok(Adapter {
            name: self.name,
            endpoints: self.endpoints,
            metrics,
            shutdown: CancellationToken::new(),
        })
    }
}

/// Owns endpoints and drives the background executor across their
/// transports (spec §4.9).
pub struct Adapter {
    pub name: String,
    endpoints: HashMap<String, Arc<AdapterEndpoint>>,
    pub metrics: Arc<Metrics>,
    shutdown: CancellationToken,
}

impl Adapter {
    /// Route a request by endpoint name/alias to its `AdapterEndpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidInput`] for an unknown endpoint name
    /// (spec §6: "404 unknown endpoint" is the HTTP-layer mapping of this;
    /// callers at the transport boundary translate accordingly).
    pub async fn handle(&self, req: &AdapterRequest) -> Result<AdapterResponse> {
        let endpoint_name = req.endpoint_name().unwrap_or("unknown");
        let timer = self.metrics.http_request_duration_seconds.with_label_values(&[endpoint_name]).start_timer();
        let result = self.handle_inner(req).await;
        timer.observe_duration();

        let status = match &result {
            Ok(resp) => resp.status_code.to_string(),
            Err(e) => e.status_code().to_string(),
        };
        self.metrics.http_requests_total.with_label_values(&[endpoint_name, &status]).inc();
        result
    }

    async fn handle_inner(&self, req: &AdapterRequest) -> Result<AdapterResponse> {
        let endpoint_name = req.endpoint_name().ok_or_else(|| AdapterError::invalid_input("request is missing `data.endpoint`"))?;
        let endpoint = self
            .endpoints
            .get(endpoint_name)
            .ok_or_else(|| AdapterError::invalid_input(format!("unknown endpoint {endpoint_name:?}")))?;
        endpoint.handle(req).await
    }

    /// Bring the adapter fully online (spec §4.9 `start`): call `initialize`
    /// on every transport of every endpoint, then launch the background
    /// executor at the cadence `config` prescribes per endpoint. Mirrors
    /// the teacher's builder handing shared dependencies to every backend
    /// before anything starts reading from them.
    ///
    /// # Errors
    ///
    /// Propagates the first transport's `initialize` failure; a transport
    /// that cannot wire its dependencies must not be left running a
    /// background loop against a half-initialized context.
    pub async fn start(&self, config: &AdapterConfig) -> Result<Vec<JoinHandle<()>>> {
        let mut seen: Vec<*const AdapterEndpoint> = Vec::new();
        let mut tick_interval_by_transport = HashMap::new();

        for endpoint in self.endpoints.values() {
            let ptr = Arc::as_ptr(endpoint);
            if seen.contains(&ptr) {
                continue;
            }
            seen.push(ptr);
            endpoint.initialize_all().await?;
            tick_interval_by_transport.insert(endpoint.name.clone(), endpoint.tick_interval(config));
        }

        Ok(self.start_background_executor(tick_interval_by_transport))
    }

    /// Launch one long-lived background task per `(endpoint, transport)`
    /// pair, each ticking on its own cadence and honoring the shutdown
    /// signal (spec §4.9, §9 "structure as independent long-lived tasks").
    ///
    /// Fairness across transports falls out of each pair running on its own
    /// task rather than a single shared loop serializing them; within one
    /// transport, ticks are still serialized because each task awaits its
    /// own previous tick before sleeping and re-ticking.
    ///
    /// `self.endpoints` maps every alias to the same `Arc<AdapterEndpoint>`
    /// as its canonical name, so `values()` would otherwise yield the same
    /// endpoint once per alias; dedupe by pointer identity first or an
    /// aliased endpoint gets its background loop spawned redundantly.
    #[must_use]
    pub fn start_background_executor(&self, tick_interval_by_transport: HashMap<String, Duration>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        let mut seen: Vec<*const AdapterEndpoint> = Vec::new();

        for endpoint in self.endpoints.values() {
            let ptr = Arc::as_ptr(endpoint);
            if seen.contains(&ptr) {
                continue;
            }
            seen.push(ptr);

            let endpoint = Arc::clone(endpoint);
            let shutdown = self.shutdown.clone();
            let interval = tick_interval_by_transport.get(&endpoint.name).copied().unwrap_or(Duration::from_secs(1));
            let metrics = Arc::clone(&self.metrics);

            let handle = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = tokio::time::sleep(interval) => {
                            let timer = metrics.bg_execute_duration_seconds.with_label_values(&[&endpoint.name]).start_timer();
                            let outcome = endpoint.background_execute_all().await;
                            timer.observe_duration();
                            metrics.bg_execute_total.with_label_values(&[&endpoint.name]).inc();
                            if let Err(e) = outcome {
                                metrics.bg_execute_errors.with_label_values(&[&endpoint.name]).inc();
                                error!(endpoint = %endpoint.name, error = %e, "background execute tick failed");
                            }
                        }
                        () = shutdown.cancelled() => {
                            info!(endpoint = %endpoint.name, "background executor stopping");
                            break;
                        }
                    }
                }
            });
            handles.push(handle);
        }

        handles
    }

    /// Signal cancellation and wait up to `grace` for in-flight ticks to
    /// finish (spec §4.9 "Shutdown").
    pub async fn shutdown(&self, handles: Vec<JoinHandle<()>>, grace: Duration) {
        self.shutdown.cancel();
        let join_all = futures_util::future::join_all(handles);
        if tokio::time::timeout(grace, join_all).await.is_err() {
            warn!("background tasks did not stop within the shutdown grace window");
        }
    }
}
