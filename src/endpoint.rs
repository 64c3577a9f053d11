//! Request routing and transform pipeline (spec §4.4 `AdapterEndpoint`).

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AdapterError, Result};
use crate::transport::{Transport, TransportContext};
use crate::types::{AdapterRequest, AdapterResponse};
use crate::validation::ValidationPlan;

/// A request transform run before validation (spec §4.4 step 1). Endpoints
/// register these in order; the first is conventionally `symbolOverrider`.
pub trait RequestTransform: Send + Sync {
    fn apply(&self, data: Value, overrides: &HashMap<String, Value>) -> Value;
}

/// Looks up `data.base` in the per-request `overrides` first, then the
/// endpoint's static override map, replacing it in place when matched
/// (spec §4.4 step 1).
pub struct SymbolOverrider;

impl RequestTransform for SymbolOverrider {
    fn apply(&self, mut data: Value, overrides: &HashMap<String, Value>) -> Value {
        let Some(obj) = data.as_object() else {
            return data;
        };
        let Some(base) = obj.get("base").and_then(Value::as_str) else {
            return data;
        };

        let per_request = obj
            .get("overrides")
            .and_then(Value::as_object)
            .and_then(|o| o.get(base))
            .cloned();
        let replacement = per_request.or_else(|| overrides.get(base).cloned());

        if let Some(replacement) = replacement {
            if let Some(obj) = data.as_object_mut() {
                obj.insert("base".to_string(), replacement);
            }
        }
        data
    }
}

/// Picks a transport name for a request when more than one is registered
/// (spec §4.4 step 3).
pub type CustomRouter = dyn Fn(&AdapterRequest) -> Option<String> + Send + Sync;

struct TransportHandle {
    transport: Arc<dyn Transport>,
    ctx: Arc<TransportContext>,
}

/// One named operation within an adapter (spec §3 `Endpoint`, §4.4).
pub struct AdapterEndpoint {
    pub name: String,
    pub aliases: Vec<String>,
    transports: HashMap<String, TransportHandle>,
    validation: ValidationPlan,
    overrides: HashMap<String, Value>,
    custom_router: Option<Box<CustomRouter>>,
    default_transport: Option<String>,
    request_transforms: Vec<Box<dyn RequestTransform>>,
}

/// Builder for [`AdapterEndpoint`]; mirrors the endpoint schema in spec §3.
pub struct AdapterEndpointBuilder {
    name: String,
    aliases: Vec<String>,
    transports: HashMap<String, TransportHandle>,
    validation: ValidationPlan,
    overrides: HashMap<String, Value>,
    custom_router: Option<Box<CustomRouter>>,
    default_transport: Option<String>,
    request_transforms: Vec<Box<dyn RequestTransform>>,
}

impl AdapterEndpointBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>, validation: ValidationPlan) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            transports: HashMap::new(),
            validation,
            overrides: HashMap::new(),
            custom_router: None,
            default_transport: None,
            request_transforms: vec![Box::new(SymbolOverrider)],
        }
    }

    /// # Errors
    ///
    /// Returns [`AdapterError::Internal`] if `name` is not non-empty lowercase
    /// ASCII (spec §3 `Endpoint` invariant).
    pub fn with_transport(mut self, name: impl Into<String>, transport: Arc<dyn Transport>, ctx: Arc<TransportContext>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-') {
            return Err(AdapterError::Internal(format!("transport name {name:?} must be non-empty lowercase ASCII")));
        }
        self.transports.insert(name, TransportHandle { transport, ctx });
        Ok(self)
    }

    #[must_use]
    pub fn with_aliases(mut self, aliases: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_overrides(mut self, overrides: HashMap<String, Value>) -> Self {
        self.overrides = overrides;
        self
    }

    #[must_use]
    pub fn with_default_transport(mut self, name: impl Into<String>) -> Self {
        self.default_transport = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_custom_router(mut self, router: impl Fn(&AdapterRequest) -> Option<String> + Send + Sync + 'static) -> Self {
        self.custom_router = Some(Box::new(router));
        self
    }

    /// Append a transform after `symbolOverrider`. Order of registration is
    /// preserved (spec §4.4 step 1).
    #[must_use]
    pub fn with_transform(mut self, transform: impl RequestTransform + 'static) -> Self {
        self.request_transforms.push(Box::new(transform));
        self
    }

    #[must_use]
    pub fn build(self) -> AdapterEndpoint {
        AdapterEndpoint {
            name: self.name,
            aliases: self.aliases,
            transports: self.transports,
            validation: self.validation,
            overrides: self.overrides,
            custom_router: self.custom_router,
            default_transport: self.default_transport,
            request_transforms: self.request_transforms,
        }
    }
}

impl AdapterEndpoint {
    /// Route and serve one request (spec §4.4 `handle`).
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidInput`] on a validation failure or an
    /// unresolvable/unknown transport.
    pub async fn handle(&self, req: &AdapterRequest) -> Result<AdapterResponse> {
        let mut data = req.data.clone();
        for transform in &self.request_transforms {
            data = transform.apply(data, &self.overrides);
        }
        let transformed_req = AdapterRequest { id: req.id.clone(), data };

        let raw_params = transformed_req.params();
        let validated = self.validation.validate(&raw_params)?;

        let transport_name = self.route(&transformed_req)?;
        let handle = self
            .transports
            .get(&transport_name)
            .ok_or_else(|| AdapterError::invalid_input(format!("unknown transport {transport_name:?}")))?;

        let mut data_with_validated = transformed_req.data.clone();
        if let (Some(obj), Some(validated_obj)) = (data_with_validated.as_object_mut(), validated.as_object()) {
            for (k, v) in validated_obj {
                obj.insert(k.clone(), v.clone());
            }
        }
        let routed_req = AdapterRequest { id: transformed_req.id.clone(), data: data_with_validated };

        match handle.transport.foreground_execute(&handle.ctx, &routed_req).await? {
            Some(resp) => Ok(resp),
            None => Ok(AdapterResponse {
                result: Value::Null,
                data: validated,
                status_code: 202,
                timestamps: crate::types::ResponseTimestamps::default(),
            }),
        }
    }

    fn route(&self, req: &AdapterRequest) -> Result<String> {
        if self.transports.len() == 1 {
            return Ok(self.transports.keys().next().expect("checked len == 1").clone());
        }

        if let Some(router) = &self.custom_router {
            if let Some(name) = router(req) {
                return Ok(name);
            }
        }

        if let Some(name) = req.transport_name() {
            return Ok(name.to_string());
        }

        if let Some(default) = &self.default_transport {
            return Ok(default.clone());
        }

        Err(AdapterError::invalid_input("unable to resolve a transport for this request"))
    }

    /// Run one background tick for every transport registered on this
    /// endpoint. A single bad transport's error is logged and does not
    /// prevent the others from ticking (spec §7: "never let a single bad
    /// subscription abort a tick").
    pub async fn background_execute_all(&self) -> Result<()> {
        for handle in self.transports.values() {
            if let Err(e) = handle.transport.background_execute(&handle.ctx).await {
                tracing::warn!(endpoint = %self.name, error = %e, "transport background execute failed");
            }
        }
        Ok(())
    }

    /// Call `initialize` on every transport registered on this endpoint
    /// (spec §4.5, §4.9 `start`). Run once before the background executor
    /// launches; implementations must tolerate being called again.
    pub async fn initialize_all(&self) -> Result<()> {
        for handle in self.transports.values() {
            handle.transport.initialize(Arc::clone(&handle.ctx)).await?;
        }
        Ok(())
    }

    /// Tick cadence for this endpoint's background executor (spec §4.9,
    /// §6 `BACKGROUND_EXECUTE_MS_WS`/`BACKGROUND_EXECUTE_MS_HTTP`). An
    /// endpoint with a `ws` transport ticks at the WS cadence — subscriptions
    /// need the faster unresponsive-connection check — otherwise at the
    /// HTTP cadence.
    #[must_use]
    pub fn tick_interval(&self, config: &crate::config::AdapterConfig) -> std::time::Duration {
        if self.transports.contains_key("ws") {
            config.background_execute_ms_ws
        } else {
            config.background_execute_ms_http
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn symbol_overrider_prefers_per_request_override() {
        let transform = SymbolOverrider;
        let mut static_overrides = HashMap::new();
        static_overrides.insert("ETH".to_string(), json!("WETH"));

        let data = json!({"base": "ETH", "overrides": {"ETH": "STETH"}});
        let out = transform.apply(data, &static_overrides);
        assert_eq!(out["base"], json!("STETH"));
    }

    #[test]
    fn symbol_overrider_falls_back_to_static_map() {
        let transform = SymbolOverrider;
        let mut static_overrides = HashMap::new();
        static_overrides.insert("ETH".to_string(), json!("WETH"));

        let data = json!({"base": "ETH"});
        let out = transform.apply(data, &static_overrides);
        assert_eq!(out["base"], json!("WETH"));
    }

    #[test]
    fn symbol_overrider_is_a_no_op_without_a_match() {
        let transform = SymbolOverrider;
        let data = json!({"base": "BTC"});
        let out = transform.apply(data, &HashMap::new());
        assert_eq!(out["base"], json!("BTC"));
    }
}
