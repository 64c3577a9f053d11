//! Wire request/response shapes (spec §6).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Inbound request body: `{ id, data: { endpoint?, transport?, overrides?, ...params } }`.
///
/// `data` is kept as a flat JSON object rather than a typed struct because
/// its shape is endpoint-specific; [`AdapterRequest::param`] and friends
/// read out of it without requiring every endpoint's parameters to be
/// known at compile time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdapterRequest {
    pub id: Value,
    pub data: Value,
}

impl AdapterRequest {
    #[must_use]
    pub fn endpoint_name(&self) -> Option<&str> {
        self.data.get("endpoint").and_then(Value::as_str)
    }

    #[must_use]
    pub fn transport_name(&self) -> Option<&str> {
        self.data.get("transport").and_then(Value::as_str)
    }

    /// Per-request symbol overrides (`data.overrides`), distinct from an
    /// endpoint's static override map.
    #[must_use]
    pub fn overrides(&self) -> Option<&serde_json::Map<String, Value>> {
        self.data.get("overrides").and_then(Value::as_object)
    }

    #[must_use]
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// The endpoint parameters, i.e. `data` minus the routing keys
    /// (`endpoint`, `transport`, `overrides`) that aren't themselves
    /// parameters.
    #[must_use]
    pub fn params(&self) -> Value {
        let mut map = match self.data.as_object() {
            Some(m) => m.clone(),
            None => return Value::Null,
        };
        map.remove("endpoint");
        map.remove("transport");
        map.remove("overrides");
        Value::Object(map)
    }
}

/// Timestamps attached to every response (spec §4.3, §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseTimestamps {
    #[serde(rename = "providerDataReceived")]
    pub provider_data_received: u64,
    #[serde(rename = "providerDataStreamEstablished", skip_serializing_if = "Option::is_none")]
    pub provider_data_stream_established: Option<u64>,
    #[serde(rename = "providerIndicatedTime", skip_serializing_if = "Option::is_none")]
    pub provider_indicated_time: Option<u64>,
}

/// Outbound response body (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterResponse {
    pub result: Value,
    pub data: Value,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub timestamps: ResponseTimestamps,
}

impl AdapterResponse {
    /// Build a client-facing error response: no cached/fresh result, just a
    /// status code and message (spec §7 "client-facing errors include
    /// statusCode, message, and, when available, providerStatusCode").
    #[must_use]
    pub fn error(status_code: u16, message: impl Into<String>, provider_status_code: Option<u16>) -> Self {
        let mut data = HashMap::new();
        data.insert("message".to_string(), Value::String(message.into()));
        if let Some(code) = provider_status_code {
            data.insert("providerStatusCode".to_string(), Value::Number(code.into()));
        }
        Self {
            result: Value::Null,
            data: serde_json::to_value(data).unwrap_or(Value::Null),
            status_code,
            timestamps: ResponseTimestamps::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_excludes_routing_keys() {
        let req = AdapterRequest {
            id: json!("1"),
            data: json!({"endpoint": "crypto", "transport": "http", "overrides": {}, "base": "ETH", "quote": "USD"}),
        };
        assert_eq!(req.params(), json!({"base": "ETH", "quote": "USD"}));
        assert_eq!(req.endpoint_name(), Some("crypto"));
        assert_eq!(req.transport_name(), Some("http"));
    }

    #[test]
    fn error_response_carries_provider_status_code() {
        let resp = AdapterResponse::error(502, "upstream failure", Some(503));
        assert_eq!(resp.status_code, 502);
        assert_eq!(resp.data["providerStatusCode"], json!(503));
    }
}
