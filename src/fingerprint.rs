//! Deterministic cache-key derivation (spec §3 "Fingerprint").
//!
//! Two semantically equal requests must hash to the same fingerprint;
//! everything else about the encoding is an implementation detail. We get
//! there by canonicalizing the parameter JSON (sorted object keys,
//! normalized scalars) before hashing, the same general approach the
//! `response_cache` module in the retrieval pack uses to key on request
//! shape (method + path + body hash) rather than raw bytes.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// A `cacheKeyGenerator` override for a single endpoint (spec §3).
///
/// Given the canonicalized parameters, returns a replacement string to use
/// in place of the default canonical JSON encoding. Endpoints that don't
/// need one simply never install this hook.
pub trait CacheKeyGenerator: Send + Sync {
    fn generate(&self, canonical_params: &str) -> String;
}

/// Compute the fingerprint for a request.
///
/// `params` is canonicalized (sorted keys, normalized scalars) before being
/// folded into the digest alongside the adapter/endpoint/transport names,
/// so unrelated requests never collide and equivalent ones always agree.
#[must_use]
pub fn fingerprint(
    adapter_name: &str,
    endpoint_name: &str,
    transport_name: &str,
    params: &Value,
    key_generator: Option<&dyn CacheKeyGenerator>,
) -> String {
    let canonical = canonicalize(params);
    let canonical_json = serde_json::to_string(&canonical).unwrap_or_default();
    let param_component = match key_generator {
        Some(generator) => generator.generate(&canonical_json),
        None => canonical_json,
    };

    let mut hasher = Sha256::new();
    hasher.update(adapter_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(endpoint_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(transport_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(param_component.as_bytes());

    hex::encode(hasher.finalize())
}

/// Recursively sort object keys and normalize scalar encodings so that
/// structurally-equivalent-but-differently-serialized JSON values compare
/// equal once canonicalized.
///
/// - Object keys are sorted lexicographically (applies recursively).
/// - Numbers that are mathematically integral (e.g. `1.0`) are normalized
///   to their integer form so `1` and `1.0` canonicalize identically.
/// - Booleans and strings pass through unchanged; arrays preserve order
///   (order is semantically meaningful for arrays, unlike object keys).
#[must_use]
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(&String, &Value)> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    return Value::Number((f as i64).into());
                }
            }
            value.clone()
        }
        other => other.clone(),
    }
}

/// Minimal hex encoding to avoid pulling in the `hex` crate for one call site.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut out = String::with_capacity(bytes.as_ref().len() * 2);
        for byte in bytes.as_ref() {
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equivalent_requests_fingerprint_identically() {
        let a = json!({"base": "ETH", "quote": "USD"});
        let b = json!({"quote": "USD", "base": "ETH"});
        assert_eq!(
            fingerprint("coingecko", "crypto", "http", &a, None),
            fingerprint("coingecko", "crypto", "http", &b, None)
        );
    }

    #[test]
    fn numeric_encoding_is_normalized() {
        let a = json!({"amount": 1});
        let b = json!({"amount": 1.0});
        assert_eq!(
            fingerprint("x", "y", "z", &a, None),
            fingerprint("x", "y", "z", &b, None)
        );
    }

    #[test]
    fn different_params_fingerprint_differently() {
        let a = json!({"base": "ETH"});
        let b = json!({"base": "BTC"});
        assert_ne!(
            fingerprint("x", "y", "z", &a, None),
            fingerprint("x", "y", "z", &b, None)
        );
    }

    #[test]
    fn transport_name_participates_in_the_fingerprint() {
        let p = json!({"base": "ETH"});
        assert_ne!(
            fingerprint("x", "y", "http", &p, None),
            fingerprint("x", "y", "ws", &p, None)
        );
    }

    #[test]
    fn nested_object_keys_are_sorted_recursively() {
        let a = json!({"outer": {"b": 1, "a": 2}});
        let b = json!({"outer": {"a": 2, "b": 1}});
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    struct UppercaseGenerator;
    impl CacheKeyGenerator for UppercaseGenerator {
        fn generate(&self, canonical_params: &str) -> String {
            canonical_params.to_uppercase()
        }
    }

    #[test]
    fn custom_key_generator_overrides_default_encoding() {
        let p = json!({"base": "eth"});
        let fp = fingerprint("x", "y", "z", &p, Some(&UppercaseGenerator));
        // Still deterministic and still distinguishes inputs.
        let fp2 = fingerprint("x", "y", "z", &p, Some(&UppercaseGenerator));
        assert_eq!(fp, fp2);
    }
}
