//! External adapter coordination core.
//!
//! This crate is the engine an external-adapter-style HTTP service embeds:
//! it fronts upstream data providers behind a uniform request/response API,
//! deduplicates concurrent work for the same request through a shared
//! [`ResponseCache`](response_cache::ResponseCache), and keeps that cache
//! warm via background subscription loops driven by pluggable
//! [`Transport`](transport::Transport) implementations (HTTP polling or
//! WebSocket streaming).
//!
//! The pieces that actually accept HTTP connections, do input coercion at
//! the wire boundary, or terminate TLS live outside this crate; what's here
//! is the coordination core: cache, subscription set, transports, and the
//! [`Adapter`](adapter::Adapter) that wires them together.

pub mod adapter;
pub mod cache;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod fingerprint;
pub mod metrics;
pub mod response_cache;
pub mod subscription;
pub mod time;
pub mod transport;
pub mod types;
pub mod validation;

pub use adapter::{Adapter, AdapterBuilder};
pub use cache::{CacheBackend, CacheEntry};
pub use config::AdapterConfig;
pub use endpoint::{AdapterEndpoint, AdapterEndpointBuilder};
pub use error::{AdapterError, Result};
pub use fingerprint::fingerprint;
pub use response_cache::ResponseCache;
pub use subscription::SubscriptionSet;
pub use types::{AdapterRequest, AdapterResponse};

pub use async_trait::async_trait;
