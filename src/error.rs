//! Error kinds for the adapter core.
//!
//! Variants mirror spec §7's error kinds rather than implementation
//! accidents: callers match on kind to decide the client-facing status
//! code and whether to keep serving a stale cache entry.

use thiserror::Error;

/// Errors raised by the coordination core.
///
/// Each variant carries enough context to answer "what status code should
/// the client see" without the caller needing to inspect a message string.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Request validation or routing failed; no state was changed.
    #[error("invalid input: {message}")]
    InvalidInput {
        message: String,
        provider_status_code: Option<u16>,
    },

    /// The upstream provider (HTTP or WebSocket) returned an error or timed out.
    #[error("upstream error: {message}")]
    Upstream {
        message: String,
        provider_status_code: Option<u16>,
    },

    /// A remote cache/subscription-set backend is unreachable.
    ///
    /// Recovery: callers downgrade to a no-cache path for this request and
    /// continue; this is never raised for a plain cache miss.
    #[error("cache backend unavailable: {0}")]
    CacheUnavailable(String),

    /// A WebSocket transport's `open` handler rejected.
    ///
    /// Recovery: the current background tick ends; the next tick retries
    /// from `Disconnected`.
    #[error("websocket connect failed: {0}")]
    ConnectFailed(String),

    /// An invariant was broken that should be impossible given the above
    /// kinds; surfaced as a 500 to the client, logged, and the adapter
    /// keeps running.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AdapterError {
    /// The HTTP status code spec §6 assigns to this error kind.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput { .. } => 400,
            Self::Upstream { .. } => 502,
            Self::CacheUnavailable(_) => 500,
            Self::ConnectFailed(_) => 502,
            Self::Internal(_) => 500,
        }
    }

    /// The provider-reported status code, when the error kind carries one.
    #[must_use]
    pub fn provider_status_code(&self) -> Option<u16> {
        match self {
            Self::InvalidInput {
                provider_status_code,
                ..
            }
            | Self::Upstream {
                provider_status_code,
                ..
            } => *provider_status_code,
            _ => None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            provider_status_code: None,
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            provider_status_code: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AdapterError>;
