//! Error taxonomy for the caching layer.
//!
//! Every caching-path error is downgraded at the engine boundary to
//! "execute the handler without caching"; only configuration errors are
//! allowed to propagate, and only at startup.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The circuit breaker is open and the store was deliberately bypassed.
    #[error("cache circuit is open")]
    CircuitOpen,
    /// Transient backend failure. Tracked by the circuit breaker.
    #[error("store operation failed: {message}")]
    Store { message: String },
    /// Payload could not be encoded or decoded. Treated as a miss.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Invalid startup configuration, e.g. an unsupported timeout policy.
    #[error("invalid cache configuration: {message}")]
    InvalidConfiguration { message: String },
}

impl CacheError {
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Whether this error counts toward opening the circuit breaker.
    ///
    /// Caller-input and configuration errors are excluded: they say nothing
    /// about the health of the remote store. Serialization failures are
    /// treated as a plain miss rather than a backend fault.
    pub fn is_breaker_tracked(&self) -> bool {
        matches!(self, Self::Store { .. })
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::store(err.to_string())
    }
}
