//! Error types for cache operations.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Distributed tier error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] gatecache_redis::RedisError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation timeout
    #[error("Operation timeout")]
    Timeout,

    /// Upstream failed while refreshing an entry
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Generic error
    #[error("Cache error: {0}")]
    Other(String),
}

impl CacheError {
    /// Whether the error came from the distributed tier rather than from
    /// the data it returned.
    pub fn is_tier_failure(&self) -> bool {
        match self {
            #[cfg(feature = "redis")]
            Self::Redis(_) => true,
            Self::Connection(_) | Self::Timeout => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

impl From<CacheError> for gatecache_core::Error {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Config(msg) => gatecache_core::Error::BadRequest(msg),
            CacheError::Upstream(msg) => gatecache_core::Error::Upstream(msg),
            CacheError::Timeout => gatecache_core::Error::GatewayTimeout("cache".to_string()),
            other => gatecache_core::Error::Internal(other.to_string()),
        }
    }
}
