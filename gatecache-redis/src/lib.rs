//! # gatecache-redis
//!
//! Pooled Redis access for the gateway response cache.
//!
//! The pool can be created lazily so the gateway boots while Redis is
//! unavailable, and every command is bounded by a per-command timeout.
//!
//! ```rust,ignore
//! use gatecache_redis::{RedisConfig, RedisService};
//!
//! let config = RedisConfig::from_env().build();
//! let redis = RedisService::connect_lazy(config)?;
//!
//! redis.set_px("greeting", "hello", Duration::from_secs(60)).await?;
//! let value = redis.get_value("greeting").await?;
//! ```

mod config;
mod error;
mod pool;
mod service;

pub use config::{RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};
pub use pool::{RedisConnection, RedisPool, RedisPoolBuilder};
pub use service::{PoolStats, RedisService};

// Re-export redis crate for advanced usage
pub use redis;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::{RedisConfig, RedisConfigBuilder};
    pub use crate::error::{RedisError, Result};
    pub use crate::service::RedisService;
}
