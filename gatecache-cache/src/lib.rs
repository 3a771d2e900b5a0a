//! Gateway response cache.
//!
//! Caches origin responses for `GET`/`HEAD` requests in two tiers: a
//! shared distributed tier (Redis) and a bounded in-process LRU that takes
//! over whenever the distributed tier fails. Entries past their TTL but
//! inside the stale window are served immediately while a single
//! background task per key refreshes them.
//!
//! # Features
//!
//! - `redis` - Redis distributed tier (enabled by default)
//! - `testing` - in-process distributed tier doubles
//! - **Stale-while-revalidate** with single-flight leases
//! - **Transparent fallback** to the local tier, counted in the stats, with
//!   a circuit breaker that stops calling an unhealthy distributed tier
//! - **CDN headers** - `Cache-Control`, `ETag`, `Vary` and `X-Cache`
//! - **Admin endpoints** for stats, invalidation and clearing
//!
//! # Examples
//!
//! ## Caching middleware
//!
//! ```no_run
//! use gatecache_cache::*;
//! use gatecache_core::{handler, HttpRequest, HttpResponse, MiddlewareChain};
//!
//! # async fn example() -> Result<(), CacheError> {
//! let cache = ResponseCache::new(CacheConfig::catalog())?;
//! let chain = MiddlewareChain::new().with(ResponseCacheMiddleware::new(cache));
//! let origin = handler(|_req| async { Ok(HttpResponse::ok().with_body("{}")) });
//!
//! let response = chain.apply(HttpRequest::get("/catalog/42"), origin).await;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```
//!
//! ## From a settings file
//!
//! ```no_run
//! use gatecache_cache::*;
//!
//! # async fn example() -> Result<(), CacheError> {
//! let settings = GatewayCacheSettings::from_file("gatecache.toml")?;
//! let registry = CacheRegistry::from_settings(&settings)?;
//!
//! let catalog = registry.middleware("catalog");
//! let admin = registry.admin();
//! # let _ = (catalog, admin);
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod breaker;
pub mod config;
pub mod entry;
pub mod error;
pub mod freshness;
pub mod headers;
pub mod key;
pub mod lease;
pub mod memory;
pub mod middleware;
pub mod registry;
pub mod revalidate;
pub mod service;
pub mod stats;
pub mod tiered;
pub mod traits;

#[cfg(feature = "redis")]
pub mod redis_store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use admin::CacheAdmin;
pub use breaker::{BreakerConfig, BreakerState, TierBreaker};
pub use config::{CacheConfig, CacheScope, CdnPolicy, GatewayCacheSettings};
pub use entry::CacheEntry;
pub use error::{CacheError, CacheResult};
pub use freshness::Freshness;
pub use headers::{CacheControl, CacheDirective, CacheStatus};
pub use key::CacheKey;
pub use lease::{Lease, LeaseManager, LeaseTier, LocalLeases};
pub use memory::LocalStore;
pub use middleware::ResponseCacheMiddleware;
pub use registry::CacheRegistry;
pub use service::{Clock, Lookup, ResponseCache, ResponseCacheBuilder, system_clock};
pub use stats::CacheStats;
pub use tiered::TieredStore;
pub use traits::{CacheStore, CounterStore, DistributedTier, LeaseStore};

#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::admin::CacheAdmin;
    pub use crate::config::{CacheConfig, CdnPolicy, GatewayCacheSettings};
    pub use crate::error::{CacheError, CacheResult};
    pub use crate::middleware::ResponseCacheMiddleware;
    pub use crate::registry::CacheRegistry;
    pub use crate::service::ResponseCache;
    pub use crate::stats::CacheStats;
}
