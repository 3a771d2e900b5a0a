// gatecache - distributed response caching for API gateways
//
// Re-exports the gateway primitives, the response cache and, with the
// `redis` feature, the Redis integration behind one crate.

// Re-export core functionality
pub use gatecache_core::*;

pub use gatecache_cache as cache;

#[cfg(feature = "redis")]
pub use gatecache_redis as redis;

pub use gatecache_cache::{
    CacheAdmin, CacheConfig, CacheError, CacheRegistry, CacheResult, CacheStats, CdnPolicy,
    GatewayCacheSettings, ResponseCache, ResponseCacheMiddleware,
};

#[cfg(feature = "redis")]
pub use gatecache_redis::{RedisConfig, RedisService};

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        CacheAdmin, CacheConfig, CacheRegistry, CdnPolicy, Error, GatewayCacheSettings,
        HttpRequest, HttpResponse, Middleware, MiddlewareChain, Next, ResponseCache,
        ResponseCacheMiddleware, Upstream, handler,
    };

    #[cfg(feature = "redis")]
    pub use crate::{RedisConfig, RedisService};

    pub use async_trait::async_trait;
}
