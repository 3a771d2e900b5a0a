//! Named caches built from [`GatewayCacheSettings`].

use crate::admin::CacheAdmin;
use crate::config::GatewayCacheSettings;
use crate::error::CacheResult;
use crate::middleware::ResponseCacheMiddleware;
use crate::service::ResponseCache;
use std::collections::BTreeMap;
use tracing::info;

/// Every preset of a gateway, each with its own [`ResponseCache`].
///
/// When Redis is configured all presets share one lazily connected
/// [`gatecache_redis::RedisService`]; each keeps its own namespace in it.
#[derive(Clone)]
pub struct CacheRegistry {
    admin_path: String,
    caches: BTreeMap<String, ResponseCache>,
}

impl CacheRegistry {
    /// Build every preset in `settings`.
    ///
    /// Never waits on Redis: an unreachable server only shows up later as
    /// distributed errors while requests are served from the local tier.
    pub fn from_settings(settings: &GatewayCacheSettings) -> CacheResult<Self> {
        settings.validate()?;

        #[cfg(feature = "redis")]
        let redis = match &settings.redis {
            Some(config) => Some(std::sync::Arc::new(
                gatecache_redis::RedisService::connect_lazy(config.clone())?,
            )),
            None => None,
        };

        let mut caches = BTreeMap::new();
        for (name, config) in &settings.presets {
            #[cfg(feature = "redis")]
            let cache = match &redis {
                Some(redis) => ResponseCache::with_redis(config.clone(), redis.clone())?,
                None => ResponseCache::new(config.clone())?,
            };
            #[cfg(not(feature = "redis"))]
            let cache = ResponseCache::new(config.clone())?;

            caches.insert(name.clone(), cache);
        }

        info!(
            presets = caches.len(),
            admin_path = %settings.admin_path,
            "Cache registry initialized"
        );

        Ok(Self {
            admin_path: settings.admin_path.clone(),
            caches,
        })
    }

    pub fn get(&self, name: &str) -> Option<&ResponseCache> {
        self.caches.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.caches.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    /// Caching middleware for the preset `name`.
    pub fn middleware(&self, name: &str) -> Option<ResponseCacheMiddleware> {
        self.get(name).cloned().map(ResponseCacheMiddleware::new)
    }

    /// Admin router over every preset.
    pub fn admin(&self) -> CacheAdmin {
        self.caches
            .iter()
            .fold(CacheAdmin::new(self.admin_path.clone()), |admin, (name, cache)| {
                admin.with_cache(name.clone(), cache.clone())
            })
    }
}
