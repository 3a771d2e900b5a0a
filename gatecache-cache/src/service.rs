//! The response cache service owned by one preset.

use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::CacheResult;
use crate::freshness::{Freshness, classify, lifetime};
use crate::headers::is_storable;
use crate::key::CacheKey;
use crate::lease::LeaseManager;
use crate::memory::{EvictionListener, LocalStore};
use crate::stats::{CacheStats, StatsRecorder};
use crate::tiered::TieredStore;
use crate::traits::{CacheStore, DistributedTier};
use chrono::{DateTime, Utc};
use gatecache_core::{HttpRequest, HttpResponse};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, info, warn};

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The wall clock.
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Result of looking a key up.
#[derive(Debug, Clone)]
pub enum Lookup {
    Fresh(CacheEntry),
    Stale(CacheEntry),
    Miss,
}

pub(crate) struct Inner {
    pub(crate) config: CacheConfig,
    pub(crate) store: Arc<TieredStore>,
    pub(crate) leases: LeaseManager,
    pub(crate) stats: Arc<StatsRecorder>,
    pub(crate) clock: Clock,
}

/// Response cache for one preset.
///
/// Owns its tiers, counters and clock. Cloning is cheap and every clone
/// shares the same state. Presets that should share a distributed handle
/// are separate instances built with the same [`DistributedTier`].
#[derive(Clone)]
pub struct ResponseCache {
    pub(crate) inner: Arc<Inner>,
}

impl ResponseCache {
    /// A cache backed only by the local tier.
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: CacheConfig) -> ResponseCacheBuilder {
        ResponseCacheBuilder::new(config)
    }

    /// A cache using Redis as its distributed tier.
    #[cfg(feature = "redis")]
    pub fn with_redis(
        config: CacheConfig,
        redis: Arc<gatecache_redis::RedisService>,
    ) -> CacheResult<Self> {
        let store = crate::redis_store::RedisStore::new(redis, config.key_prefix.clone());
        Self::builder(config).distributed(Arc::new(store)).build()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.inner.clock)()
    }

    /// The storage decorator behind this cache.
    pub fn store(&self) -> &TieredStore {
        &self.inner.store
    }

    /// Cache key for `req` under this preset.
    pub fn key_for(&self, req: &HttpRequest) -> String {
        let config = &self.inner.config;
        CacheKey::from_request(&config.key_prefix, req, &config.vary_by_headers).to_string_key()
    }

    /// Look `key` up and classify what is found.
    ///
    /// Expired and unreadable entries are removed and reported as misses.
    pub async fn lookup(&self, key: &str) -> Lookup {
        let raw = match self.inner.store.get_json(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Lookup::Miss,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed");
                return Lookup::Miss;
            }
        };

        let entry = match CacheEntry::decode(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "Evicting corrupt cache entry");
                self.remove(key).await;
                return Lookup::Miss;
            }
        };

        match classify(&entry, self.now()) {
            Freshness::Fresh => Lookup::Fresh(entry),
            Freshness::Stale => Lookup::Stale(entry),
            Freshness::Expired => {
                debug!(key = %key, "Dropping expired cache entry");
                self.remove(key).await;
                Lookup::Miss
            }
        }
    }

    /// Write an origin response under `key` if it may be stored.
    ///
    /// Returns the written entry. Failures are logged, never returned.
    pub async fn store_response(&self, key: &str, response: &HttpResponse) -> Option<CacheEntry> {
        let config = &self.inner.config;
        if !is_storable(response, config.max_body_bytes) {
            debug!(key = %key, status = response.status, "Response not storable");
            return None;
        }

        let cached_at = self.now();
        let (expires_at, stale_until) = lifetime(config, cached_at);
        let entry = CacheEntry::from_response(response, cached_at, expires_at, stale_until);

        let encoded = match entry.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode cache entry");
                return None;
            }
        };

        match self
            .inner
            .store
            .set_json(key, encoded, Some(config.retention()))
            .await
        {
            Ok(()) => {
                debug!(key = %key, ttl_ms = config.ttl.as_millis() as u64, "Stored response");
                Some(entry)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache write failed");
                None
            }
        }
    }

    async fn remove(&self, key: &str) {
        if let Err(e) = self.inner.store.delete(key).await {
            warn!(key = %key, error = %e, "Cache delete failed");
        }
    }

    /// Count a hit; the shared counter is updated in the background.
    pub fn record_hit(&self) {
        self.inner.stats.record_hit();
    }

    pub fn record_miss(&self) {
        self.inner.stats.record_miss();
    }

    /// Current counters.
    pub async fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot().await
    }

    /// Remove every entry whose key contains `pattern`, in both tiers.
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        match self.inner.store.delete_matching(pattern).await {
            Ok(keys) => {
                info!(
                    prefix = %self.inner.config.key_prefix,
                    pattern = %pattern,
                    count = keys.len(),
                    "Invalidated cache entries"
                );
                keys.len()
            }
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Cache invalidation failed");
                0
            }
        }
    }

    /// Drop every entry in both tiers and reset the counters.
    pub async fn clear(&self) {
        if let Err(e) = self.inner.store.clear().await {
            warn!(error = %e, "Cache clear failed");
        }
        self.inner.stats.reset().await;
        self.inner.store.local().reset_evictions();
        info!(prefix = %self.inner.config.key_prefix, "Cleared cache");
    }
}

/// Builder for [`ResponseCache`].
pub struct ResponseCacheBuilder {
    config: CacheConfig,
    distributed: Option<Arc<dyn DistributedTier>>,
    clock: Option<Clock>,
    eviction_listener: Option<EvictionListener>,
}

impl ResponseCacheBuilder {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            distributed: None,
            clock: None,
            eviction_listener: None,
        }
    }

    /// Use `tier` as the primary store, lease and counter backend.
    pub fn distributed(mut self, tier: Arc<dyn DistributedTier>) -> Self {
        self.distributed = Some(tier);
        self
    }

    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Also report local evictions to `listener`.
    pub fn eviction_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.eviction_listener = Some(Arc::new(listener));
        self
    }

    pub fn build(self) -> CacheResult<ResponseCache> {
        self.config.validate()?;

        // The local tier reports evictions to the counters it is owned by
        let recorder: Arc<OnceLock<Weak<StatsRecorder>>> = Arc::new(OnceLock::new());
        let slot = recorder.clone();
        let external = self.eviction_listener;
        let prefix = self.config.key_prefix.clone();
        let listener: EvictionListener = Arc::new(move |key: &str| {
            debug!(prefix = %prefix, key = %key, "Local cache eviction");
            if let Some(stats) = slot.get().and_then(Weak::upgrade) {
                stats.record_eviction();
            }
            if let Some(external) = &external {
                external(key);
            }
        });

        let local = Arc::new(LocalStore::new(self.config.max_size).with_eviction_listener(listener));
        let store = Arc::new(match self.distributed {
            Some(tier) => TieredStore::new(tier, local)
                .with_breaker(format!("{}-distributed", self.config.key_prefix), self.config.breaker),
            None => TieredStore::local_only(local),
        });

        let stats = Arc::new(StatsRecorder::new(store.clone()));
        let _ = recorder.set(Arc::downgrade(&stats));

        debug!(
            prefix = %self.config.key_prefix,
            store = store.store_type(),
            ttl_ms = self.config.ttl.as_millis() as u64,
            "Response cache created"
        );

        Ok(ResponseCache {
            inner: Arc::new(Inner {
                leases: LeaseManager::new(store.clone(), self.config.lock_ttl),
                config: self.config,
                store,
                stats,
                clock: self.clock.unwrap_or_else(system_clock),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingTier, InMemoryTier};
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn manual_clock(start: DateTime<Utc>) -> (Clock, Arc<Mutex<DateTime<Utc>>>) {
        let now = Arc::new(Mutex::new(start));
        let handle = now.clone();
        let clock: Clock = Arc::new(move || *handle.lock());
        (clock, now)
    }

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    fn json_response(body: &str) -> HttpResponse {
        HttpResponse::ok()
            .with_header("Content-Type", "application/json")
            .with_body(body)
    }

    #[tokio::test]
    async fn test_ttl_boundaries() {
        let (clock, now) = manual_clock(t0());
        let cache = ResponseCache::builder(CacheConfig::new(Duration::from_secs(60)))
            .clock(clock)
            .build()
            .unwrap();

        let key = cache.key_for(&HttpRequest::get("/catalog/42"));
        assert!(cache.store_response(&key, &json_response("{}")).await.is_some());

        *now.lock() = t0() + chrono::Duration::milliseconds(30_000);
        assert!(matches!(cache.lookup(&key).await, Lookup::Fresh(_)));

        *now.lock() = t0() + chrono::Duration::milliseconds(60_001);
        assert!(matches!(cache.lookup(&key).await, Lookup::Miss));
        // Expired entries are cleaned up on read
        assert!(cache.store().local().is_empty());
    }

    #[tokio::test]
    async fn test_stale_window() {
        let (clock, now) = manual_clock(t0());
        let config = CacheConfig::new(Duration::from_secs(60))
            .with_stale_while_revalidate(Duration::from_secs(120));
        let cache = ResponseCache::builder(config).clock(clock).build().unwrap();

        let key = cache.key_for(&HttpRequest::get("/x"));
        cache.store_response(&key, &json_response("{}")).await;

        *now.lock() = t0() + chrono::Duration::seconds(90);
        assert!(matches!(cache.lookup(&key).await, Lookup::Stale(_)));
    }

    #[tokio::test]
    async fn test_errors_never_stored() {
        let cache = ResponseCache::new(CacheConfig::default()).unwrap();
        let key = cache.key_for(&HttpRequest::get("/missing"));
        assert!(cache.store_response(&key, &HttpResponse::not_found()).await.is_none());
        assert!(matches!(cache.lookup(&key).await, Lookup::Miss));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_evicted() {
        let tier = Arc::new(InMemoryTier::new());
        let cache = ResponseCache::builder(CacheConfig::default())
            .distributed(tier.clone())
            .build()
            .unwrap();

        tier.set_json("cache:GET:/x", "{not json".into(), None).await.unwrap();
        assert!(matches!(cache.lookup("cache:GET:/x").await, Lookup::Miss));
        assert!(!tier.contains("cache:GET:/x"));
    }

    #[tokio::test]
    async fn test_invalidate_pattern() {
        let cache = ResponseCache::new(CacheConfig::default().with_key_prefix("prefix")).unwrap();
        for path in ["/a", "/b"] {
            let key = cache.key_for(&HttpRequest::get(path));
            cache.store_response(&key, &json_response("{}")).await;
        }

        assert_eq!(cache.invalidate_pattern("/a").await, 1);
        assert!(!cache.store().local().contains("prefix:GET:/a"));
        assert!(cache.store().local().contains("prefix:GET:/b"));
    }

    #[tokio::test]
    async fn test_clear_resets_counters() {
        let cache = ResponseCache::new(CacheConfig::default()).unwrap();
        let key = cache.key_for(&HttpRequest::get("/a"));
        cache.store_response(&key, &json_response("{}")).await;
        cache.record_hit();
        cache.record_miss();

        cache.clear().await;
        assert_eq!(cache.stats().await, CacheStats::default());
    }

    #[tokio::test]
    async fn test_lru_with_distributed_down() {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = evicted.clone();
        let cache = ResponseCache::builder(CacheConfig::default().with_max_size(2))
            .distributed(Arc::new(FailingTier::new()))
            .eviction_listener(move |key| sink.lock().push(key.to_string()))
            .build()
            .unwrap();

        for path in ["/1", "/2"] {
            let key = cache.key_for(&HttpRequest::get(path));
            cache.store_response(&key, &json_response("{}")).await;
        }
        // Touch "/1" so "/2" is the least recently used
        cache.lookup("cache:GET:/1").await;
        let key = cache.key_for(&HttpRequest::get("/3"));
        cache.store_response(&key, &json_response("{}")).await;

        assert_eq!(*evicted.lock(), vec!["cache:GET:/2".to_string()]);
        let local = cache.store().local();
        assert!(local.contains("cache:GET:/1"));
        assert!(local.contains("cache:GET:/3"));

        let stats = cache.stats().await;
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.local_entry_count, 2);
        assert!(stats.distributed_errors >= 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(ResponseCache::new(CacheConfig::default().with_max_size(0)).is_err());
    }
}
