//! Process-local LRU tier.

use crate::error::CacheResult;
use crate::traits::CacheStore;
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

/// Callback told about every key pushed out by capacity pressure.
pub type EvictionListener = Arc<dyn Fn(&str) + Send + Sync>;

struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Bounded in-process store with least-recently-used eviction.
///
/// Reads refresh recency. Entries past their TTL are dropped lazily on
/// read and never count as evictions.
pub struct LocalStore {
    entries: Mutex<LruCache<String, Slot>>,
    evictions: AtomicU64,
    listener: Option<EvictionListener>,
}

impl LocalStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            evictions: AtomicU64::new(0),
            listener: None,
        }
    }

    /// Report every capacity eviction to `listener`.
    pub fn with_eviction_listener(mut self, listener: EvictionListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Number of keys currently held, expired ones included until read.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Evictions since creation or the last [`LocalStore::reset_evictions`].
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn reset_evictions(&self) {
        self.evictions.store(0, Ordering::Relaxed);
    }

    /// Whether `key` is present, without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains(key)
    }
}

#[async_trait]
impl CacheStore for LocalStore {
    async fn get_json(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(slot) if slot.is_expired(now) => true,
            Some(slot) => return Ok(Some(slot.value.clone())),
            None => return Ok(None),
        };
        if expired {
            entries.pop(key);
            trace!(key = %key, "Dropped expired local entry");
        }
        Ok(None)
    }

    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        let slot = Slot {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };

        let evicted = {
            let mut entries = self.entries.lock();
            match entries.push(key.to_string(), slot) {
                Some((old_key, _)) if old_key != key => Some(old_key),
                _ => None,
            }
        };

        if let Some(evicted) = evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(key = %evicted, "Evicted least recently used local entry");
            if let Some(listener) = &self.listener {
                listener(&evicted);
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.lock().pop(key).is_some())
    }

    async fn delete_matching(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut entries = self.entries.lock();
        let matching: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.contains(pattern))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &matching {
            entries.pop(key);
        }
        Ok(matching)
    }

    async fn clear(&self) -> CacheResult<()> {
        self.entries.lock().clear();
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}
