//! Hit / miss / eviction counters.

use crate::tiered::TieredStore;
use crate::traits::CounterStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const HITS: &str = "hits";
const MISSES: &str = "misses";
const EVICTIONS: &str = "evictions";
const MIRRORED: [&str; 3] = [HITS, MISSES, EVICTIONS];

/// Point-in-time view of a cache's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    #[serde(rename = "redisErrors")]
    pub distributed_errors: u64,
    #[serde(rename = "memoryCacheSize")]
    pub local_entry_count: u64,
}

impl CacheStats {
    /// Sum of two snapshots, used when reporting several presets at once.
    pub fn merge(self, other: CacheStats) -> CacheStats {
        CacheStats {
            hits: self.hits + other.hits,
            misses: self.misses + other.misses,
            evictions: self.evictions + other.evictions,
            distributed_errors: self.distributed_errors + other.distributed_errors,
            local_entry_count: self.local_entry_count + other.local_entry_count,
        }
    }

    /// Fraction of lookups answered from the cache.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Counters kept locally and mirrored to the distributed tier.
///
/// Local values are always maintained; the distributed copies are shared by
/// every instance using the same key prefix and win when readable. Mirror
/// writes run on background tasks so a slow distributed tier never delays
/// a response.
pub struct StatsRecorder {
    store: Arc<TieredStore>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl StatsRecorder {
    pub fn new(store: Arc<TieredStore>) -> Self {
        Self {
            store,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn record_hit(self: &Arc<Self>) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.spawn_mirror(HITS);
    }

    pub fn record_miss(self: &Arc<Self>) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.spawn_mirror(MISSES);
    }

    /// Count a local eviction. Called from the local tier's eviction hook.
    pub fn record_eviction(self: &Arc<Self>) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.spawn_mirror(EVICTIONS);
    }

    fn spawn_mirror(self: &Arc<Self>, name: &'static str) {
        if !self.store.has_distributed() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let recorder = Arc::clone(self);
            handle.spawn(async move {
                recorder
                    .store
                    .call_distributed("stats_incr", |tier| async move {
                        tier.incr_counter(name).await
                    })
                    .await;
            });
        }
    }

    /// Current counters.
    pub async fn snapshot(&self) -> CacheStats {
        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            distributed_errors: 0,
            local_entry_count: self.store.local().len() as u64,
        };

        let shared = self
            .store
            .call_distributed("stats_read", |tier| async move {
                tier.read_counters(&MIRRORED).await
            })
            .await;
        if let Some(values) = shared
            && values.len() == MIRRORED.len()
        {
            stats.hits = values[0].max(0) as u64;
            stats.misses = values[1].max(0) as u64;
            stats.evictions = values[2].max(0) as u64;
        }
        stats.distributed_errors = self.store.distributed_errors();
        stats
    }

    /// Zero every counter, locally and in the distributed tier.
    pub async fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.store
            .call_distributed("stats_reset", |tier| async move {
                tier.reset_counters(&MIRRORED).await
            })
            .await;
        self.store.reset_distributed_errors();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::LocalStore;
    use crate::testing::{FailingTier, InMemoryTier};

    #[test]
    fn test_serialized_field_names() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            evictions: 0,
            distributed_errors: 2,
            local_entry_count: 5,
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "hits": 3,
                "misses": 1,
                "evictions": 0,
                "redisErrors": 2,
                "memoryCacheSize": 5
            })
        );
        assert_eq!(stats.hit_rate(), 0.75);
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_local_only_counters() {
        let store = Arc::new(TieredStore::local_only(Arc::new(LocalStore::new(4))));
        let stats = Arc::new(StatsRecorder::new(store));
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        stats.record_eviction();

        let snapshot = stats.snapshot().await;
        assert_eq!((snapshot.hits, snapshot.misses, snapshot.evictions), (2, 1, 1));

        stats.reset().await;
        assert_eq!(stats.snapshot().await, CacheStats::default());
    }

    #[tokio::test]
    async fn test_counters_shared_through_distributed_tier() {
        let tier = Arc::new(InMemoryTier::new());
        let recorder = || {
            Arc::new(StatsRecorder::new(Arc::new(TieredStore::new(
                tier.clone(),
                Arc::new(LocalStore::new(4)),
            ))))
        };
        let (a, b) = (recorder(), recorder());

        a.record_hit();
        b.record_hit();
        b.record_miss();
        wait_until(|| tier.counter("hits") == 2 && tier.counter("misses") == 1).await;

        let snapshot = a.snapshot().await;
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.misses, 1);
    }

    #[tokio::test]
    async fn test_mirror_does_not_block_the_caller() {
        let store = Arc::new(TieredStore::new(
            Arc::new(FailingTier::new()),
            Arc::new(LocalStore::new(4)),
        ));
        let stats = Arc::new(StatsRecorder::new(store.clone()));
        stats.record_miss();
        // The failed mirror write lands on its own task
        wait_until(|| store.distributed_errors() == 1).await;

        let snapshot = stats.snapshot().await;
        assert_eq!(snapshot.misses, 1);
        // One failed mirror write and one failed read
        assert_eq!(snapshot.distributed_errors, 2);
    }
}
