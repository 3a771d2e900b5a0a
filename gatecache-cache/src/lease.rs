//! Single-flight revalidation leases.

use crate::error::CacheResult;
use crate::tiered::TieredStore;
use crate::traits::LeaseStore;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Most leases the local fallback will track at once.
pub const DEFAULT_LOCAL_LEASE_CAPACITY: usize = 10_000;

/// Per-process lease set used while the distributed tier is unreachable.
///
/// Single flight only holds within this process in that mode.
pub struct LocalLeases {
    leases: DashMap<String, (String, Instant)>,
    capacity: usize,
}

impl Default for LocalLeases {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_LEASE_CAPACITY)
    }
}

impl LocalLeases {
    pub fn new(capacity: usize) -> Self {
        Self {
            leases: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    fn purge_expired(&self, now: Instant) {
        self.leases.retain(|_, (_, expires)| now < *expires);
    }
}

#[async_trait]
impl LeaseStore for LocalLeases {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<bool> {
        let now = Instant::now();
        if self.leases.len() >= self.capacity {
            self.purge_expired(now);
            if self.leases.len() >= self.capacity {
                debug!(key = %key, "Local lease set full");
                return Ok(false);
            }
        }

        let entry = self.leases.entry(key.to_string());
        match entry {
            Entry::Occupied(mut held) => {
                if now < held.get().1 {
                    return Ok(false);
                }
                held.insert((token.to_string(), now + ttl));
                Ok(true)
            }
            Entry::Vacant(slot) => {
                slot.insert((token.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str, token: &str) -> CacheResult<bool> {
        Ok(self
            .leases
            .remove_if(key, |_, (held, _)| held == token)
            .is_some())
    }
}

/// Which tier granted a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseTier {
    Distributed,
    Local,
}

/// A held revalidation lease.
#[derive(Debug, Clone)]
pub struct Lease {
    pub key: String,
    pub token: String,
    pub tier: LeaseTier,
}

/// Acquires leases through the distributed tier, falling back to
/// [`LocalLeases`] when it fails.
pub struct LeaseManager {
    store: Arc<TieredStore>,
    local: LocalLeases,
    ttl: Duration,
}

impl LeaseManager {
    pub fn new(store: Arc<TieredStore>, ttl: Duration) -> Self {
        Self {
            store,
            local: LocalLeases::default(),
            ttl,
        }
    }

    pub fn local(&self) -> &LocalLeases {
        &self.local
    }

    /// Try to become the single refresher for `key`.
    ///
    /// `None` means another holder is refreshing; that is not an error.
    pub async fn try_acquire(&self, key: &str) -> Option<Lease> {
        let token = Uuid::new_v4().to_string();

        let ttl = self.ttl;
        let granted = self
            .store
            .call_distributed("lease_acquire", |tier| {
                let token = token.clone();
                async move { tier.try_acquire(key, &token, ttl).await }
            })
            .await;
        match granted {
            Some(true) => {
                return Some(Lease {
                    key: key.to_string(),
                    token,
                    tier: LeaseTier::Distributed,
                });
            }
            Some(false) => return None,
            None => {}
        }

        match self.local.try_acquire(key, &token, self.ttl).await {
            Ok(true) => Some(Lease {
                key: key.to_string(),
                token,
                tier: LeaseTier::Local,
            }),
            _ => None,
        }
    }

    /// Release a lease, never freeing one held under another token.
    pub async fn release(&self, lease: &Lease) {
        match lease.tier {
            LeaseTier::Distributed => {
                let released = self
                    .store
                    .call_distributed("lease_release", |tier| async move {
                        tier.release(&lease.key, &lease.token).await
                    })
                    .await;
                match released {
                    Some(true) => {}
                    Some(false) => debug!(key = %lease.key, "Lease already expired or taken over"),
                    // The lease TTL frees it eventually
                    None => debug!(key = %lease.key, "Distributed lease left to expire"),
                }
            }
            LeaseTier::Local => {
                let _ = self.local.release(&lease.key, &lease.token).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::memory::LocalStore;
    use crate::testing::{FailingTier, InMemoryTier};

    #[tokio::test]
    async fn test_local_leases_are_exclusive() {
        let leases = LocalLeases::new(8);
        let ttl = Duration::from_secs(5);
        assert!(leases.try_acquire("k", "a", ttl).await.unwrap());
        assert!(!leases.try_acquire("k", "b", ttl).await.unwrap());
        assert!(!leases.release("k", "b").await.unwrap());
        assert!(leases.release("k", "a").await.unwrap());
        assert!(leases.try_acquire("k", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_lease_expires() {
        let leases = LocalLeases::new(8);
        assert!(leases.try_acquire("k", "a", Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(leases.try_acquire("k", "b", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_leases_bounded() {
        let leases = LocalLeases::new(1);
        let ttl = Duration::from_secs(5);
        assert!(leases.try_acquire("a", "t", ttl).await.unwrap());
        assert!(!leases.try_acquire("b", "t", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_manager_prefers_distributed() {
        let tier = Arc::new(InMemoryTier::new());
        let store = Arc::new(TieredStore::new(tier.clone(), Arc::new(LocalStore::new(4))));
        let manager = LeaseManager::new(store, Duration::from_secs(35));

        let lease = manager.try_acquire("k").await.unwrap();
        assert_eq!(lease.tier, LeaseTier::Distributed);
        assert!(tier.lease_held("k"));
        assert!(manager.try_acquire("k").await.is_none());

        manager.release(&lease).await;
        assert!(!tier.lease_held("k"));
    }

    #[tokio::test]
    async fn test_manager_falls_back_to_local() {
        let store = Arc::new(TieredStore::new(
            Arc::new(FailingTier::new()),
            Arc::new(LocalStore::new(4)),
        ));
        let manager = LeaseManager::new(store.clone(), Duration::from_secs(35));

        let lease = manager.try_acquire("k").await.unwrap();
        assert_eq!(lease.tier, LeaseTier::Local);
        assert!(manager.try_acquire("k").await.is_none());
        assert_eq!(store.distributed_errors(), 2);

        manager.release(&lease).await;
        assert!(manager.local().is_empty());
    }

    #[tokio::test]
    async fn test_open_breaker_goes_straight_to_local_leases() {
        let tier = Arc::new(FailingTier::new());
        let store = Arc::new(
            TieredStore::new(tier.clone(), Arc::new(LocalStore::new(4))).with_breaker(
                "test",
                BreakerConfig::default()
                    .failure_threshold(1)
                    .reset_timeout(Duration::from_secs(60)),
            ),
        );
        let manager = LeaseManager::new(store.clone(), Duration::from_secs(35));

        let first = manager.try_acquire("a").await.unwrap();
        let second = manager.try_acquire("b").await.unwrap();
        assert_eq!((first.tier, second.tier), (LeaseTier::Local, LeaseTier::Local));
        assert!(manager.try_acquire("a").await.is_none());
        assert_eq!(tier.calls(), 1);
        assert_eq!(store.distributed_errors(), 3);
    }
}
