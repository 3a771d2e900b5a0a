//! Distributed-first storage with transparent local fallback.

use crate::breaker::{BreakerConfig, BreakerState, TierBreaker};
use crate::error::{CacheError, CacheResult};
use crate::memory::LocalStore;
use crate::traits::{CacheStore, DistributedTier};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Storage decorator coordinating the distributed and local tiers.
///
/// Every operation goes to the distributed tier first. When it fails the
/// failure is counted, logged at `warn` and the same operation runs against
/// the local tier instead, so callers never see distributed errors. A
/// successful distributed answer is authoritative, including a miss.
/// Deletions always reach both tiers.
///
/// A [`TierBreaker`] watches the distributed calls. While it is open the
/// distributed tier is not called at all and each skipped call is counted
/// as a distributed error.
pub struct TieredStore {
    distributed: Option<Arc<dyn DistributedTier>>,
    local: Arc<LocalStore>,
    breaker: TierBreaker,
    distributed_errors: AtomicU64,
}

impl TieredStore {
    /// A store with only the local tier.
    pub fn local_only(local: Arc<LocalStore>) -> Self {
        Self {
            distributed: None,
            local,
            breaker: TierBreaker::new("distributed-tier", BreakerConfig::default()),
            distributed_errors: AtomicU64::new(0),
        }
    }

    pub fn new(distributed: Arc<dyn DistributedTier>, local: Arc<LocalStore>) -> Self {
        Self {
            distributed: Some(distributed),
            local,
            breaker: TierBreaker::new("distributed-tier", BreakerConfig::default()),
            distributed_errors: AtomicU64::new(0),
        }
    }

    /// Replace the breaker tuning.
    pub fn with_breaker(mut self, name: impl Into<String>, config: BreakerConfig) -> Self {
        self.breaker = TierBreaker::new(name, config);
        self
    }

    pub fn has_distributed(&self) -> bool {
        self.distributed.is_some()
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Distributed failures absorbed by this process.
    pub fn distributed_errors(&self) -> u64 {
        self.distributed_errors.load(Ordering::Relaxed)
    }

    pub fn reset_distributed_errors(&self) {
        self.distributed_errors.store(0, Ordering::Relaxed);
    }

    /// Count and log a distributed failure.
    fn record_distributed_error(&self, op: &'static str, err: &CacheError) {
        let total = self.distributed_errors.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(op, error = %err, distributed_errors = total, "Distributed cache tier failed, using local tier");
    }

    fn record_skip(&self, op: &'static str) {
        let total = self.distributed_errors.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(op, distributed_errors = total, "Distributed tier breaker open, using local tier");
    }

    /// Run `call` against the distributed tier when there is one and the
    /// breaker lets it through.
    ///
    /// `None` tells the caller to use the local tier instead.
    pub async fn call_distributed<T, F, Fut>(&self, op: &'static str, call: F) -> Option<T>
    where
        F: FnOnce(Arc<dyn DistributedTier>) -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let distributed = self.distributed.as_ref()?;
        if !self.breaker.is_allowed() {
            self.record_skip(op);
            return None;
        }
        match call(Arc::clone(distributed)).await {
            Ok(value) => {
                self.breaker.record_success();
                Some(value)
            }
            Err(e) => {
                self.breaker.record_failure();
                self.record_distributed_error(op, &e);
                None
            }
        }
    }
}

#[async_trait]
impl CacheStore for TieredStore {
    async fn get_json(&self, key: &str) -> CacheResult<Option<String>> {
        let found = self
            .call_distributed("get", |tier| async move { tier.get_json(key).await })
            .await;
        match found {
            Some(value) => Ok(value),
            None => self.local.get_json(key).await,
        }
    }

    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        let shared = value.clone();
        let written = self
            .call_distributed("set", |tier| async move { tier.set_json(key, shared, ttl).await })
            .await;
        match written {
            Some(()) => Ok(()),
            None => self.local.set_json(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let removed = self
            .call_distributed("delete", |tier| async move { tier.delete(key).await })
            .await
            .unwrap_or(false);
        Ok(self.local.delete(key).await? || removed)
    }

    async fn delete_matching(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut removed = BTreeSet::new();
        if let Some(keys) = self
            .call_distributed("delete_matching", |tier| async move {
                tier.delete_matching(pattern).await
            })
            .await
        {
            removed.extend(keys);
        }
        removed.extend(self.local.delete_matching(pattern).await?);
        Ok(removed.into_iter().collect())
    }

    async fn clear(&self) -> CacheResult<()> {
        self.call_distributed("clear", |tier| async move { tier.clear().await })
            .await;
        self.local.clear().await
    }

    fn store_type(&self) -> &'static str {
        match self.distributed {
            Some(_) => "tiered",
            None => "memory",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingTier, InMemoryTier};

    #[tokio::test]
    async fn test_falls_back_to_local_and_counts() {
        let local = Arc::new(LocalStore::new(8));
        let store = TieredStore::new(Arc::new(FailingTier::new()), local.clone());

        store.set_json("k", "v".into(), None).await.unwrap();
        assert_eq!(store.get_json("k").await.unwrap(), Some("v".to_string()));
        assert!(local.contains("k"));
        assert_eq!(store.distributed_errors(), 2);
    }

    #[tokio::test]
    async fn test_primary_answer_is_authoritative() {
        let local = Arc::new(LocalStore::new(8));
        local.set_json("k", "old".into(), None).await.unwrap();
        let primary = Arc::new(InMemoryTier::new());
        let store = TieredStore::new(primary.clone(), local.clone());

        assert_eq!(store.get_json("k").await.unwrap(), None);
        store.set_json("k", "new".into(), None).await.unwrap();
        assert!(primary.contains("k"));
        assert_eq!(local.get_json("k").await.unwrap(), Some("old".to_string()));
        assert_eq!(store.distributed_errors(), 0);
    }

    #[tokio::test]
    async fn test_outage_and_recovery() {
        let local = Arc::new(LocalStore::new(8));
        let primary = Arc::new(InMemoryTier::new());
        let store = TieredStore::new(primary.clone(), local.clone());

        primary.set_available(false);
        store.set_json("k", "during-outage".into(), None).await.unwrap();
        assert_eq!(store.get_json("k").await.unwrap(), Some("during-outage".to_string()));

        primary.set_available(true);
        assert_eq!(store.get_json("k").await.unwrap(), None);
        assert_eq!(store.distributed_errors(), 2);
    }

    #[tokio::test]
    async fn test_delete_matching_counts_distinct_keys() {
        let local = Arc::new(LocalStore::new(8));
        let primary = Arc::new(InMemoryTier::new());
        primary.set_json("p:GET:/a", "1".into(), None).await.unwrap();
        primary.set_json("p:GET:/a/2", "1".into(), None).await.unwrap();
        local.set_json("p:GET:/a", "1".into(), None).await.unwrap();
        local.set_json("p:GET:/b", "1".into(), None).await.unwrap();

        let store = TieredStore::new(primary, local.clone());
        let removed = store.delete_matching("/a").await.unwrap();
        assert_eq!(removed, vec!["p:GET:/a".to_string(), "p:GET:/a/2".to_string()]);
        assert!(local.contains("p:GET:/b"));
    }

    #[tokio::test]
    async fn test_clear_reaches_local_when_distributed_fails() {
        let local = Arc::new(LocalStore::new(8));
        local.set_json("k", "v".into(), None).await.unwrap();
        let store = TieredStore::new(Arc::new(FailingTier::new()), local.clone());
        store.clear().await.unwrap();
        assert!(local.is_empty());
        assert_eq!(store.distributed_errors(), 1);
    }

    #[tokio::test]
    async fn test_open_breaker_skips_distributed_tier() {
        let tier = Arc::new(FailingTier::new());
        let local = Arc::new(LocalStore::new(8));
        let store = TieredStore::new(tier.clone(), local.clone()).with_breaker(
            "test",
            BreakerConfig::default()
                .failure_threshold(2)
                .reset_timeout(Duration::from_secs(60)),
        );

        store.set_json("k", "v".into(), None).await.unwrap();
        store.set_json("k", "v".into(), None).await.unwrap();
        assert_eq!(store.breaker_state(), BreakerState::Open);
        assert_eq!(tier.calls(), 2);

        for _ in 0..5 {
            assert_eq!(store.get_json("k").await.unwrap(), Some("v".to_string()));
        }
        // Skipped calls never reach the tier but are still counted
        assert_eq!(tier.calls(), 2);
        assert_eq!(store.distributed_errors(), 7);
    }

    #[tokio::test]
    async fn test_breaker_trial_call_restores_distributed_tier() {
        let primary = Arc::new(InMemoryTier::new());
        let local = Arc::new(LocalStore::new(8));
        let store = TieredStore::new(primary.clone(), local).with_breaker(
            "test",
            BreakerConfig::default()
                .failure_threshold(1)
                .reset_timeout(Duration::from_millis(20)),
        );

        primary.set_available(false);
        store.get_json("k").await.unwrap();
        assert_eq!(store.breaker_state(), BreakerState::Open);

        primary.set_available(true);
        tokio::time::sleep(Duration::from_millis(40)).await;
        store.set_json("k", "v".into(), None).await.unwrap();
        assert_eq!(store.breaker_state(), BreakerState::Closed);
        assert!(primary.contains("k"));
    }

    #[tokio::test]
    async fn test_local_only_store() {
        let store = TieredStore::local_only(Arc::new(LocalStore::new(2)));
        assert_eq!(store.store_type(), "memory");
        store.set_json("k", "v".into(), None).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert_eq!(store.distributed_errors(), 0);
    }
}
