//! Storage seams of the response cache.

use crate::error::CacheResult;
use async_trait::async_trait;
use std::time::Duration;

/// Key/value storage for serialized entries.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a JSON value from the cache.
    ///
    /// Returns `Ok(None)` if the key is absent or its TTL has passed.
    async fn get_json(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set a JSON value, retained for at most `ttl`.
    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()>;

    /// Delete a key; returns whether it existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Delete every key containing `pattern` and return the removed keys.
    async fn delete_matching(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Remove every entry this store owns.
    async fn clear(&self) -> CacheResult<()>;

    /// Short name used in logs.
    fn store_type(&self) -> &'static str;
}

/// Named exclusive leases with a TTL.
///
/// A lease is held by whoever wrote `token`; only that holder can release
/// it, and it disappears on its own once `ttl` passes.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Try to take the lease; `Ok(false)` means someone else holds it.
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<bool>;

    /// Release the lease if it is still held with `token`.
    async fn release(&self, key: &str, token: &str) -> CacheResult<bool>;
}

/// Monotonic named counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment a counter and return its new value.
    async fn incr_counter(&self, name: &str) -> CacheResult<i64>;

    /// Read counters in order; missing counters read as zero.
    async fn read_counters(&self, names: &[&str]) -> CacheResult<Vec<i64>>;

    /// Reset counters to zero.
    async fn reset_counters(&self, names: &[&str]) -> CacheResult<()>;
}

/// Everything the cache needs from a store shared between gateway
/// instances.
pub trait DistributedTier: CacheStore + LeaseStore + CounterStore {}

impl<T: CacheStore + LeaseStore + CounterStore> DistributedTier for T {}
