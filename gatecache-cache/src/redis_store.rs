//! Redis-backed distributed tier.

use crate::error::CacheResult;
use crate::traits::{CacheStore, CounterStore, LeaseStore};
use async_trait::async_trait;
use gatecache_redis::RedisService;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Keys deleted per `DEL` round trip.
const DELETE_BATCH: usize = 500;

/// Distributed tier shared by every gateway instance.
///
/// Entries live under the cache key itself (already prefixed by the
/// preset), revalidation leases under `lock:revalidate:{key}` and counters
/// under `stats:{prefix}:{name}`. `clear` only touches this preset's
/// namespace.
#[derive(Clone)]
pub struct RedisStore {
    redis: Arc<RedisService>,
    prefix: String,
}

impl RedisStore {
    pub fn new(redis: Arc<RedisService>, prefix: impl Into<String>) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
        }
    }

    pub fn service(&self) -> &RedisService {
        &self.redis
    }

    fn lease_key(key: &str) -> String {
        format!("lock:revalidate:{}", key)
    }

    fn counter_key(&self, name: &str) -> String {
        format!("stats:{}:{}", self.prefix, name)
    }

    fn namespace_glob(&self) -> String {
        format!("{}:*", escape_glob(&self.prefix))
    }

    async fn delete_keys(&self, keys: &[String]) -> CacheResult<()> {
        for batch in keys.chunks(DELETE_BATCH) {
            self.redis.delete_many(batch).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get_json(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.redis.get_value(key).await?)
    }

    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        match ttl {
            Some(ttl) => self.redis.set_px(key, &value, ttl).await?,
            // Entries always expire; fall back to a day if no TTL is given
            None => {
                self.redis
                    .set_px(key, &value, Duration::from_secs(86_400))
                    .await?
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.redis.delete(key).await?)
    }

    async fn delete_matching(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let keys: Vec<String> = self
            .redis
            .scan_match(&self.namespace_glob())
            .await?
            .into_iter()
            .filter(|key| key.contains(pattern))
            .collect();
        self.delete_keys(&keys).await?;
        debug!(pattern = %pattern, count = keys.len(), "Deleted matching Redis keys");
        Ok(keys)
    }

    async fn clear(&self) -> CacheResult<()> {
        let keys = self.redis.scan_match(&self.namespace_glob()).await?;
        self.delete_keys(&keys).await?;
        debug!(prefix = %self.prefix, count = keys.len(), "Cleared Redis namespace");
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "redis"
    }
}

#[async_trait]
impl LeaseStore for RedisStore {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<bool> {
        Ok(self
            .redis
            .set_nx_px(&Self::lease_key(key), token, ttl)
            .await?)
    }

    async fn release(&self, key: &str, token: &str) -> CacheResult<bool> {
        Ok(self
            .redis
            .compare_and_delete(&Self::lease_key(key), token)
            .await?)
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn incr_counter(&self, name: &str) -> CacheResult<i64> {
        Ok(self.redis.incr(&self.counter_key(name)).await?)
    }

    async fn read_counters(&self, names: &[&str]) -> CacheResult<Vec<i64>> {
        let keys: Vec<String> = names.iter().map(|name| self.counter_key(name)).collect();
        Ok(self.redis.mget_i64(&keys).await?)
    }

    async fn reset_counters(&self, names: &[&str]) -> CacheResult<()> {
        let keys: Vec<String> = names.iter().map(|name| self.counter_key(name)).collect();
        self.redis.delete_many(&keys).await?;
        Ok(())
    }
}

/// Escape Redis glob metacharacters so `s` matches literally.
fn escape_glob(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
