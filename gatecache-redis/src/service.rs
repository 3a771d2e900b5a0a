//! Redis service shared by every cache preset.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::{
    RedisConfig, RedisError, Result,
    pool::{RedisConnection, RedisPool, RedisPoolBuilder},
};

/// Lua script deleting a key only when it still holds the given value.
const COMPARE_AND_DELETE: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Keys fetched per `SCAN` round trip.
const SCAN_BATCH: usize = 200;

/// Redis service providing the connection pool and the commands the cache
/// issues.
///
/// Every command, pool checkout included, is bounded by
/// [`RedisConfig::command_timeout`] so a hung server surfaces as
/// [`RedisError::Timeout`] instead of stalling a request.
pub struct RedisService {
    config: RedisConfig,
    pool: RedisPool,
}

impl RedisService {
    /// Create a new Redis service, verifying the server is reachable.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let pool = RedisPoolBuilder::new(config.clone()).build().await?;
        Ok(Self { config, pool })
    }

    /// Create a service whose connections are opened on first use.
    ///
    /// Startup never fails because Redis is down; commands fail (and time
    /// out) until the server comes back.
    pub fn connect_lazy(config: RedisConfig) -> Result<Self> {
        let pool = RedisPoolBuilder::new(config.clone()).build_lazy()?;
        Ok(Self { config, pool })
    }

    /// Create from an existing pool.
    pub fn from_pool(config: RedisConfig, pool: RedisPool) -> Self {
        Self { config, pool }
    }

    /// Get the configuration.
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }

    /// Get a connection from the pool.
    pub async fn get(&self) -> Result<RedisConnection<'_>> {
        let conn = self.pool.get().await?;
        Ok(RedisConnection::new(conn))
    }

    async fn with_timeout<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.command_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                debug!(op, timeout_ms = self.command_timeout_ms(), "Redis command timed out");
                Err(RedisError::Timeout)
            }
        }
    }

    fn command_timeout_ms(&self) -> u64 {
        self.config.command_timeout.as_millis() as u64
    }

    /// Check if the connection is healthy.
    pub async fn health_check(&self) -> Result<()> {
        self.with_timeout("PING", async {
            let mut conn = self.get().await?;
            let _: String = redis::cmd("PING")
                .query_async(&mut *conn)
                .await
                .map_err(|e| RedisError::Connection(e.to_string()))?;
            Ok(())
        })
        .await
    }

    /// `GET key`.
    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        self.with_timeout("GET", async {
            let mut conn = self.get().await?;
            let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut *conn).await?;
            Ok(value)
        })
        .await
    }

    /// `SET key value PX ttl`.
    pub async fn set_px(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let ttl_ms = ttl.as_millis().max(1) as u64;
        self.with_timeout("SET", async {
            let mut conn = self.get().await?;
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut *conn)
                .await?;
            Ok(())
        })
        .await
    }

    /// `SET key value NX PX ttl`; returns whether the key was written.
    pub async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let ttl_ms = ttl.as_millis().max(1) as u64;
        self.with_timeout("SET NX", async {
            let mut conn = self.get().await?;
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut *conn)
                .await?;
            Ok(reply.is_some())
        })
        .await
    }

    /// Delete `key` only if it still holds `expected`.
    pub async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        self.with_timeout("EVAL", async {
            let mut conn = self.get().await?;
            let deleted: i64 = redis::Script::new(COMPARE_AND_DELETE)
                .key(key)
                .arg(expected)
                .invoke_async(&mut *conn)
                .await?;
            Ok(deleted == 1)
        })
        .await
    }

    /// `DEL key`; returns whether a key was removed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.delete_many(&[key.to_string()]).await? > 0)
    }

    /// `DEL key [key ...]`; returns the number of keys removed.
    pub async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.with_timeout("DEL", async {
            let mut conn = self.get().await?;
            let removed: u64 = redis::cmd("DEL").arg(keys).query_async(&mut *conn).await?;
            Ok(removed)
        })
        .await
    }

    /// Collect every key matching a glob pattern with incremental `SCAN`.
    ///
    /// Each round trip is bounded by the command timeout.
    pub async fn scan_match(&self, pattern: &str) -> Result<Vec<String>> {
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = self
                .with_timeout("SCAN", async {
                    let mut conn = self.get().await?;
                    let reply: (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut *conn)
                        .await?;
                    Ok(reply)
                })
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// `INCR key`.
    pub async fn incr(&self, key: &str) -> Result<i64> {
        self.with_timeout("INCR", async {
            let mut conn = self.get().await?;
            let value: i64 = redis::cmd("INCR").arg(key).query_async(&mut *conn).await?;
            Ok(value)
        })
        .await
    }

    /// `MGET key [key ...]` parsed as integers; missing keys read as zero.
    pub async fn mget_i64(&self, keys: &[String]) -> Result<Vec<i64>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.with_timeout("MGET", async {
            let mut conn = self.get().await?;
            let values: Vec<Option<i64>> =
                redis::cmd("MGET").arg(keys).query_async(&mut *conn).await?;
            Ok(values.into_iter().map(|v| v.unwrap_or(0)).collect())
        })
        .await
    }

    /// Get pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            connections: state.connections,
            idle_connections: state.idle_connections,
        }
    }
}

/// Connection pool statistics.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Total connections.
    pub connections: u32,
    /// Idle connections.
    pub idle_connections: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> RedisConfig {
        RedisConfig::builder()
            .url("redis://127.0.0.1:1")
            .connection_timeout(Duration::from_millis(100))
            .command_timeout(Duration::from_millis(200))
            .build()
    }

    #[tokio::test]
    async fn test_lazy_service_starts_without_server() {
        let service = RedisService::connect_lazy(unreachable_config()).unwrap();
        assert_eq!(service.pool_stats().connections, 0);
    }

    #[tokio::test]
    async fn test_commands_fail_when_server_unreachable() {
        let service = RedisService::connect_lazy(unreachable_config()).unwrap();
        assert!(service.get_value("k").await.is_err());
        assert!(service.incr("k").await.is_err());
        assert!(service.health_check().await.is_err());
    }

    #[tokio::test]
    async fn test_empty_batches_skip_round_trip() {
        let service = RedisService::connect_lazy(unreachable_config()).unwrap();
        assert_eq!(service.delete_many(&[]).await.unwrap(), 0);
        assert!(service.mget_i64(&[]).await.unwrap().is_empty());
    }
}
