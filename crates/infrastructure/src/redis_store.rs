//! `RedisStore` implementation backed by the `redis` crate's async connection manager.

use async_trait::async_trait;
use cache_domain::{CacheError, CacheResult, RedisStore};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, instrument, warn};

/// Connection configuration for the Redis-backed store.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL (`redis://host:port`).
    pub url: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

impl RedisStoreConfig {
    /// Build configuration from the `REDIS_URL` environment variable, falling
    /// back to `redis://localhost:6379`.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        }
    }
}

/// Redis-backed implementation of [`cache_domain::RedisStore`].
pub struct RedisBackedStore {
    connection: ConnectionManager,
}

/// Lua script for an atomic compare-and-delete: only removes `KEYS[1]` if
/// its current value is `ARGV[1]`. Used both by the distributed lock
/// adapter's safe unlock and by anything else needing a guarded delete.
const COMPARE_AND_DEL_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

impl RedisBackedStore {
    /// Connect to Redis, eagerly establishing the connection manager.
    #[instrument(skip(config))]
    pub async fn connect(config: RedisStoreConfig) -> CacheResult<Self> {
        let client = redis::Client::open(config.url.clone())
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        debug!(url = %config.url, "connected to redis");
        Ok(Self { connection })
    }

    fn conn(&self) -> ConnectionManager {
        self.connection.clone()
    }

    /// `PING`, used by the engine's health check.
    pub async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn();
        let response: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        if response == "PONG" {
            Ok(())
        } else {
            Err(CacheError::BackendUnavailable(format!(
                "unexpected PING response: {response}"
            )))
        }
    }
}

#[async_trait]
impl RedisStore for RedisBackedStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.conn();
        conn.get(key)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: &[u8]) -> CacheResult<()> {
        let mut conn = self.conn();
        conn.set(key, value)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))
    }

    #[instrument(skip(self, value))]
    async fn set_ex(&self, key: &str, value: &[u8], ttl_seconds: u64) -> CacheResult<()> {
        let mut conn = self.conn();
        conn.set_ex(key, value, ttl_seconds)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn del(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn();
        let removed: u64 = conn
            .del(key)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(removed > 0)
    }

    #[instrument(skip(self))]
    async fn del_many(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        conn.del(keys)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn expire(&self, key: &str, ttl_seconds: u64) -> CacheResult<bool> {
        let mut conn = self.conn();
        conn.expire(key, ttl_seconds as i64)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn pexpire(&self, key: &str, ttl_ms: u64) -> CacheResult<bool> {
        let mut conn = self.conn();
        conn.pexpire(key, ttl_ms as i64)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn ttl_ms(&self, key: &str) -> CacheResult<Option<i64>> {
        let mut conn = self.conn();
        let ttl: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(if ttl < 0 { None } else { Some(ttl) })
    }

    #[instrument(skip(self))]
    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn();
        conn.exists(key)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn();
        conn.hget(key, field)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn hset(&self, key: &str, field: &str, value: &str) -> CacheResult<()> {
        let mut conn = self.conn();
        conn.hset(key, field, value)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.conn();
        let pattern = format!("{prefix}*");
        redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))
    }

    #[instrument(skip(self, value))]
    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> CacheResult<bool> {
        let mut conn = self.conn();
        let acquired: bool = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(acquired)
    }

    #[instrument(skip(self))]
    async fn compare_and_del(&self, key: &str, expected_value: &str) -> CacheResult<bool> {
        let mut conn = self.conn();
        let deleted: i32 = redis::cmd("EVAL")
            .arg(COMPARE_AND_DEL_SCRIPT)
            .arg(1)
            .arg(key)
            .arg(expected_value)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(error = %e, "compare-and-delete script failed");
                CacheError::BackendUnavailable(e.to_string())
            })?;
        Ok(deleted == 1)
    }
}
