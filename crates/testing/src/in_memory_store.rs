//! An in-memory [`RedisStore`] double, so the engine's concurrency
//! invariants (single-flight, lock ordering, admission eviction) can be
//! unit-tested without a live Redis server.

use async_trait::async_trait;
use cache_domain::{CacheError, CacheResult, RedisStore};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Clone)]
struct StringEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StringEntry {
    fn is_live(&self) -> bool {
        match self.expires_at {
            Some(at) => at > Instant::now(),
            None => true,
        }
    }
}

#[derive(Default)]
struct Store {
    strings: HashMap<String, StringEntry>,
    hashes: HashMap<String, HashMap<String, String>>,
}

/// A single-process stand-in for Redis, backed by a mutex-guarded map.
/// Expiry is evaluated lazily on read, mirroring how a real Redis server
/// appears to a client that never inspects internal eviction timing.
pub struct InMemoryRedisStore {
    inner: Mutex<Store>,
}

impl Default for InMemoryRedisStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRedisStore {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Store::default()),
        }
    }
}

#[async_trait]
impl RedisStore for InMemoryRedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut store = self.inner.lock().await;
        if let Some(entry) = store.strings.get(key) {
            if entry.is_live() {
                return Ok(Some(entry.value.clone()));
            }
            store.strings.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8]) -> CacheResult<()> {
        let mut store = self.inner.lock().await;
        store.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_vec(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_seconds: u64) -> CacheResult<()> {
        let mut store = self.inner.lock().await;
        store.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_vec(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_seconds)),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<bool> {
        let mut store = self.inner.lock().await;
        Ok(store.strings.remove(key).is_some())
    }

    async fn del_many(&self, keys: &[String]) -> CacheResult<u64> {
        let mut store = self.inner.lock().await;
        let mut removed = 0u64;
        for key in keys {
            if store.strings.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> CacheResult<bool> {
        self.pexpire(key, ttl_seconds * 1000).await
    }

    async fn pexpire(&self, key: &str, ttl_ms: u64) -> CacheResult<bool> {
        let mut store = self.inner.lock().await;
        match store.strings.get_mut(key) {
            Some(entry) if entry.is_live() => {
                entry.expires_at = Some(Instant::now() + Duration::from_millis(ttl_ms));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl_ms(&self, key: &str) -> CacheResult<Option<i64>> {
        let store = self.inner.lock().await;
        match store.strings.get(key) {
            Some(entry) if entry.is_live() => match entry.expires_at {
                Some(at) => Ok(Some(at.saturating_duration_since(Instant::now()).as_millis() as i64)),
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        let store = self.inner.lock().await;
        Ok(store
            .hashes
            .get(key)
            .and_then(|fields| fields.get(field))
            .cloned())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> CacheResult<()> {
        let mut store = self.inner.lock().await;
        store
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        let store = self.inner.lock().await;
        Ok(store
            .strings
            .iter()
            .filter(|(k, v)| k.starts_with(prefix) && v.is_live())
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> CacheResult<bool> {
        let mut store = self.inner.lock().await;
        let occupied = store
            .strings
            .get(key)
            .map(StringEntry::is_live)
            .unwrap_or(false);
        if occupied {
            return Ok(false);
        }
        store.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.as_bytes().to_vec(),
                expires_at: Some(Instant::now() + Duration::from_millis(ttl_ms)),
            },
        );
        Ok(true)
    }

    async fn compare_and_del(&self, key: &str, expected_value: &str) -> CacheResult<bool> {
        let mut store = self.inner.lock().await;
        let matches = store
            .strings
            .get(key)
            .map(|entry| entry.is_live() && entry.value == expected_value.as_bytes())
            .unwrap_or(false);
        if matches {
            store.strings.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Always-unavailable double used to exercise the engine's error paths
/// (backend down during GET, SET, or lock acquisition).
pub struct FailingRedisStore;

fn unavailable() -> CacheError {
    CacheError::BackendUnavailable("simulated backend outage".to_string())
}

#[async_trait]
impl RedisStore for FailingRedisStore {
    async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        Err(unavailable())
    }
    async fn set(&self, _key: &str, _value: &[u8]) -> CacheResult<()> {
        Err(unavailable())
    }
    async fn set_ex(&self, _key: &str, _value: &[u8], _ttl_seconds: u64) -> CacheResult<()> {
        Err(unavailable())
    }
    async fn del(&self, _key: &str) -> CacheResult<bool> {
        Err(unavailable())
    }
    async fn del_many(&self, _keys: &[String]) -> CacheResult<u64> {
        Err(unavailable())
    }
    async fn expire(&self, _key: &str, _ttl_seconds: u64) -> CacheResult<bool> {
        Err(unavailable())
    }
    async fn pexpire(&self, _key: &str, _ttl_ms: u64) -> CacheResult<bool> {
        Err(unavailable())
    }
    async fn ttl_ms(&self, _key: &str) -> CacheResult<Option<i64>> {
        Err(unavailable())
    }
    async fn exists(&self, _key: &str) -> CacheResult<bool> {
        Err(unavailable())
    }
    async fn hget(&self, _key: &str, _field: &str) -> CacheResult<Option<String>> {
        Err(unavailable())
    }
    async fn hset(&self, _key: &str, _field: &str, _value: &str) -> CacheResult<()> {
        Err(unavailable())
    }
    async fn keys_with_prefix(&self, _prefix: &str) -> CacheResult<Vec<String>> {
        Err(unavailable())
    }
    async fn set_nx_px(&self, _key: &str, _value: &str, _ttl_ms: u64) -> CacheResult<bool> {
        Err(unavailable())
    }
    async fn compare_and_del(&self, _key: &str, _expected_value: &str) -> CacheResult<bool> {
        Err(unavailable())
    }
}
