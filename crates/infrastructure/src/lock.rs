//! Distributed lease used to gate breakdown-protected loaders across
//! process boundaries. A thin poll loop over `SET NX PX` plus a
//! compare-and-delete unlock, so a lease can only be released by the holder
//! that acquired it.

use async_trait::async_trait;
use cache_common::{retry_with_backoff, RetryConfig};
use cache_domain::{CacheError, CacheResult, RedisStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{instrument, warn};
use uuid::Uuid;

/// A held distributed lease. Dropping this without calling [`unlock`] leaves
/// the lease to expire on its own PX TTL; callers that need deterministic
/// release should always call `unlock` explicitly (typically in a `finally`-
/// style guard around the protected section).
///
/// [`unlock`]: DistributedLockAdapter::unlock
#[derive(Debug, Clone)]
pub struct LeaseToken {
    /// The Redis key the lease lives under.
    pub key: String,
    /// Random token identifying this holder, used by the compare-and-delete unlock.
    pub token: String,
}

/// Distributed mutual exclusion over a Redis-backed store.
#[async_trait]
pub trait DistributedLockAdapter: Send + Sync {
    /// Attempt to acquire the lease once, without waiting.
    async fn try_lock(&self, key: &str, lease_ms: u64) -> CacheResult<Option<LeaseToken>>;

    /// Poll for the lease until acquired or `wait_ms` elapses, returning
    /// [`CacheError::LockAcquisitionTimeout`] on exhaustion.
    async fn lock(&self, key: &str, lease_ms: u64, wait_ms: u64) -> CacheResult<LeaseToken>;

    /// Release a held lease. A no-op (returns `false`) if the lease already
    /// expired or was never held by this token.
    async fn unlock(&self, token: &LeaseToken) -> CacheResult<bool>;
}

/// [`DistributedLockAdapter`] backed by a [`RedisStore`].
pub struct RedisDistributedLock {
    store: Arc<dyn RedisStore>,
    prefix: String,
    poll_interval: Duration,
}

impl RedisDistributedLock {
    /// Build a lock adapter over `store`, namespacing lease keys under
    /// `lock:<key>` and polling every `poll_interval` while waiting.
    pub fn new(store: Arc<dyn RedisStore>) -> Self {
        Self {
            store,
            prefix: "lock:".to_string(),
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Override the default 50ms poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn lease_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

#[async_trait]
impl DistributedLockAdapter for RedisDistributedLock {
    #[instrument(skip(self))]
    async fn try_lock(&self, key: &str, lease_ms: u64) -> CacheResult<Option<LeaseToken>> {
        let lease_key = self.lease_key(key);
        let token = Uuid::new_v4().to_string();
        let acquired = self.store.set_nx_px(&lease_key, &token, lease_ms).await?;
        Ok(acquired.then_some(LeaseToken {
            key: lease_key,
            token,
        }))
    }

    #[instrument(skip(self))]
    async fn lock(&self, key: &str, lease_ms: u64, wait_ms: u64) -> CacheResult<LeaseToken> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(wait_ms);
        loop {
            if let Some(lease) = self.try_lock(key, lease_ms).await? {
                return Ok(lease);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CacheError::LockAcquisitionTimeout { wait_ms });
            }
            sleep(self.poll_interval).await;
        }
    }

    #[instrument(skip(self, token))]
    async fn unlock(&self, token: &LeaseToken) -> CacheResult<bool> {
        let released = self.store.compare_and_del(&token.key, &token.token).await?;
        if !released {
            warn!(key = %token.key, "unlock called on a lease we no longer hold");
        }
        Ok(released)
    }
}

/// Retry a `lock` acquisition attempt using the shared exponential backoff
/// helper instead of the adapter's own fixed poll interval, for callers that
/// want jittered retries rather than a tight poll loop (e.g. a caller
/// competing with many others for the same hot key).
pub async fn lock_with_backoff(
    adapter: &dyn DistributedLockAdapter,
    key: &str,
    lease_ms: u64,
    retry_config: RetryConfig,
) -> CacheResult<LeaseToken> {
    retry_with_backoff(retry_config, || async {
        adapter
            .try_lock(key, lease_ms)
            .await
            .and_then(|maybe| maybe.ok_or(CacheError::LockAcquisitionTimeout { wait_ms: lease_ms }))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use cache_testing::InMemoryRedisStore;

    fn lock_adapter() -> RedisDistributedLock {
        let store: Arc<dyn RedisStore> = Arc::new(InMemoryRedisStore::new());
        RedisDistributedLock::new(store).with_poll_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn second_try_lock_fails_while_held() {
        let adapter = lock_adapter();
        let first = adapter.try_lock("k", 5_000).await.unwrap();
        assert!(first.is_some());
        let second = adapter.try_lock("k", 5_000).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn unlock_then_relock_succeeds() {
        let adapter = lock_adapter();
        let lease = adapter.try_lock("k", 5_000).await.unwrap().unwrap();
        assert!(adapter.unlock(&lease).await.unwrap());
        assert!(adapter.try_lock("k", 5_000).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn lock_times_out_when_held_by_another() {
        let adapter = lock_adapter();
        let _held = adapter.try_lock("k", 5_000).await.unwrap().unwrap();
        let result = adapter.lock("k", 5_000, 30).await;
        assert!(matches!(result, Err(CacheError::LockAcquisitionTimeout { .. })));
    }

    #[tokio::test]
    async fn lock_waits_for_release_then_succeeds() {
        let adapter = lock_adapter();
        let held = adapter.try_lock("k", 5_000).await.unwrap().unwrap();
        let store_clone = adapter.store.clone();
        let key_clone = held.key.clone();
        let token_clone = held.token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            let _ = store_clone.compare_and_del(&key_clone, &token_clone).await;
        });
        let result = adapter.lock("k", 5_000, 500).await;
        assert!(result.is_ok());
    }
}
