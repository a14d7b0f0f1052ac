//! Protection Protocols: penetration (bloom pre-check), breakdown
//! (triple-check + single-flight), and avalanche (TTL jitter, in `ttl.rs`).

use crate::local_lock::LocalLockRegistry;
use cache_domain::{CacheError, CacheResult};
use cache_infrastructure::{BloomFilter, DistributedLockAdapter};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

/// Running counters for the protection protocols, aggregated by the front
/// door into its own stats snapshot.
#[derive(Debug, Default)]
pub struct ProtectionStats {
    loader_invocations: AtomicU64,
    lock_timeouts: AtomicU64,
    penetration_rejections: AtomicU64,
}

/// Point-in-time copy of [`ProtectionStats`]'s counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtectionStatsSnapshot {
    /// Number of times a breakdown-protected loader actually ran.
    pub loader_invocations: u64,
    /// Number of times the distributed lease could not be acquired in time.
    pub lock_timeouts: u64,
    /// Number of GETs short-circuited by the bloom filter.
    pub penetration_rejections: u64,
}

impl ProtectionStats {
    /// Snapshot the current counters.
    pub fn snapshot(&self) -> ProtectionStatsSnapshot {
        ProtectionStatsSnapshot {
            loader_invocations: self.loader_invocations.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            penetration_rejections: self.penetration_rejections.load(Ordering::Relaxed),
        }
    }
}

/// Consult the bloom filter before running a loader. Returns
/// `false` when the pipeline should short-circuit with a rejected-by-filter
/// miss. Fails open: any backend error is treated as "might contain".
#[instrument(skip(bloom, stats))]
pub async fn penetration_check(bloom: &BloomFilter, key: &str, stats: &ProtectionStats) -> bool {
    match bloom.might_contain(key).await {
        Ok(true) => true,
        Ok(false) => {
            stats.penetration_rejections.fetch_add(1, Ordering::Relaxed);
            false
        }
        Err(err) => {
            warn!(error = %err, key, "bloom filter check failed, failing open");
            true
        }
    }
}

/// The triple-check, single-flight breakdown protocol. `reader` is
/// re-invoked up to three times; `loader` runs at most once per call to
/// this function; `writer` persists a freshly loaded value before it is
/// returned. The local mutex is always acquired before the distributed
/// lease and released in the reverse order.
pub struct BreakdownProtocol<'a> {
    local_locks: &'a LocalLockRegistry,
    distributed_lock: Option<&'a dyn DistributedLockAdapter>,
    stats: &'a ProtectionStats,
}

impl<'a> BreakdownProtocol<'a> {
    /// Build a protocol instance over the shared local lock registry and an
    /// optional distributed lock adapter (absent when `distributed-lock`
    /// is not configured for the descriptor in effect).
    pub fn new(
        local_locks: &'a LocalLockRegistry,
        distributed_lock: Option<&'a dyn DistributedLockAdapter>,
        stats: &'a ProtectionStats,
    ) -> Self {
        Self {
            local_locks,
            distributed_lock,
            stats,
        }
    }

    /// Run the protocol for `identity` (typically `cache-name::key`), inside
    /// a task-local reentrancy scope (see `local_lock::with_reentrancy_scope`)
    /// so a user loader that re-enters the engine for the same identity on
    /// this task does not deadlock on the local mutex.
    #[instrument(skip(self, reader, loader, writer), fields(identity))]
    pub async fn run<V, R, RFut, L, LFut, W, WFut>(
        &self,
        identity: &str,
        lease_ms: u64,
        wait_ms: u64,
        reader: R,
        loader: L,
        writer: W,
    ) -> CacheResult<V>
    where
        R: Fn() -> RFut,
        RFut: Future<Output = CacheResult<Option<V>>>,
        L: FnOnce() -> LFut,
        LFut: Future<Output = CacheResult<Option<V>>>,
        W: FnOnce(&V) -> WFut,
        WFut: Future<Output = CacheResult<()>>,
    {
        crate::local_lock::with_reentrancy_scope(self.run_locked(identity, lease_ms, wait_ms, reader, loader, writer))
            .await
    }

    async fn run_locked<V, R, RFut, L, LFut, W, WFut>(
        &self,
        identity: &str,
        lease_ms: u64,
        wait_ms: u64,
        reader: R,
        loader: L,
        writer: W,
    ) -> CacheResult<V>
    where
        R: Fn() -> RFut,
        RFut: Future<Output = CacheResult<Option<V>>>,
        L: FnOnce() -> LFut,
        LFut: Future<Output = CacheResult<Option<V>>>,
        W: FnOnce(&V) -> WFut,
        WFut: Future<Output = CacheResult<()>>,
    {
        if let Some(v) = reader().await? {
            return Ok(v);
        }

        let _local_guard = self.local_locks.lock(identity).await;

        if let Some(v) = reader().await? {
            return Ok(v);
        }

        let lease = match self.distributed_lock {
            Some(adapter) => match adapter.lock(identity, lease_ms, wait_ms).await {
                Ok(lease) => Some(lease),
                Err(CacheError::LockAcquisitionTimeout { .. }) => {
                    self.stats.lock_timeouts.fetch_add(1, Ordering::Relaxed);
                    // Policy: fall back to whatever reader() last produced;
                    // if still null, surface a miss rather than invoking the loader.
                    return match reader().await? {
                        Some(v) => Ok(v),
                        None => Err(CacheError::LockAcquisitionTimeout { wait_ms }),
                    };
                }
                Err(err) => return Err(err),
            },
            None => None,
        };

        let result = async {
            if let Some(v) = reader().await? {
                return Ok(v);
            }

            self.stats.loader_invocations.fetch_add(1, Ordering::Relaxed);
            let loaded = loader().await?.ok_or(CacheError::LoaderReturnedNull)?;
            writer(&loaded).await?;
            Ok(loaded)
        }
        .await;

        if let (Some(adapter), Some(lease)) = (self.distributed_lock, lease.as_ref()) {
            let _ = adapter.unlock(lease).await;
        }

        result
    }
}

/// Key used for the distributed lease guarding a breakdown-protected loader.
pub fn breakdown_lock_key(prefix: Option<&str>, cache_name: &str, key: &str) -> String {
    let prefix = prefix.unwrap_or("breakdown");
    format!("{prefix}:{cache_name}::{key}")
}

/// Key used for the delayed eviction lease.
pub fn evict_lock_key(cache_name: &str, key: &str) -> String {
    format!("cache:evict:{cache_name}::{key}")
}

/// Default lease and wait budgets used when the descriptor does not
/// otherwise specify them.
pub const DEFAULT_LEASE_MS: u64 = 10_000;
pub const DEFAULT_WAIT_MS: u64 = 5_000;

/// Sleep helper kept in one place so the delayed-delete scheduler and any
/// future caller share the same clock abstraction point.
pub async fn delay(duration: Duration) {
    tokio::time::sleep(duration).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use cache_infrastructure::RedisDistributedLock;
    use cache_testing::InMemoryRedisStore;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration as StdDuration;
    use tokio::sync::Mutex as AsyncStdMutex;

    #[tokio::test]
    async fn single_flight_with_local_lock_only() {
        let registry = LocalLockRegistry::new(StdDuration::from_secs(60));
        let stats = ProtectionStats::default();
        let protocol = BreakdownProtocol::new(&registry, None, &stats);

        let store: Arc<AsyncStdMutex<Option<i32>>> = Arc::new(AsyncStdMutex::new(None));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            let calls = calls.clone();
            let protocol = &protocol;
            handles.push(async move {
                protocol
                    .run(
                        "hot:1",
                        5_000,
                        5_000,
                        || {
                            let store = store.clone();
                            async move { Ok(*store.lock().await) }
                        },
                        || {
                            let calls = calls.clone();
                            async move {
                                calls.fetch_add(1, Ordering::SeqCst);
                                tokio::time::sleep(StdDuration::from_millis(10)).await;
                                Ok(Some(42))
                            }
                        },
                        |v| {
                            let store = store.clone();
                            let v = *v;
                            async move {
                                *store.lock().await = Some(v);
                                Ok(())
                            }
                        },
                    )
                    .await
            });
        }

        let results = futures::future::join_all(handles).await;
        for r in results {
            assert_eq!(r.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_flight_with_distributed_lock() {
        let registry = LocalLockRegistry::new(StdDuration::from_secs(60));
        let redis_store: Arc<dyn cache_domain::RedisStore> = Arc::new(InMemoryRedisStore::new());
        let adapter = RedisDistributedLock::new(redis_store);
        let stats = ProtectionStats::default();
        let protocol = BreakdownProtocol::new(&registry, Some(&adapter), &stats);

        let store: Arc<AsyncStdMutex<Option<i32>>> = Arc::new(AsyncStdMutex::new(None));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            let calls = calls.clone();
            let protocol = &protocol;
            handles.push(async move {
                protocol
                    .run(
                        "hot:2",
                        5_000,
                        5_000,
                        || {
                            let store = store.clone();
                            async move { Ok(*store.lock().await) }
                        },
                        || {
                            let calls = calls.clone();
                            async move {
                                calls.fetch_add(1, Ordering::SeqCst);
                                Ok(Some(7))
                            }
                        },
                        |v| {
                            let store = store.clone();
                            let v = *v;
                            async move {
                                *store.lock().await = Some(v);
                                Ok(())
                            }
                        },
                    )
                    .await
            });
        }

        let results = futures::future::join_all(handles).await;
        for r in results {
            assert_eq!(r.unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn loader_returning_null_surfaces_as_error() {
        let registry = LocalLockRegistry::new(StdDuration::from_secs(60));
        let stats = ProtectionStats::default();
        let protocol = BreakdownProtocol::new(&registry, None, &stats);

        let result: CacheResult<i32> = protocol
            .run(
                "missing:1",
                5_000,
                5_000,
                || async { Ok(None) },
                || async { Ok(None) },
                |_| async { Ok(()) },
            )
            .await;

        assert!(matches!(result, Err(CacheError::LoaderReturnedNull)));
    }
}
