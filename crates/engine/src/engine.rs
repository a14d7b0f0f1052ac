//! Cache Engine: the public front door. Owns every protective
//! component and assembles the canonical GET/EVICT/CLEAR sequence per call,
//! looking up (or synthesizing) the governing descriptor from the Metadata
//! Registry.

use crate::admission::AdmissionStats;
use crate::protection::{breakdown_lock_key, evict_lock_key, BreakdownProtocol, ProtectionStats};
use crate::refresh::PreRefreshExecutor;
use crate::registry::MetadataRegistry;
use crate::stats::{EngineHealth, EngineStats};
use crate::ttl::{avalanche_ttl, effective_ttl};
use crate::local_lock::LocalLockRegistry;
use cache_domain::{normalize_key, CacheError, CacheResult, Codec, EngineConfig, MethodDescriptor, OperationType, RedisStore, ValueEnvelope};
use cache_infrastructure::{BloomFilter, DistributedLockAdapter, RedisDistributedLock};
use cache_common::now_ms;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

struct EngineShared {
    store: Arc<dyn RedisStore>,
    registry: MetadataRegistry,
    local_locks: LocalLockRegistry,
    distributed_lock: RedisDistributedLock,
    pre_refresh: PreRefreshExecutor,
    protection_stats: ProtectionStats,
    config: EngineConfig,
}

/// The engine's public surface. Cheap to clone — every field is shared via
/// `Arc` internally, so a clone is a new handle onto the same running
/// engine (needed so pre-refresh jobs can hold a handle across a spawn
/// boundary without borrowing the caller's engine reference).
#[derive(Clone)]
pub struct CacheEngine {
    shared: Arc<EngineShared>,
}

impl CacheEngine {
    /// Build an engine over `store`, with `config` governing admission
    /// cache sizing, bloom parameters, pre-refresh sizing, and jitter
    /// policy.
    pub fn new(store: Arc<dyn RedisStore>, config: EngineConfig) -> Self {
        let distributed_lock = RedisDistributedLock::new(store.clone());
        let sweep_interval = Duration::from_millis(config.cleanup.interval_ms);
        let shared = EngineShared {
            registry: MetadataRegistry::new(config.admission_active_cap, config.admission_inactive_cap),
            local_locks: LocalLockRegistry::new(Duration::from_millis(config.cleanup.lock_max_idle_ms)),
            pre_refresh: PreRefreshExecutor::new(&config.pre_refresh),
            protection_stats: ProtectionStats::default(),
            distributed_lock,
            store,
            config,
        };
        let engine = Self { shared: Arc::new(shared) };
        engine.spawn_lock_sweeper(sweep_interval);
        engine
    }

    /// Periodically sweep two bookkeeping structures at
    /// `cleanup.interval_ms`: unheld, uncontended local locks idle longer
    /// than `cleanup.lock_max_idle_ms`, and pre-refresh in-flight records
    /// older than `cleanup.invocation_max_idle_ms` whose completion
    /// notification was missed.
    fn spawn_lock_sweeper(&self, interval: Duration) {
        let shared = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately, nothing to sweep yet
            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                let removed = shared.local_locks.sweep();
                if removed > 0 {
                    debug!(removed, "local lock registry sweep");
                }
                let invocation_max_idle = Duration::from_millis(shared.config.cleanup.invocation_max_idle_ms);
                shared.pre_refresh.sweep(invocation_max_idle).await;
            }
        });
    }

    /// Register a descriptor for `(cache_name, key)` so later calls pick up
    /// its protection settings. Direct API use without registration falls
    /// back to [`MethodDescriptor::default_for`] (no locks, no bloom,
    /// cache-default TTL).
    pub fn register(&self, cache_name: &str, key: &str, operation: OperationType, descriptor: MethodDescriptor) {
        self.shared.registry.register(cache_name, key, operation, descriptor);
    }

    fn descriptor_for(&self, cache_name: &str, key: &str) -> MethodDescriptor {
        self.shared
            .registry
            .get(cache_name, key, OperationType::Cache)
            .unwrap_or_else(|| MethodDescriptor::default_for(cache_name))
    }

    pub(crate) fn bloom_filter(&self, cache_name: &str) -> BloomFilter {
        BloomFilter::new(self.shared.store.clone(), cache_name, self.shared.config.bloom.clone())
    }

    pub(crate) fn protection_stats(&self) -> &ProtectionStats {
        &self.shared.protection_stats
    }

    pub(crate) fn storage_key(cache_name: &str, key: &str) -> String {
        format!("{cache_name}::{key}")
    }

    pub(crate) async fn read_envelope(&self, storage_key: &str) -> CacheResult<Option<ValueEnvelope>> {
        match self.shared.store.get(storage_key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// `get(name, key) -> ValueWrapper?`: a plain read with no loader
    /// fallback, no breakdown protection, no pre-refresh trigger.
    #[instrument(skip(self))]
    pub async fn get_raw(&self, cache_name: &str, key: &str) -> CacheResult<Option<ValueEnvelope>> {
        let normalized = normalize_key(key);
        let storage_key = Self::storage_key(cache_name, &normalized);
        match self.read_envelope(&storage_key).await? {
            Some(envelope) if !envelope.is_expired(now_ms()) => Ok(Some(envelope)),
            _ => Ok(None),
        }
    }

    /// `get(name, key, type) -> T?`: a plain typed read, decoding through
    /// `codec`. No loader, no breakdown protection.
    pub async fn get<V, C>(&self, cache_name: &str, key: &str, codec: &C) -> CacheResult<Option<V>>
    where
        C: Codec<V>,
    {
        match self.get_raw(cache_name, key).await? {
            Some(envelope) if !envelope.is_null_sentinel() => {
                Ok(Some(codec.decode(envelope.value.as_ref().unwrap())?))
            }
            Some(_) => Ok(None),
            None => Ok(None),
        }
    }

    /// `get(name, key, loader) -> T`: the full canonical GET sequence,
    /// driven through the handler pipeline — bloom penetration check, cache
    /// read (with pre-refresh trigger on a near-expiry hit), breakdown-
    /// protected loader on miss, write-back on a fresh load.
    #[instrument(skip(self, codec, loader))]
    pub async fn get_with_loader<V, C, L, LFut>(
        &self,
        cache_name: &str,
        key: &str,
        codec: Arc<C>,
        loader: L,
    ) -> CacheResult<Option<V>>
    where
        V: Clone + Send + Sync + 'static,
        C: Codec<V> + Send + Sync + 'static,
        L: Fn() -> LFut + Send + Sync + Clone + 'static,
        LFut: Future<Output = CacheResult<Option<V>>> + Send + 'static,
    {
        let normalized = normalize_key(key);
        let descriptor = self.descriptor_for(cache_name, &normalized);
        let storage_key = Self::storage_key(cache_name, &normalized);

        let mut context = crate::pipeline::GetContext::new(cache_name, descriptor);
        context.key = Some(normalized.clone());

        let handlers: Vec<Box<dyn crate::pipeline::GetHandler<V>>> = vec![
            Box::new(crate::pipeline::BloomStep {
                engine: self.clone(),
                cache_name: cache_name.to_string(),
            }),
            Box::new(crate::pipeline::CacheReadStep {
                engine: self.clone(),
                cache_name: cache_name.to_string(),
                key: normalized.clone(),
                storage_key,
                codec: codec.clone(),
                loader: loader.clone(),
                _marker: std::marker::PhantomData,
            }),
            Box::new(crate::pipeline::BreakdownLoaderStep {
                engine: self.clone(),
                cache_name: cache_name.to_string(),
                key: normalized.clone(),
                codec: codec.clone(),
                loader,
                _marker: std::marker::PhantomData,
            }),
            Box::new(crate::pipeline::CacheWriteStep {
                engine: self.clone(),
                cache_name: cache_name.to_string(),
                key: normalized,
                codec,
                _marker: std::marker::PhantomData,
            }),
        ];

        crate::pipeline::run_get_chain(&handlers, context).await
    }

    /// Run the breakdown protocol for a single GET miss. Returns the loaded
    /// (or raced-in) value, and whether it was freshly written to the store
    /// by the protocol's own `writer` step — which runs *inside* the
    /// protocol, under whichever locks are configured, before they release
    /// (§4.7.2 step 5 "call writer(loaded)" precedes step 6 "release …").
    /// Writing here rather than after `run_breakdown` returns is what keeps
    /// the single-flight guarantee honest: a waiter that wakes on the local
    /// mutex re-runs `reader()` before anything else, so it must be able to
    /// observe the write-back before the locks are gone, not after.
    pub(crate) async fn run_breakdown<V, C, L, LFut>(
        &self,
        cache_name: &str,
        key: &str,
        descriptor: &MethodDescriptor,
        codec: Arc<C>,
        loader: L,
    ) -> CacheResult<Option<(V, bool)>>
    where
        V: Clone + Send + Sync + 'static,
        C: Codec<V> + Send + Sync + 'static,
        L: Fn() -> LFut + Send,
        LFut: Future<Output = CacheResult<Option<V>>> + Send,
    {
        let identity = format!("{cache_name}::{key}");
        let storage_key = Self::storage_key(cache_name, key);
        let lock_key = breakdown_lock_key(descriptor.distributed_lock_name.as_deref(), cache_name, key);

        let distributed: Option<&dyn DistributedLockAdapter> =
            if descriptor.distributed_lock { Some(&self.shared.distributed_lock) } else { None };
        let protocol = BreakdownProtocol::new(&self.shared.local_locks, distributed, &self.shared.protection_stats);

        // The reader genuinely re-reads and decodes Redis on every retry
        // (initial, post-local-lock, post-distributed-lease): this is what
        // lets a second caller discover the first caller's write-back
        // instead of re-running the loader.
        let store = self.shared.store.clone();
        let reader = {
            let store = store.clone();
            let storage_key = storage_key.clone();
            let codec = codec.clone();
            move || {
                let store = store.clone();
                let storage_key = storage_key.clone();
                let codec = codec.clone();
                async move {
                    match store.get(&storage_key).await? {
                        Some(bytes) => {
                            let envelope: ValueEnvelope = serde_json::from_slice(&bytes)?;
                            if envelope.is_expired(now_ms()) || envelope.is_null_sentinel() {
                                Ok(None)
                            } else {
                                Ok(Some(codec.decode(envelope.value.as_ref().unwrap())?))
                            }
                        }
                        None => Ok(None),
                    }
                }
            }
        };

        let wrote = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let engine = self.clone();
        let cache_name_owned = cache_name.to_string();
        let key_owned = key.to_string();
        let descriptor_owned = descriptor.clone();
        let wrote_for_writer = wrote.clone();

        let result = protocol
            .run(
                &identity,
                crate::protection::DEFAULT_LEASE_MS,
                crate::protection::DEFAULT_WAIT_MS,
                reader,
                || async move {
                    match loader().await? {
                        Some(v) => Ok(Some(v)),
                        None => Ok(None),
                    }
                },
                move |v: &V| {
                    let engine = engine.clone();
                    let cache_name = cache_name_owned.clone();
                    let key = key_owned.clone();
                    let descriptor = descriptor_owned.clone();
                    let codec = codec.clone();
                    let value = v.clone();
                    let wrote = wrote_for_writer.clone();
                    async move {
                        engine.write_value(&cache_name, &key, &descriptor, codec.as_ref(), &value).await?;
                        wrote.store(true, std::sync::atomic::Ordering::Relaxed);
                        Ok(())
                    }
                },
            )
            .await;

        let _ = lock_key;
        match result {
            Ok(v) => Ok(Some((v, wrote.load(std::sync::atomic::Ordering::Relaxed)))),
            Err(CacheError::LoaderReturnedNull) if descriptor.cache_null_values => Ok(None),
            Err(CacheError::LockAcquisitionTimeout { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub(crate) fn trigger_pre_refresh<V, C, L, LFut>(
        &self,
        cache_name: &str,
        key: &str,
        descriptor: MethodDescriptor,
        codec: Arc<C>,
        loader: L,
    ) where
        V: Clone + Send + Sync + 'static,
        C: Codec<V> + Send + Sync + 'static,
        L: Fn() -> LFut + Send + Sync + Clone + 'static,
        LFut: Future<Output = CacheResult<Option<V>>> + Send + 'static,
    {
        let engine = self.clone();
        let cache_name = cache_name.to_string();
        let key = key.to_string();
        let refresh_key = format!("{cache_name}::{key}:refresh");

        let task: Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send> = Box::new(move || {
            Box::pin(async move {
                match loader().await {
                    Ok(Some(value)) => {
                        if let Err(err) = engine.write_value(&cache_name, &key, &descriptor, codec.as_ref(), &value).await {
                            warn!(error = %err, cache_name, key, "pre-refresh write-back failed");
                        }
                    }
                    Ok(None) => debug!(cache_name, key, "pre-refresh loader returned no value"),
                    Err(err) => warn!(error = %err, cache_name, key, "pre-refresh loader failed"),
                }
            })
        });

        let executor = self.shared.pre_refresh.clone();
        tokio::spawn(async move {
            executor.submit(refresh_key, task).await;
        });
    }

    pub(crate) async fn write_value<V, C>(
        &self,
        cache_name: &str,
        key: &str,
        descriptor: &MethodDescriptor,
        codec: &C,
        value: &V,
    ) -> CacheResult<()>
    where
        C: Codec<V>,
    {
        let bytes = codec.encode(value)?;
        self.write_bytes(cache_name, key, descriptor, Some(bytes), codec.type_tag())
            .await
    }

    pub(crate) async fn write_null(&self, cache_name: &str, key: &str, descriptor: &MethodDescriptor) -> CacheResult<()> {
        self.write_bytes(cache_name, key, descriptor, None, "null").await
    }

    async fn write_bytes(
        &self,
        cache_name: &str,
        key: &str,
        descriptor: &MethodDescriptor,
        payload: Option<Vec<u8>>,
        type_tag: &str,
    ) -> CacheResult<()> {
        // ttl_seconds == 0 means "use the cache's configured default";
        // negative means "never expires" and skips jitter entirely.
        let base_ttl = if descriptor.ttl_seconds == 0 {
            self.shared.config.default_ttl_seconds
        } else {
            descriptor.ttl_seconds
        };

        let ttl = if base_ttl < 0 {
            base_ttl
        } else if descriptor.random_ttl {
            effective_ttl(base_ttl, true, descriptor.variance)
        } else {
            avalanche_ttl(base_ttl, &self.shared.config.avalanche)
        };

        let envelope = ValueEnvelope::new(payload, type_tag, ttl, now_ms());
        let encoded = serde_json::to_vec(&envelope)?;
        let storage_key = Self::storage_key(cache_name, key);

        if ttl > 0 {
            self.shared.store.set_ex(&storage_key, &encoded, ttl as u64).await?;
        } else {
            self.shared.store.set(&storage_key, &encoded).await?;
        }

        if descriptor.use_bloom_filter {
            let bloom = self.bloom_filter(cache_name);
            if let Err(err) = bloom.add(key).await {
                warn!(error = %err, cache_name, key, "bloom filter update failed");
            }
        }

        Ok(())
    }

    /// `put(name, key, value)` / `put(name, key, value, ttl)`.
    pub async fn put<V, C>(&self, cache_name: &str, key: &str, codec: &C, value: &V) -> CacheResult<()>
    where
        C: Codec<V>,
    {
        let normalized = normalize_key(key);
        let descriptor = self.descriptor_for(cache_name, &normalized);
        self.write_value(cache_name, &normalized, &descriptor, codec, value).await
    }

    /// `put(name, key, value, ttl)`: override the descriptor's TTL for this call.
    pub async fn put_with_ttl<V, C>(
        &self,
        cache_name: &str,
        key: &str,
        codec: &C,
        value: &V,
        ttl_seconds: i64,
    ) -> CacheResult<()>
    where
        C: Codec<V>,
    {
        let normalized = normalize_key(key);
        let mut descriptor = self.descriptor_for(cache_name, &normalized);
        descriptor.ttl_seconds = ttl_seconds;
        self.write_value(cache_name, &normalized, &descriptor, codec, value).await
    }

    /// `put-if-absent(name, key, value) -> ValueWrapper?`: returns the
    /// existing value if present (without invoking breakdown protection —
    /// the open-question resolution in DESIGN.md), otherwise writes `value`
    /// and returns `None`.
    pub async fn put_if_absent<V, C>(&self, cache_name: &str, key: &str, codec: &C, value: &V) -> CacheResult<Option<V>>
    where
        C: Codec<V>,
    {
        let normalized = normalize_key(key);
        if let Some(existing) = self.get(cache_name, &normalized, codec).await? {
            return Ok(Some(existing));
        }
        let descriptor = self.descriptor_for(cache_name, &normalized);
        self.write_value(cache_name, &normalized, &descriptor, codec, value).await?;
        Ok(None)
    }

    /// `evict(name, key)`: immediate delete, registry cleanup, scheduled
    /// delayed delete (the double-delete protocol).
    #[instrument(skip(self))]
    pub async fn evict(&self, cache_name: &str, key: &str) -> CacheResult<()> {
        let normalized = normalize_key(key);
        let storage_key = Self::storage_key(cache_name, &normalized);

        // Step 1: immediate delete.
        self.shared.store.del(&storage_key).await?;

        // Step 2: registry cleanup.
        self.shared.registry.remove(cache_name, &normalized, OperationType::Cache);
        self.shared.registry.remove(cache_name, &normalized, OperationType::Evict);

        // Step 3: scheduled delayed delete under lock.
        let engine = self.clone();
        let cache_name_owned = cache_name.to_string();
        let key_owned = normalized.clone();
        let delay = Duration::from_millis(self.shared.config.double_delete_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let lock_key = evict_lock_key(&cache_name_owned, &key_owned);
            if let Ok(lease) = engine
                .shared
                .distributed_lock
                .try_lock(&lock_key, crate::protection::DEFAULT_LEASE_MS)
                .await
            {
                let storage_key = Self::storage_key(&cache_name_owned, &key_owned);
                if let Err(err) = engine.shared.store.del(&storage_key).await {
                    warn!(error = %err, "scheduled delayed delete failed");
                }
                engine.shared.registry.remove(&cache_name_owned, &key_owned, OperationType::Cache);
                if let Some(lease) = lease {
                    let _ = engine.shared.distributed_lock.unlock(&lease).await;
                }
            }
        });

        Ok(())
    }

    /// `clear(name)`: evict every key under `cache_name`, then drop every
    /// descriptor registered under it (§3: descriptors are "destroyed when
    /// the enclosing cache is cleared"; §4.10: `remove-all(cache-name)`
    /// supports this cleanup) so they don't linger in the registry until
    /// they age out under admission pressure.
    #[instrument(skip(self))]
    pub async fn clear(&self, cache_name: &str) -> CacheResult<()> {
        let prefix = format!("{cache_name}::");
        let keys = self.shared.store.keys_with_prefix(&prefix).await?;
        self.shared.store.del_many(&keys).await?;
        let bloom = self.bloom_filter(cache_name);
        bloom.clear().await?;
        self.shared.registry.remove_all(cache_name);
        Ok(())
    }

    /// Aggregate health of the engine's dependencies.
    pub async fn health(&self) -> EngineHealth {
        let backend_reachable = self.shared.store.exists("__health__").await.is_ok();
        EngineHealth {
            backend_reachable,
            registry_size: self.shared.registry.size(),
            pre_refresh_in_flight: self.shared.pre_refresh.in_flight_count().await,
        }
    }

    /// A snapshot of the running protective-component counters.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            registry: self.registry_stats(),
            protection: self.shared.protection_stats.snapshot(),
        }
    }

    fn registry_stats(&self) -> AdmissionStats {
        self.shared.registry.stats()
    }

    /// Drain the engine's background executors: stop the pre-refresh pool
    /// from accepting new jobs, wait up to `grace` for outstanding refreshes
    /// to finish on their own, then force-terminate whatever remains. The
    /// delayed-delete and lock-sweeper background tasks are not joined here
    /// since they are bounded, fire-and-forget, and hold no resources worth
    /// waiting on; they are dropped along with this engine's last handle.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, grace: Duration) {
        self.shared.pre_refresh.shutdown(grace).await;
    }
}
