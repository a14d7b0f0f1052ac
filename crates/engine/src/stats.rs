//! Aggregated observability surface (supplemental stats snapshot):
//! each protective component's own counters, rolled up by the front door.

use crate::admission::AdmissionStats;
use crate::protection::ProtectionStatsSnapshot;
use cache_infrastructure::BloomStatsSnapshot;

/// A point-in-time snapshot of every protective component's counters,
/// returned by [`crate::engine::CacheEngine::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Metadata registry (two-list admission cache) counters.
    pub registry: AdmissionStats,
    /// Protection protocol counters (loader invocations, lock timeouts, penetration rejections).
    pub protection: ProtectionStatsSnapshot,
}

/// Health of the engine's dependencies, returned by
/// [`crate::engine::CacheEngine::health`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineHealth {
    /// Whether the backing `RedisStore` answered a liveness check.
    pub backend_reachable: bool,
    /// Current depth of the metadata registry.
    pub registry_size: usize,
    /// Number of pre-refresh jobs currently in flight.
    pub pre_refresh_in_flight: usize,
}

/// Per-filter bloom statistics, re-exported here so callers of
/// [`EngineStats`] don't need a direct dependency on `cache-infrastructure`.
pub type BloomStats = BloomStatsSnapshot;
