//! Write-through cache protection engine: the two-list admission cache,
//! TTL policy, local lock registry, pre-refresh executor, protection
//! protocols, the GET handler pipeline, metadata registry, and the
//! front-door `CacheEngine` that wires them together.
//!
//! Everything here is generic over the `cache-domain` trait boundary
//! (`RedisStore`, `Codec`, `KeyResolver`) and the `cache-infrastructure`
//! Redis-backed implementations of the bloom filter and distributed lock —
//! this crate has no transport code of its own.

pub mod admission;
pub mod engine;
pub mod local_lock;
pub mod pipeline;
pub mod protection;
pub mod refresh;
pub mod registry;
pub mod stats;
pub mod ttl;

pub use admission::{AdmissionCache, AdmissionStats};
pub use engine::CacheEngine;
pub use local_lock::LocalLockRegistry;
pub use pipeline::{run_get_chain, GetContext, GetHandler, HandlerOutcome};
pub use protection::{
    breakdown_lock_key, evict_lock_key, penetration_check, BreakdownProtocol, ProtectionStats,
    ProtectionStatsSnapshot,
};
pub use refresh::PreRefreshExecutor;
pub use registry::MetadataRegistry;
pub use stats::{BloomStats, EngineHealth, EngineStats};
pub use ttl::{avalanche_ttl, effective_ttl, is_expired, remaining_ms, should_pre_refresh};
