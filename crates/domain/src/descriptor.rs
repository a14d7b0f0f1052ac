//! Method descriptor and registry key types.
//!
//! A `MethodDescriptor` is the record stamped onto an annotated cache method
//! by the (external) annotation-discovery layer. This crate never discovers
//! descriptors itself — it only defines the record shape and the key under
//! which the engine looks descriptors up.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which half of the cache surface a registry entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperationType {
    /// A `@Cacheable`-style read-through method.
    Cache,
    /// An `@CacheEvict`-style invalidation method.
    Evict,
}

/// The tuple `(cache-name, normalized-key, operation-type)` used to index
/// descriptors and per-key local locks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegistryKey {
    /// Logical cache namespace.
    pub cache_name: String,
    /// Normalized cache key (see [`normalize_key`]).
    pub key: String,
    /// Cache vs. evict indexing.
    pub operation: OperationType,
}

impl RegistryKey {
    /// Build a registry key, normalizing `key` along the way.
    pub fn new(cache_name: impl Into<String>, key: impl AsRef<str>, operation: OperationType) -> Self {
        Self {
            cache_name: cache_name.into(),
            key: normalize_key(key.as_ref()),
            operation,
        }
    }
}

/// Collapse equivalent representations of the same key into one canonical
/// string: leading/trailing whitespace is trimmed and interior runs of
/// whitespace are collapsed to a single space. Case is preserved — callers
/// that need case-insensitive keys normalize before handing the key to the
/// engine.
pub fn normalize_key(key: &str) -> String {
    let trimmed = key.trim();
    let mut normalized = String::with_capacity(trimmed.len());
    let mut last_was_space = false;
    for ch in trimmed.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                normalized.push(' ');
            }
            last_was_space = true;
        } else {
            normalized.push(ch);
            last_was_space = false;
        }
    }
    normalized
}

/// The descriptor stamped onto every annotated cache method. The core engine
/// treats this as an opaque, immutable configuration record looked up by
/// `(cache-name, key)` during invocation; it never mutates one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    /// Ordered set of logical cache names this descriptor applies to.
    pub cache_names: Vec<String>,
    /// Expression used to derive the cache key from method arguments, if any.
    pub key_expression: Option<String>,
    /// Name of a registered key-generator bean, if used instead of `key_expression`.
    pub key_generator_name: Option<String>,
    /// Base TTL in seconds. `0` means "use the cache's configured default";
    /// negative means "never expires".
    pub ttl_seconds: i64,
    /// Apply user-requested jitter using `variance` when `true`.
    pub random_ttl: bool,
    /// Jitter ratio in `[0, 1]`; effective TTL is drawn from `base * (1 - u)`, `u in [0, variance)`.
    pub variance: f64,
    /// Consult the Redis-backed bloom filter on GET when `true`.
    pub use_bloom_filter: bool,
    /// Store a loader-returned null as a sentinel rather than bypassing caching.
    pub cache_null_values: bool,
    /// Wrap the breakdown protocol in the distributed lock adapter.
    pub distributed_lock: bool,
    /// Wrap the breakdown protocol in the local reentrant mutex.
    pub internal_lock: bool,
    /// Optional prefix for the distributed lease key.
    pub distributed_lock_name: Option<String>,
    /// Schedule an async refresh when remaining-TTL / configured-TTL falls
    /// at or below `pre_refresh_threshold`.
    pub enable_pre_refresh: bool,
    /// Threshold in `(0, 1)`; defaults to `0.3`.
    pub pre_refresh_threshold: f64,
    /// Evict before the annotated method body runs.
    pub before_invocation: bool,
    /// Evict invalidates the entire cache rather than a single key.
    pub all_entries: bool,
    /// Force breakdown protection even for keys not flagged as hot.
    pub sync: bool,
    /// Boolean expression gating whether the descriptor applies to a call.
    pub condition: Option<String>,
    /// Boolean expression gating whether the result is cached (post-invocation).
    pub unless: Option<String>,
    /// Declared element type name, used by the `Codec` for deserialization.
    pub value_type: Option<String>,
}

impl MethodDescriptor {
    /// A descriptor synthesized for direct API use when no annotation-layer
    /// registration exists: no locks, no bloom filter, the cache's default TTL.
    pub fn default_for(cache_name: impl Into<String>) -> Self {
        Self {
            cache_names: vec![cache_name.into()],
            key_expression: None,
            key_generator_name: None,
            ttl_seconds: 0,
            random_ttl: false,
            variance: 0.0,
            use_bloom_filter: false,
            cache_null_values: false,
            distributed_lock: false,
            internal_lock: false,
            distributed_lock_name: None,
            enable_pre_refresh: false,
            pre_refresh_threshold: 0.3,
            before_invocation: false,
            all_entries: false,
            sync: false,
            condition: None,
            unless: None,
            value_type: None,
        }
    }

    /// Deduplicated, order-preserving view of `cache_names`.
    pub fn unique_cache_names(&self) -> BTreeSet<&str> {
        self.cache_names.iter().map(String::as_str).collect()
    }

    /// Whether breakdown protection should wrap a given invocation:
    /// either it is explicitly forced (`sync`), or at least one lock mode
    /// is configured at all.
    pub fn breakdown_protected(&self) -> bool {
        self.sync || self.distributed_lock || self.internal_lock
    }
}
