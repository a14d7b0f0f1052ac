//! The value envelope stored under `<cache-name>::<key>` in Redis.

use serde::{Deserialize, Serialize};

/// Wraps a cached payload with the metadata needed to self-report age and
/// expiry without a second round-trip to ask Redis for the key's TTL.
///
/// `value` is `None` for a cached "null" result (only ever stored when the
/// owning descriptor has `cache_null_values = true`); callers distinguish a
/// stored null from "no envelope at all" by the presence of the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueEnvelope {
    /// Opaque codec output, or `None` for a cached null.
    pub value: Option<Vec<u8>>,
    /// Declared type name, used by the `Codec` to deserialize `value`.
    pub type_tag: String,
    /// TTL in seconds at the time of write; replicates the Redis `EXPIRE` so
    /// the envelope can self-report age. `<= 0` means "no expiry".
    pub ttl_seconds: i64,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_epoch_ms: i64,
    /// Last-access time, milliseconds since the Unix epoch. Mutated
    /// opportunistically on GET; a missed writeback does not violate
    /// correctness.
    pub last_access_epoch_ms: i64,
    /// Number of times this envelope has been read since creation.
    pub visit_count: u64,
    /// Monotonic write version, bumped on every PUT of the same key.
    pub version: u64,
    /// Cached verdict of the last expiry check, opportunistically updated.
    pub expired_flag: bool,
}

impl ValueEnvelope {
    /// Wrap `value` at `now_ms` with the given TTL in seconds.
    pub fn new(value: Option<Vec<u8>>, type_tag: impl Into<String>, ttl_seconds: i64, now_ms: i64) -> Self {
        Self {
            value,
            type_tag: type_tag.into(),
            ttl_seconds,
            created_epoch_ms: now_ms,
            last_access_epoch_ms: now_ms,
            visit_count: 0,
            version: 1,
            expired_flag: false,
        }
    }

    /// `true` whenever `ttl_seconds > 0 AND (now - created) > ttl * 1000`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.ttl_seconds > 0 && (now_ms - self.created_epoch_ms) > self.ttl_seconds * 1000
    }

    /// Milliseconds remaining before expiry, or `None` if the envelope never expires.
    pub fn remaining_ms(&self, now_ms: i64) -> Option<i64> {
        if self.ttl_seconds <= 0 {
            return None;
        }
        let total_ms = self.ttl_seconds * 1000;
        let elapsed_ms = now_ms - self.created_epoch_ms;
        Some((total_ms - elapsed_ms).max(0))
    }

    /// `true` when `elapsed / total >= 1 - threshold`. Guarded against a
    /// degenerate threshold outside `(0, 1)`, in which case pre-refresh is a
    /// no-op (never fires).
    pub fn should_pre_refresh(&self, now_ms: i64, threshold: f64) -> bool {
        if !(threshold > 0.0 && threshold < 1.0) {
            return false;
        }
        if self.ttl_seconds <= 0 {
            return false;
        }
        let total_ms = (self.ttl_seconds * 1000) as f64;
        let elapsed_ms = (now_ms - self.created_epoch_ms) as f64;
        (elapsed_ms / total_ms) >= (1.0 - threshold)
    }

    /// Bump access statistics. Fire-and-forget from the caller's perspective:
    /// this only mutates the in-memory copy, the caller decides whether to
    /// write it back.
    pub fn record_access(&mut self, now_ms: i64) {
        self.last_access_epoch_ms = now_ms;
        self.visit_count = self.visit_count.saturating_add(1);
    }

    /// Whether this envelope represents a cached null result.
    pub fn is_null_sentinel(&self) -> bool {
        self.value.is_none()
    }
}
