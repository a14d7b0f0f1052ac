//! Redis-backed bloom filter used for penetration protection.
//!
//! The filter itself is a bitset stored as a Redis hash (`bf:<cache-name>`,
//! field = bit index, value = "1"), addressed with double hashing so only
//! two cryptographic digests are needed per key regardless of `num_hashes`.

use cache_domain::{BloomConfig, CacheError, CacheResult, RedisStore};
use md5::{Digest, Md5};
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{instrument, trace};

/// Running counters for one filter's activity.
#[derive(Debug, Default)]
pub struct BloomStats {
    adds: AtomicU64,
    checks: AtomicU64,
    rejections: AtomicU64,
}

/// Point-in-time copy of [`BloomStats`]'s counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BloomStatsSnapshot {
    /// Number of `add` calls.
    pub adds: u64,
    /// Number of `might_contain` calls.
    pub checks: u64,
    /// Number of `might_contain` calls that returned `false`.
    pub rejections: u64,
}

/// Bloom filter for one logical cache name, backed by a [`RedisStore`].
pub struct BloomFilter {
    store: Arc<dyn RedisStore>,
    hash_key: String,
    config: BloomConfig,
    stats: BloomStats,
}

impl BloomFilter {
    /// Build a filter for `cache_name`, storing its bits under
    /// `bf:<cache_name>` in the given backend.
    pub fn new(store: Arc<dyn RedisStore>, cache_name: &str, config: BloomConfig) -> Self {
        let hash_key = format!("{}{cache_name}", config.prefix);
        Self {
            store,
            hash_key,
            config,
            stats: BloomStats::default(),
        }
    }

    /// The `i`-th bit position for `key`, per the double-hashing scheme:
    /// `p_i = |h1(key) + i * h2(key)| mod m`.
    fn bit_positions(&self, key: &str) -> Vec<u64> {
        let h1 = leading_u64(Md5::digest(key.as_bytes()).as_slice());
        let h2 = leading_u64(Sha256::digest(key.as_bytes()).as_slice());
        (0..self.config.hash_functions)
            .map(|i| {
                let combined = h1.wrapping_add((i as u64).wrapping_mul(h2));
                combined % self.config.bit_size
            })
            .collect()
    }

    /// Record `key` as present.
    #[instrument(skip(self))]
    pub async fn add(&self, key: &str) -> CacheResult<()> {
        for bit in self.bit_positions(key) {
            self.store
                .hset(&self.hash_key, &bit.to_string(), "1")
                .await
                .map_err(|e| CacheError::FilterFailure(e.to_string()))?;
        }
        self.stats.adds.fetch_add(1, Ordering::Relaxed);
        trace!(key, "bloom filter updated");
        Ok(())
    }

    /// Whether `key` might have been added. `false` is a definite answer;
    /// `true` can be a false positive.
    #[instrument(skip(self))]
    pub async fn might_contain(&self, key: &str) -> CacheResult<bool> {
        self.stats.checks.fetch_add(1, Ordering::Relaxed);
        for bit in self.bit_positions(key) {
            let set = self
                .store
                .hget(&self.hash_key, &bit.to_string())
                .await
                .map_err(|e| CacheError::FilterFailure(e.to_string()))?;
            if set.is_none() {
                self.stats.rejections.fetch_add(1, Ordering::Relaxed);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Remove every bit recorded for this cache name (`DEL bf:<cache-name>`).
    #[instrument(skip(self))]
    pub async fn clear(&self) -> CacheResult<()> {
        self.store
            .del(&self.hash_key)
            .await
            .map_err(|e| CacheError::FilterFailure(e.to_string()))?;
        Ok(())
    }

    /// Snapshot this filter's activity counters.
    pub fn stats(&self) -> BloomStatsSnapshot {
        BloomStatsSnapshot {
            adds: self.stats.adds.load(Ordering::Relaxed),
            checks: self.stats.checks.load(Ordering::Relaxed),
            rejections: self.stats.rejections.load(Ordering::Relaxed),
        }
    }
}

/// Interpret the leading 8 bytes of a digest as a big-endian `u64`.
fn leading_u64(digest: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(buf)
}
