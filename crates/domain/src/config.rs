//! Engine configuration surface: bloom filter sizing, pre-refresh pool
//! bounds, avalanche jitter defaults, and cleanup sweep intervals.
//!
//! Every recognized option has a name, a default, and an environment
//! variable override, following the same `#[serde(default = "...")]` plus
//! `from_env()` pattern used by the rest of this workspace's configuration
//! types.

use serde::{Deserialize, Serialize};

fn default_double_delete_delay_ms() -> u64 {
    1000
}

fn default_engine_default_ttl_seconds() -> i64 {
    3600
}

fn default_cleanup_interval_ms() -> u64 {
    60_000
}

fn default_lock_max_idle_ms() -> u64 {
    300_000
}

fn default_invocation_max_idle_ms() -> u64 {
    600_000
}

fn default_bloom_prefix() -> String {
    "bf:".to_string()
}

fn default_bloom_bit_size() -> u64 {
    1 << 23
}

fn default_bloom_hash_functions() -> u32 {
    3
}

fn default_pre_refresh_core() -> usize {
    2
}

fn default_pre_refresh_max() -> usize {
    8
}

fn default_pre_refresh_queue() -> usize {
    256
}

fn default_pre_refresh_keep_alive_seconds() -> u64 {
    60
}

fn default_min_jitter_ratio() -> f64 {
    0.05
}

fn default_max_jitter_ratio() -> f64 {
    0.20
}

fn default_avalanche_min_seconds() -> i64 {
    1
}

fn default_admission_active_cap() -> usize {
    1024
}

fn default_admission_inactive_cap() -> usize {
    512
}

/// Bloom filter encoding parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloomConfig {
    /// Key prefix for the Redis hash backing the filter (`bf:<cache-name>`).
    #[serde(default = "default_bloom_prefix")]
    pub prefix: String,
    /// Bit-space size `m`.
    #[serde(default = "default_bloom_bit_size")]
    pub bit_size: u64,
    /// Number of hash functions `k`.
    #[serde(default = "default_bloom_hash_functions")]
    pub hash_functions: u32,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            prefix: default_bloom_prefix(),
            bit_size: default_bloom_bit_size(),
            hash_functions: default_bloom_hash_functions(),
        }
    }
}

/// Pre-refresh worker pool sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreRefreshConfig {
    /// Core worker count.
    #[serde(default = "default_pre_refresh_core")]
    pub core: usize,
    /// Maximum worker count.
    #[serde(default = "default_pre_refresh_max")]
    pub max: usize,
    /// Bounded queue depth ahead of the "caller-runs" rejection policy.
    #[serde(default = "default_pre_refresh_queue")]
    pub queue: usize,
    /// Idle-worker keep-alive, in seconds, above `core`.
    #[serde(default = "default_pre_refresh_keep_alive_seconds")]
    pub keep_alive_seconds: u64,
}

impl Default for PreRefreshConfig {
    fn default() -> Self {
        Self {
            core: default_pre_refresh_core(),
            max: default_pre_refresh_max(),
            queue: default_pre_refresh_queue(),
            keep_alive_seconds: default_pre_refresh_keep_alive_seconds(),
        }
    }
}

/// System-default avalanche jitter policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvalancheConfig {
    /// Lower bound of the system-default jitter ratio.
    #[serde(default = "default_min_jitter_ratio")]
    pub min_jitter_ratio: f64,
    /// Upper bound of the system-default jitter ratio.
    #[serde(default = "default_max_jitter_ratio")]
    pub max_jitter_ratio: f64,
    /// Floor applied to any computed effective TTL, in seconds.
    #[serde(default = "default_avalanche_min_seconds")]
    pub min_seconds: i64,
}

impl Default for AvalancheConfig {
    fn default() -> Self {
        Self {
            min_jitter_ratio: default_min_jitter_ratio(),
            max_jitter_ratio: default_max_jitter_ratio(),
            min_seconds: default_avalanche_min_seconds(),
        }
    }
}

/// Local lock registry sweeper cadence and thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Sweeper tick interval.
    #[serde(default = "default_cleanup_interval_ms")]
    pub interval_ms: u64,
    /// Idle window after which an unheld, uncontended lock is removed.
    #[serde(default = "default_lock_max_idle_ms")]
    pub lock_max_idle_ms: u64,
    /// Idle window after which an in-flight refresh invocation record is
    /// dropped even if a completion notification was missed.
    #[serde(default = "default_invocation_max_idle_ms")]
    pub invocation_max_idle_ms: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_cleanup_interval_ms(),
            lock_max_idle_ms: default_lock_max_idle_ms(),
            invocation_max_idle_ms: default_invocation_max_idle_ms(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base TTL, in seconds, substituted whenever a descriptor's
    /// `ttl_seconds` is `0` ("use the cache's configured default"). Must be
    /// a positive number of seconds — `write_bytes` still applies whichever
    /// jitter policy the descriptor calls for on top of this base.
    #[serde(default = "default_engine_default_ttl_seconds")]
    pub default_ttl_seconds: i64,
    /// Delay before the scheduled second EVICT runs (the "double delete").
    #[serde(default = "default_double_delete_delay_ms")]
    pub double_delete_delay_ms: u64,
    /// Two-list admission cache capacity, active list.
    #[serde(default = "default_admission_active_cap")]
    pub admission_active_cap: usize,
    /// Two-list admission cache capacity, inactive list.
    #[serde(default = "default_admission_inactive_cap")]
    pub admission_inactive_cap: usize,
    /// Bloom filter encoding.
    #[serde(default)]
    pub bloom: BloomConfig,
    /// Pre-refresh executor sizing.
    #[serde(default)]
    pub pre_refresh: PreRefreshConfig,
    /// Avalanche system-default jitter policy.
    #[serde(default)]
    pub avalanche: AvalancheConfig,
    /// Local lock registry sweeper.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: default_engine_default_ttl_seconds(),
            double_delete_delay_ms: default_double_delete_delay_ms(),
            admission_active_cap: default_admission_active_cap(),
            admission_inactive_cap: default_admission_inactive_cap(),
            bloom: BloomConfig::default(),
            pre_refresh: PreRefreshConfig::default(),
            avalanche: AvalancheConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration the way the rest of this workspace does: layered
    /// `config/default.{toml,yaml,...}` plus `config/<CACHE_ENV>` file
    /// sources (both optional), topped with `CACHE__`-prefixed environment
    /// variables (`CACHE__BLOOM__BIT_SIZE=...` maps to `bloom.bit_size`),
    /// falling back to [`EngineConfig::default`] for anything unset.
    pub fn load() -> anyhow::Result<Self> {
        let env = std::env::var("CACHE_ENV").unwrap_or_else(|_| "development".to_string());

        let defaults = serde_json::to_value(Self::default())?;
        let built = config::Config::builder()
            .add_source(config::Config::try_from(&defaults)?)
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("CACHE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = built.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject combinations that would otherwise silently misbehave rather
    /// than fail loudly at startup.
    fn validate(&self) -> anyhow::Result<()> {
        if self.default_ttl_seconds <= 0 {
            anyhow::bail!("default_ttl_seconds must be greater than 0");
        }
        if self.admission_active_cap == 0 {
            anyhow::bail!("admission_active_cap must be greater than 0");
        }
        if !(self.avalanche.min_jitter_ratio >= 0.0 && self.avalanche.min_jitter_ratio < self.avalanche.max_jitter_ratio)
        {
            anyhow::bail!("avalanche.min_jitter_ratio must be in [0, max_jitter_ratio)");
        }
        if !(self.avalanche.max_jitter_ratio <= 1.0) {
            anyhow::bail!("avalanche.max_jitter_ratio must be <= 1.0");
        }
        if self.bloom.hash_functions == 0 {
            anyhow::bail!("bloom.hash_functions must be greater than 0");
        }
        Ok(())
    }

    /// Build a configuration from environment variables only, falling back
    /// to defaults for anything unset or unparseable. Used by callers (e.g.
    /// the CLI) that don't want the file-layering [`EngineConfig::load`] does.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_i64("CACHE_DEFAULT_TTL_SECONDS") {
            config.default_ttl_seconds = v;
        }
        if let Some(v) = env_u64("CACHE_DOUBLE_DELETE_DELAY_MS") {
            config.double_delete_delay_ms = v;
        }
        if let Some(v) = env_usize("CACHE_ADMISSION_ACTIVE_CAP") {
            config.admission_active_cap = v;
        }
        if let Some(v) = env_usize("CACHE_ADMISSION_INACTIVE_CAP") {
            config.admission_inactive_cap = v;
        }
        if let Ok(v) = std::env::var("CACHE_BLOOM_PREFIX") {
            config.bloom.prefix = v;
        }
        if let Some(v) = env_u64("CACHE_BLOOM_BIT_SIZE") {
            config.bloom.bit_size = v;
        }
        if let Some(v) = env_u32("CACHE_BLOOM_HASH_FUNCTIONS") {
            config.bloom.hash_functions = v;
        }
        if let Some(v) = env_usize("CACHE_PRE_REFRESH_CORE") {
            config.pre_refresh.core = v;
        }
        if let Some(v) = env_usize("CACHE_PRE_REFRESH_MAX") {
            config.pre_refresh.max = v;
        }
        if let Some(v) = env_usize("CACHE_PRE_REFRESH_QUEUE") {
            config.pre_refresh.queue = v;
        }
        if let Some(v) = env_u64("CACHE_PRE_REFRESH_KEEP_ALIVE_SECONDS") {
            config.pre_refresh.keep_alive_seconds = v;
        }
        if let Some(v) = env_f64("CACHE_AVALANCHE_MIN_JITTER_RATIO") {
            config.avalanche.min_jitter_ratio = v;
        }
        if let Some(v) = env_f64("CACHE_AVALANCHE_MAX_JITTER_RATIO") {
            config.avalanche.max_jitter_ratio = v;
        }
        if let Some(v) = env_i64("CACHE_AVALANCHE_MIN_SECONDS") {
            config.avalanche.min_seconds = v;
        }
        if let Some(v) = env_u64("CACHE_CLEANUP_INTERVAL_MS") {
            config.cleanup.interval_ms = v;
        }
        if let Some(v) = env_u64("CACHE_CLEANUP_LOCK_MAX_IDLE_MS") {
            config.cleanup.lock_max_idle_ms = v;
        }
        if let Some(v) = env_u64("CACHE_CLEANUP_INVOCATION_MAX_IDLE_MS") {
            config.cleanup.invocation_max_idle_ms = v;
        }

        config
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = EngineConfig::default();
        assert_eq!(config.default_ttl_seconds, 3600);
        assert_eq!(config.bloom.bit_size, 1 << 23);
        assert_eq!(config.bloom.hash_functions, 3);
        assert_eq!(config.admission_active_cap, 1024);
        assert_eq!(config.admission_inactive_cap, 512);
        assert_eq!(config.avalanche.min_jitter_ratio, 0.05);
        assert_eq!(config.avalanche.max_jitter_ratio, 0.20);
    }

    #[test]
    fn serde_roundtrip_with_partial_json_uses_defaults() {
        let json = serde_json::json!({});
        let config: EngineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn validate_rejects_zero_active_cap() {
        let mut config = EngineConfig::default();
        config.admission_active_cap = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_jitter_bounds() {
        let mut config = EngineConfig::default();
        config.avalanche.min_jitter_ratio = 0.5;
        config.avalanche.max_jitter_ratio = 0.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_positive_default_ttl() {
        let mut config = EngineConfig::default();
        config.default_ttl_seconds = 0;
        assert!(config.validate().is_err());
        config.default_ttl_seconds = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_without_files_or_env_falls_back_to_defaults() {
        // No `config/default.*` file exists relative to this crate's test
        // working directory, and no `CACHE__*`/`CACHE_ENV` vars are set, so
        // `load` should resolve to plain defaults.
        let loaded = EngineConfig::load().expect("load should succeed with no sources");
        assert_eq!(loaded, EngineConfig::default());
    }
}
