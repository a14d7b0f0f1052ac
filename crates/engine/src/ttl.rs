//! Pure TTL computation: effective TTL given a base, user jitter, and
//! the system-default avalanche jitter applied when the caller opts out of
//! their own variance.

use cache_domain::AvalancheConfig;
use rand::Rng;

/// Compute the effective TTL in seconds for a PUT.
///
/// - `base <= 0`: returned unchanged ("don't touch expiry" / "never expires").
/// - `random = false`: returned unchanged.
/// - `random = true`: draw `u` uniformly from `[0, variance)` and return
///   `max(1, floor(base * (1 - u)))`. The jitter only ever shortens the TTL.
pub fn effective_ttl(base: i64, random: bool, variance: f64) -> i64 {
    if base <= 0 || !random {
        return base;
    }
    let u = rand::thread_rng().gen_range(0.0..variance.max(f64::EPSILON));
    ((base as f64) * (1.0 - u)).floor().max(1.0) as i64
}

/// Apply the system-default avalanche jitter when the descriptor
/// did not request its own variance: `u` drawn from
/// `[min_jitter_ratio, max_jitter_ratio)`, floored at `min_seconds`.
pub fn avalanche_ttl(base: i64, config: &AvalancheConfig) -> i64 {
    if base <= 0 {
        return base;
    }
    let u = rand::thread_rng().gen_range(config.min_jitter_ratio..config.max_jitter_ratio);
    let jittered = ((base as f64) * (1.0 - u)).floor() as i64;
    jittered.max(config.min_seconds)
}

/// `true` whenever `ttl > 0 AND (now - created) > ttl * 1000`.
pub fn is_expired(created_epoch_ms: i64, ttl_seconds: i64, now_ms: i64) -> bool {
    ttl_seconds > 0 && (now_ms - created_epoch_ms) > ttl_seconds * 1000
}

/// Milliseconds remaining before expiry, or `None` if the TTL never expires.
pub fn remaining_ms(created_epoch_ms: i64, ttl_seconds: i64, now_ms: i64) -> Option<i64> {
    if ttl_seconds <= 0 {
        return None;
    }
    let total_ms = ttl_seconds * 1000;
    let elapsed_ms = now_ms - created_epoch_ms;
    Some((total_ms - elapsed_ms).max(0))
}

/// `elapsed / total >= 1 - threshold`, a no-op outside `(0, 1)`.
pub fn should_pre_refresh(created_epoch_ms: i64, ttl_seconds: i64, now_ms: i64, threshold: f64) -> bool {
    if !(threshold > 0.0 && threshold < 1.0) || ttl_seconds <= 0 {
        return false;
    }
    let total_ms = (ttl_seconds * 1000) as f64;
    let elapsed_ms = (now_ms - created_epoch_ms) as f64;
    (elapsed_ms / total_ms) >= (1.0 - threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_base_passes_through() {
        assert_eq!(effective_ttl(0, true, 0.5), 0);
    }

    #[test]
    fn negative_base_passes_through() {
        assert_eq!(effective_ttl(-1, true, 0.9), -1);
    }

    #[test]
    fn no_jitter_returns_base_unchanged() {
        assert_eq!(effective_ttl(100, false, 0.5), 100);
    }

    #[test]
    fn jitter_floors_at_one_second() {
        for _ in 0..1000 {
            let ttl = effective_ttl(1, true, 0.9);
            assert!(ttl >= 1);
        }
    }

    #[test]
    fn jitter_never_extends_base() {
        for _ in 0..1000 {
            let ttl = effective_ttl(100, true, 0.5);
            assert!(ttl <= 100);
            assert!(ttl >= 1);
        }
    }

    #[test]
    fn avalanche_jitter_respects_config_bounds() {
        let config = AvalancheConfig::default();
        for _ in 0..1000 {
            let ttl = avalanche_ttl(3600, &config);
            assert!(ttl <= 3600);
            assert!((ttl as f64) >= 3600.0 * (1.0 - config.max_jitter_ratio));
        }
    }

    #[test]
    fn is_expired_respects_zero_ttl() {
        assert!(!is_expired(0, 0, i64::MAX));
    }

    #[test]
    fn pre_refresh_is_noop_at_degenerate_thresholds() {
        assert!(!should_pre_refresh(0, 10, 9_999, 0.0));
        assert!(!should_pre_refresh(0, 10, 9_999, 1.0));
    }
}
