//! Property tests for the pure TTL computations, covering the jitter bounds
//! that the unit tests in `ttl.rs` only sample with fixed loop counts.

use cache_domain::AvalancheConfig;
use cache_engine::ttl::{avalanche_ttl, effective_ttl, is_expired, remaining_ms};
use proptest::prelude::*;

proptest! {
    #[test]
    fn effective_ttl_with_jitter_never_leaves_the_base_window(
        base in 1i64..100_000,
        variance in 0.0f64..1.0,
    ) {
        let ttl = effective_ttl(base, true, variance);
        prop_assert!(ttl >= 1);
        prop_assert!(ttl <= base);
    }

    #[test]
    fn effective_ttl_without_jitter_is_the_identity(base in i64::MIN..i64::MAX, variance in 0.0f64..1.0) {
        prop_assert_eq!(effective_ttl(base, false, variance), base);
    }

    #[test]
    fn non_positive_base_always_passes_through_unchanged(base in i64::MIN..=0, random: bool, variance in 0.0f64..1.0) {
        prop_assert_eq!(effective_ttl(base, random, variance), base);
    }

    #[test]
    fn avalanche_ttl_stays_within_the_configured_ratio_band(base in 1i64..100_000) {
        let config = AvalancheConfig::default();
        let ttl = avalanche_ttl(base, &config);
        let floor = ((base as f64) * (1.0 - config.max_jitter_ratio)).floor() as i64;
        prop_assert!(ttl <= base);
        prop_assert!(ttl >= floor.max(config.min_seconds));
    }

    #[test]
    fn remaining_ms_never_goes_negative(created in 0i64..1_000_000_000, ttl_seconds in 1i64..100_000, now in 0i64..2_000_000_000) {
        if let Some(remaining) = remaining_ms(created, ttl_seconds, now) {
            prop_assert!(remaining >= 0);
        }
    }

    #[test]
    fn is_expired_implies_remaining_ms_is_zero(created in 0i64..1_000_000_000, ttl_seconds in 1i64..100_000, now in 0i64..2_000_000_000) {
        // At the exact boundary (elapsed == total) remaining_ms clamps to 0
        // one instant before is_expired flips true, so the converse doesn't
        // hold — only expired implies no time remaining.
        let remaining = remaining_ms(created, ttl_seconds, now).expect("positive ttl always has a remaining window");
        if is_expired(created, ttl_seconds, now) {
            prop_assert_eq!(remaining, 0);
        }
    }
}
