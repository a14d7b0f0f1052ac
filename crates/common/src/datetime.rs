//! Time helpers shared by every component that stamps or reads envelope timestamps.

use chrono::Utc;

/// Current time as milliseconds since the Unix epoch.
///
/// Every envelope timestamp and TTL computation in the engine goes through
/// this function so that tests can reason about a single, consistent clock
/// source rather than each component calling `SystemTime::now()` independently.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_monotonically_sane() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }
}
