//! Exponential backoff, reused by the distributed lock adapter while it
//! polls for a lease and by anything else in the workspace that needs to
//! retry a fallible async operation.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Backoff schedule: an initial delay, a multiplier, and a ceiling.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try (0 = no retries).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling applied to the computed delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Build an exponential backoff schedule bounded by `max_attempts`.
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// A schedule with zero retries, used when the caller wants a single
    /// bounded attempt rather than a retry loop (e.g. lock acquisition
    /// bounded by an explicit `wait` budget already).
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }
}

/// Stateful cursor over a [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: RetryConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Start a fresh cursor at attempt zero.
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay to wait before the current attempt (zero on the first attempt).
    pub fn delay(&self) -> Duration {
        if self.attempt == 0 {
            return Duration::ZERO;
        }
        let millis = self.config.initial_delay.as_millis() as f64
            * self.config.backoff_multiplier.powi((self.attempt - 1) as i32);
        Duration::from_millis(millis as u64).min(self.config.max_delay)
    }

    /// Advance to the next attempt.
    pub fn next_attempt(&mut self) {
        self.attempt += 1;
    }

    /// Whether another attempt is within budget.
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempt <= self.config.max_attempts
    }
}

/// Retry an async operation with exponential backoff until it succeeds or
/// the retry budget is exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(config: RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = ExponentialBackoff::new(config);
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                backoff.next_attempt();
                if !backoff.has_attempts_remaining() {
                    return Err(err);
                }
                sleep(backoff.delay()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn backoff_grows_and_caps() {
        let config = RetryConfig {
            max_delay: Duration::from_millis(200),
            ..RetryConfig::exponential(10)
        };
        let mut backoff = ExponentialBackoff::new(config);
        for _ in 0..8 {
            backoff.next_attempt();
        }
        assert!(backoff.delay() <= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result = retry_with_backoff(RetryConfig::exponential(3), || {
            let calls = calls_clone.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("not yet")
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result: Result<(), &str> = retry_with_backoff(RetryConfig::exponential(2), || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("nope")
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
