//! Ambient stack shared across the cache engine workspace.
//!
//! Keeps the parts of a typical `common` crate that this workspace actually
//! uses: process-wide tracing setup, a generic exponential-backoff retry
//! helper (used by the distributed lock adapter and available to callers),
//! and a single clock source for envelope timestamps.

pub mod datetime;
pub mod retry;
pub mod telemetry;

pub use datetime::now_ms;
pub use retry::{retry_with_backoff, ExponentialBackoff, RetryConfig};
pub use telemetry::init_tracing;
