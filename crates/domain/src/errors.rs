//! Error taxonomy for the cache protection engine.
//!
//! Mirrors the shape of a typical infrastructure error enum: one
//! `thiserror` type per failure kind, a retryability predicate, and a
//! coarse classification used for metrics and structured logs rather than
//! matching on the full enum at every call site.

use thiserror::Error;

/// Errors produced by the cache engine and its protective components.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The `RedisStore` backend could not be reached or timed out.
    #[error("cache backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A breakdown-protected loader returned `None` and
    /// `cache_null_values` is `false` for the descriptor in effect.
    #[error("loader returned no value under breakdown protection")]
    LoaderReturnedNull,

    /// The caller-supplied loader closure itself failed.
    #[error("loader failed: {0}")]
    LoaderFailed(String),

    /// The distributed lease could not be obtained within the configured wait.
    #[error("distributed lock acquisition timed out after {wait_ms}ms")]
    LockAcquisitionTimeout {
        /// The wait bound that was exceeded.
        wait_ms: u64,
    },

    /// A bloom filter check or update failed against the backing store.
    #[error("bloom filter operation failed: {0}")]
    FilterFailure(String),

    /// The two-list admission cache could not free space because every
    /// eviction candidate was protected.
    #[error("eviction protected: no unprotected candidate to free space for key")]
    EvictionProtected,

    /// Envelope or descriptor (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Engine configuration was invalid or incomplete.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

/// Coarse error classification, independent of the exact variant, used for
/// metrics tagging and log fields without an exhaustive match at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheErrorKind {
    /// Backend connectivity or timeout issue — transient.
    Backend,
    /// A loader (the protected method body) misbehaved.
    Loader,
    /// Lock coordination did not complete in time.
    Lock,
    /// The probabilistic admission filter failed.
    Filter,
    /// The in-memory admission cache could not evict.
    Eviction,
    /// Envelope/descriptor encoding problem.
    Codec,
    /// Engine configuration problem.
    Configuration,
}

impl CacheError {
    /// Classify this error for metrics/logging purposes.
    pub fn kind(&self) -> CacheErrorKind {
        match self {
            Self::BackendUnavailable(_) => CacheErrorKind::Backend,
            Self::LoaderReturnedNull | Self::LoaderFailed(_) => CacheErrorKind::Loader,
            Self::LockAcquisitionTimeout { .. } => CacheErrorKind::Lock,
            Self::FilterFailure(_) => CacheErrorKind::Filter,
            Self::EvictionProtected => CacheErrorKind::Eviction,
            Self::Serialization(_) => CacheErrorKind::Codec,
            Self::Configuration(_) => CacheErrorKind::Configuration,
        }
    }

    /// Whether a caller may reasonably retry the operation that produced
    /// this error without changing anything about the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::LockAcquisitionTimeout { .. }
        )
    }
}

/// Convenience result alias used throughout the engine.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
