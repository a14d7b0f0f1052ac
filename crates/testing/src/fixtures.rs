//! Builders for the descriptor/envelope fixtures used across engine tests.
//! Kept deliberately minimal: each builder starts from the domain crate's
//! own defaults and only overrides the fields a given scenario cares about.

use cache_domain::{MethodDescriptor, ValueEnvelope};

/// A descriptor builder for tests, chaining overrides onto
/// [`MethodDescriptor::default_for`].
pub struct DescriptorBuilder {
    descriptor: MethodDescriptor,
}

impl DescriptorBuilder {
    /// Start from the bare default for `cache_name`.
    pub fn new(cache_name: impl Into<String>) -> Self {
        Self {
            descriptor: MethodDescriptor::default_for(cache_name),
        }
    }

    /// Set the base TTL in seconds.
    pub fn ttl_seconds(mut self, ttl: i64) -> Self {
        self.descriptor.ttl_seconds = ttl;
        self
    }

    /// Enable TTL jitter with the given variance.
    pub fn with_jitter(mut self, variance: f64) -> Self {
        self.descriptor.random_ttl = true;
        self.descriptor.variance = variance;
        self
    }

    /// Enable the bloom filter penetration guard.
    pub fn with_bloom_filter(mut self) -> Self {
        self.descriptor.use_bloom_filter = true;
        self
    }

    /// Enable breakdown protection via the local mutex, the distributed
    /// lease, or both.
    pub fn with_locks(mut self, internal: bool, distributed: bool) -> Self {
        self.descriptor.internal_lock = internal;
        self.descriptor.distributed_lock = distributed;
        self
    }

    /// Force breakdown protection regardless of lock flags.
    pub fn sync(mut self) -> Self {
        self.descriptor.sync = true;
        self
    }

    /// Cache loader-returned nulls rather than skipping the write.
    pub fn cache_null_values(mut self) -> Self {
        self.descriptor.cache_null_values = true;
        self
    }

    /// Enable pre-refresh scheduling at the given threshold.
    pub fn with_pre_refresh(mut self, threshold: f64) -> Self {
        self.descriptor.enable_pre_refresh = true;
        self.descriptor.pre_refresh_threshold = threshold;
        self
    }

    /// Finish building.
    pub fn build(self) -> MethodDescriptor {
        self.descriptor
    }
}

/// Build an envelope wrapping `payload`, created `now_ms` with `ttl_seconds`.
pub fn envelope_with(payload: &[u8], type_tag: &str, ttl_seconds: i64, now_ms: i64) -> ValueEnvelope {
    ValueEnvelope::new(Some(payload.to_vec()), type_tag, ttl_seconds, now_ms)
}

/// Build a null-sentinel envelope.
pub fn null_envelope(type_tag: &str, ttl_seconds: i64, now_ms: i64) -> ValueEnvelope {
    ValueEnvelope::new(None, type_tag, ttl_seconds, now_ms)
}
