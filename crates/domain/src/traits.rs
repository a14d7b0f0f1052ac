//! The trait boundary between the engine and its external collaborators:
//! wire serialization (`Codec`), key-expression evaluation (`KeyResolver`),
//! and the Redis client itself (`RedisStore`).

use crate::errors::CacheResult;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Minimal primitive surface the engine needs from a Redis client.
/// Everything above this (connection pooling, TLS, cluster topology) is the
/// concern of the implementor, not of this crate.
#[async_trait]
pub trait RedisStore: Send + Sync {
    /// `GET key`.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// `SET key value` with no expiry.
    async fn set(&self, key: &str, value: &[u8]) -> CacheResult<()>;

    /// `SET key value EX ttl_seconds`.
    async fn set_ex(&self, key: &str, value: &[u8], ttl_seconds: u64) -> CacheResult<()>;

    /// `DEL key`; returns whether a key was actually removed.
    async fn del(&self, key: &str) -> CacheResult<bool>;

    /// `DEL key [key ...]`; returns the number of keys removed.
    async fn del_many(&self, keys: &[String]) -> CacheResult<u64>;

    /// `EXPIRE key ttl_seconds`.
    async fn expire(&self, key: &str, ttl_seconds: u64) -> CacheResult<bool>;

    /// `PEXPIRE key ttl_ms`.
    async fn pexpire(&self, key: &str, ttl_ms: u64) -> CacheResult<bool>;

    /// `TTL key`, translated to milliseconds; `None` means no expiry or absent.
    async fn ttl_ms(&self, key: &str) -> CacheResult<Option<i64>>;

    /// `EXISTS key`.
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// `HGET key field`.
    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>>;

    /// `HSET key field value`.
    async fn hset(&self, key: &str, field: &str, value: &str) -> CacheResult<()>;

    /// Keys matching `prefix*`, used by CLEAR. Implementations should favor
    /// `SCAN` over `KEYS` in production, but the engine only needs the result set.
    async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>>;

    /// `SET key value NX PX ttl_ms`; returns whether the lock was acquired.
    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> CacheResult<bool>;

    /// Atomically delete `key` iff its current value equals `expected_value`
    /// (the compare-and-delete primitive safe unlock relies on).
    async fn compare_and_del(&self, key: &str, expected_value: &str) -> CacheResult<bool>;
}

/// Resolves the effective cache key for a single invocation. The annotation
/// layer (or any direct caller) builds one of these per call, typically a
/// closure that has already captured the method arguments — the engine
/// itself never evaluates key or condition expressions.
pub trait KeyResolver: Send + Sync {
    /// Resolve the key for this invocation, or `None` if the descriptor's
    /// `condition` expression (evaluated upstream) excluded this call.
    fn resolve(&self) -> Option<String>;
}

impl<F> KeyResolver for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn resolve(&self) -> Option<String> {
        self()
    }
}

/// A pre-resolved key, for the common case where the caller already knows
/// the key and does not need expression evaluation at all.
pub struct FixedKey(pub String);

impl KeyResolver for FixedKey {
    fn resolve(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Encodes/decodes a single value type to/from the opaque byte buffers
/// stored in a [`crate::envelope::ValueEnvelope`].
pub trait Codec<T>: Send + Sync {
    /// Serialize `value` to bytes.
    fn encode(&self, value: &T) -> CacheResult<Vec<u8>>;

    /// Deserialize `bytes` back into `T`.
    fn decode(&self, bytes: &[u8]) -> CacheResult<T>;

    /// The type tag recorded on the envelope for this codec's value type.
    fn type_tag(&self) -> &'static str;
}

/// A `serde_json`-backed codec, the default wire format ("JSON with
/// polymorphic type tagging").
pub struct JsonCodec<T> {
    type_tag: &'static str,
    _marker: std::marker::PhantomData<T>,
}

impl<T> JsonCodec<T> {
    /// Build a codec that records `type_tag` on every envelope it writes.
    pub fn new(type_tag: &'static str) -> Self {
        Self {
            type_tag,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> Codec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn encode(&self, value: &T) -> CacheResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> CacheResult<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn type_tag(&self) -> &'static str {
        self.type_tag
    }
}
