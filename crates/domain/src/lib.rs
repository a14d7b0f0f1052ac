//! Core data model and trait boundary for the cache protection engine.
//!
//! This crate defines the records the engine passes between its
//! components (`MethodDescriptor`, `ValueEnvelope`, `RegistryKey`), the
//! engine's own configuration surface, its error taxonomy, and the trait
//! boundary to externally-supplied collaborators: key-expression
//! evaluation (`KeyResolver`), wire serialization (`Codec`), and the Redis
//! client itself (`RedisStore`).
//!
//! Nothing in this crate talks to a network. It has no opinion about how
//! descriptors get registered (annotation scanning, manual registration,
//! whatever) or how a `RedisStore` is implemented.

pub mod config;
pub mod descriptor;
pub mod envelope;
pub mod errors;
pub mod traits;

pub use config::{AvalancheConfig, BloomConfig, CleanupConfig, EngineConfig, PreRefreshConfig};
pub use descriptor::{normalize_key, MethodDescriptor, OperationType, RegistryKey};
pub use envelope::ValueEnvelope;
pub use errors::{CacheError, CacheErrorKind, CacheResult};
pub use traits::{Codec, FixedKey, JsonCodec, KeyResolver, RedisStore};
