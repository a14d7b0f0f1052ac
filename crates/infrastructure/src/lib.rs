//! Redis-backed implementations of the trait boundary defined in `cache-domain`:
//! a `RedisStore` over a real connection, a bloom filter, and a distributed
//! lock adapter.

pub mod bloom;
pub mod lock;
pub mod redis_store;

pub use bloom::{BloomFilter, BloomStats, BloomStatsSnapshot};
pub use lock::{lock_with_backoff, DistributedLockAdapter, LeaseToken, RedisDistributedLock};
pub use redis_store::{RedisBackedStore, RedisStoreConfig};
