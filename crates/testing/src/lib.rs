//! Test doubles and fixtures shared by the infrastructure and engine crates'
//! own test suites. Not part of the production dependency graph.

pub mod fixtures;
pub mod in_memory_store;

pub use fixtures::{envelope_with, null_envelope, DescriptorBuilder};
pub use in_memory_store::{FailingRedisStore, InMemoryRedisStore};
