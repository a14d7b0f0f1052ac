//! Metadata Registry: indexes `MethodDescriptor`s by
//! `(cache-name, key, operation)`, backed by the Two-List Admission Cache so
//! rarely-used descriptors age out under memory pressure.

use crate::admission::{AdmissionCache, AdmissionStats};
use cache_domain::{MethodDescriptor, OperationType, RegistryKey};

/// Descriptor index used by the front door to look up how a given
/// `(cache-name, key)` pair should be handled.
pub struct MetadataRegistry {
    cache: AdmissionCache<RegistryKey, MethodDescriptor>,
}

impl MetadataRegistry {
    /// Build a registry bounded by `active_cap`/`inactive_cap`, per the
    /// engine configuration's admission cache sizing.
    pub fn new(active_cap: usize, inactive_cap: usize) -> Self {
        Self {
            cache: AdmissionCache::new(active_cap, inactive_cap),
        }
    }

    /// Register (or overwrite) the descriptor for `(cache_name, key)` under
    /// `operation`. Idempotent: re-registering the same identity replaces it.
    pub fn register(&self, cache_name: &str, key: &str, operation: OperationType, descriptor: MethodDescriptor) {
        let registry_key = RegistryKey::new(cache_name, key, operation);
        self.cache.put(registry_key, descriptor);
    }

    /// Look up the descriptor registered for `(cache_name, key)` under
    /// `operation`, if any.
    pub fn get(&self, cache_name: &str, key: &str, operation: OperationType) -> Option<MethodDescriptor> {
        let registry_key = RegistryKey::new(cache_name, key, operation);
        self.cache.get(&registry_key)
    }

    /// Remove the descriptor registered for `(cache_name, key)` under
    /// `operation`, returning it if present. Used during EVICT cleanup.
    pub fn remove(&self, cache_name: &str, key: &str, operation: OperationType) -> Option<MethodDescriptor> {
        let registry_key = RegistryKey::new(cache_name, key, operation);
        self.cache.remove(&registry_key)
    }

    /// Remove every descriptor registered under `cache_name`, across both
    /// the CACHE and EVICT operation indexes, returning the number removed.
    /// Used during CLEAR so descriptors for a cleared cache don't linger in
    /// the registry until they age out under admission pressure.
    pub fn remove_all(&self, cache_name: &str) -> usize {
        self.cache.remove_matching(|k| k.cache_name == cache_name)
    }

    /// Number of registered descriptors across both operation types.
    pub fn size(&self) -> usize {
        self.cache.size()
    }

    /// Two-list admission counters for the backing descriptor cache
    /// (hits/misses/evictions/demotions/protected_skips).
    pub fn stats(&self) -> AdmissionStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_get_round_trips() {
        let registry = MetadataRegistry::new(16, 16);
        let descriptor = MethodDescriptor::default_for("users");
        registry.register("users", "1", OperationType::Cache, descriptor.clone());
        assert_eq!(registry.get("users", "1", OperationType::Cache), Some(descriptor));
    }

    #[test]
    fn cache_and_evict_operations_are_indexed_separately() {
        let registry = MetadataRegistry::new(16, 16);
        let cache_descriptor = MethodDescriptor::default_for("users");
        let mut evict_descriptor = MethodDescriptor::default_for("users");
        evict_descriptor.all_entries = true;

        registry.register("users", "1", OperationType::Cache, cache_descriptor.clone());
        registry.register("users", "1", OperationType::Evict, evict_descriptor.clone());

        assert_eq!(registry.get("users", "1", OperationType::Cache), Some(cache_descriptor));
        assert_eq!(registry.get("users", "1", OperationType::Evict), Some(evict_descriptor));
    }

    #[test]
    fn re_registering_overwrites() {
        let registry = MetadataRegistry::new(16, 16);
        let mut descriptor = MethodDescriptor::default_for("users");
        registry.register("users", "1", OperationType::Cache, descriptor.clone());
        descriptor.ttl_seconds = 120;
        registry.register("users", "1", OperationType::Cache, descriptor.clone());
        assert_eq!(
            registry.get("users", "1", OperationType::Cache).unwrap().ttl_seconds,
            120
        );
        assert_eq!(registry.size(), 1);
    }

    #[test]
    fn remove_drops_the_entry() {
        let registry = MetadataRegistry::new(16, 16);
        registry.register("users", "1", OperationType::Cache, MethodDescriptor::default_for("users"));
        assert!(registry.remove("users", "1", OperationType::Cache).is_some());
        assert_eq!(registry.get("users", "1", OperationType::Cache), None);
    }

    #[test]
    fn remove_all_drops_every_descriptor_for_a_cache_name_regardless_of_operation() {
        let registry = MetadataRegistry::new(16, 16);
        registry.register("users", "1", OperationType::Cache, MethodDescriptor::default_for("users"));
        registry.register("users", "2", OperationType::Cache, MethodDescriptor::default_for("users"));
        registry.register("users", "1", OperationType::Evict, MethodDescriptor::default_for("users"));
        registry.register("orders", "1", OperationType::Cache, MethodDescriptor::default_for("orders"));

        let removed = registry.remove_all("users");

        assert_eq!(removed, 3);
        assert_eq!(registry.get("users", "1", OperationType::Cache), None);
        assert_eq!(registry.get("users", "2", OperationType::Cache), None);
        assert_eq!(registry.get("users", "1", OperationType::Evict), None);
        assert!(registry.get("orders", "1", OperationType::Cache).is_some());
    }
}
