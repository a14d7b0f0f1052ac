//! Two-List Admission Cache: a bounded in-memory associative
//! container modeled on the Linux page-cache active/inactive list design.
//! Holds metadata (descriptors, lock handles), never user cache values.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;

/// Aggregate counters exposed by [`AdmissionCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionStats {
    /// Number of `get` calls that found the key.
    pub hits: u64,
    /// Number of `get` calls that did not find the key.
    pub misses: u64,
    /// Number of nodes removed from Inactive to free space.
    pub evictions: u64,
    /// Number of nodes moved from Active to Inactive.
    pub demotions: u64,
    /// Number of eviction attempts that skipped a protected node.
    pub protected_skips: u64,
}

enum List {
    Active,
    Inactive,
}

struct Node<K, V> {
    value: V,
    list: List,
    // Position is tracked by a VecDeque-like ordering instead of real
    // intrusive pointers: each list stores keys in recency order and this
    // node only carries the payload, keeping the structure safe Rust.
    _key_marker: std::marker::PhantomData<K>,
}

struct Inner<K, V> {
    active: std::collections::VecDeque<K>,
    inactive: std::collections::VecDeque<K>,
    nodes: HashMap<K, Node<K, V>>,
    stats: AdmissionStats,
}

/// Bounded two-list cache. `K` must be `Eq + Hash + Clone` since keys are
/// stored both in the lookup map and in the ordering deques.
pub struct AdmissionCache<K, V> {
    active_cap: usize,
    inactive_cap: usize,
    eviction_predicate: Option<Box<dyn Fn(&V) -> bool + Send + Sync>>,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> AdmissionCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Build a cache bounded by `active_cap` and `inactive_cap`, with no
    /// eviction protection.
    pub fn new(active_cap: usize, inactive_cap: usize) -> Self {
        Self {
            active_cap,
            inactive_cap,
            eviction_predicate: None,
            inner: Mutex::new(Inner {
                active: Default::default(),
                inactive: Default::default(),
                nodes: HashMap::new(),
                stats: AdmissionStats::default(),
            }),
        }
    }

    /// Build a cache with an eviction-protection predicate: entries for
    /// which the predicate returns `true` are skipped during eviction.
    /// Provided at construction, never swapped mid-operation.
    pub fn with_eviction_predicate(
        active_cap: usize,
        inactive_cap: usize,
        predicate: impl Fn(&V) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            active_cap,
            inactive_cap,
            eviction_predicate: Some(Box::new(predicate)),
            inner: Mutex::new(Inner {
                active: Default::default(),
                inactive: Default::default(),
                nodes: HashMap::new(),
                stats: AdmissionStats::default(),
            }),
        }
    }

    fn protected(&self, value: &V) -> bool {
        self.eviction_predicate.as_ref().is_some_and(|p| p(value))
    }

    /// Insert or update `k`. Returns `false` if space could not be freed for
    /// a brand-new key because every eviction candidate was protected.
    pub fn put(&self, k: K, v: V) -> bool {
        let mut inner = self.inner.lock();
        if inner.nodes.contains_key(&k) {
            inner.nodes.get_mut(&k).unwrap().value = v;
            self.promote_to_active_head(&mut inner, &k);
            return true;
        }

        if inner.active.len() >= self.active_cap && !self.demote_or_evict_oldest_active(&mut inner) {
            return false;
        }

        inner.active.push_front(k.clone());
        inner.nodes.insert(
            k,
            Node {
                value: v,
                list: List::Active,
                _key_marker: std::marker::PhantomData,
            },
        );
        true
    }

    /// Look up `k`, promoting it to the Active head (demoting/evicting as
    /// needed to make room) if it currently lives in Inactive.
    pub fn get(&self, k: &K) -> Option<V>
    where
        V: Clone,
    {
        let mut inner = self.inner.lock();
        if !inner.nodes.contains_key(k) {
            inner.stats.misses += 1;
            return None;
        }
        inner.stats.hits += 1;
        self.promote_to_active_head(&mut inner, k);
        inner.nodes.get(k).map(|n| n.value.clone())
    }

    /// Remove `k` unconditionally, returning its value if present.
    pub fn remove(&self, k: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let node = inner.nodes.remove(k)?;
        match node.list {
            List::Active => inner.active.retain(|x| x != k),
            List::Inactive => inner.inactive.retain(|x| x != k),
        }
        Some(node.value)
    }

    /// Remove every entry whose key satisfies `predicate`, from whichever
    /// list it currently lives in, returning the number removed. Used by
    /// callers that invalidate by something coarser than a single key (e.g.
    /// every descriptor under a cache-name) rather than one `remove(k)` at
    /// a time.
    pub fn remove_matching(&self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        let mut inner = self.inner.lock();
        let matching: Vec<K> = inner.nodes.keys().filter(|k| predicate(k)).cloned().collect();
        for k in &matching {
            if let Some(node) = inner.nodes.remove(k) {
                match node.list {
                    List::Active => inner.active.retain(|x| x != k),
                    List::Inactive => inner.inactive.retain(|x| x != k),
                }
            }
        }
        matching.len()
    }

    /// Whether `k` is currently present.
    pub fn contains(&self, k: &K) -> bool {
        self.inner.lock().nodes.contains_key(k)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.active.clear();
        inner.inactive.clear();
        inner.nodes.clear();
    }

    /// Total number of entries across both lists.
    pub fn size(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    /// A snapshot of the running counters.
    pub fn stats(&self) -> AdmissionStats {
        self.inner.lock().stats
    }

    /// Promote `k` to the Active head. If it is already there this is a
    /// plain splice-to-head; if it was Inactive, this may cascade a
    /// demotion (and possibly an eviction) to make room in Active.
    fn promote_to_active_head(&self, inner: &mut Inner<K, V>, k: &K) {
        let was_active = matches!(inner.nodes.get(k).map(|n| &n.list), Some(List::Active));
        if was_active {
            inner.active.retain(|x| x != k);
            inner.active.push_front(k.clone());
            return;
        }

        inner.inactive.retain(|x| x != k);
        if inner.active.len() >= self.active_cap {
            self.demote_or_evict_oldest_active(inner);
        }
        inner.active.push_front(k.clone());
        if let Some(node) = inner.nodes.get_mut(k) {
            node.list = List::Active;
        }
    }

    /// Walk Active tail→head skipping protected nodes; demote the first
    /// unprotected one found (to Inactive head, evicting from Inactive's
    /// tail first if Inactive is full). Returns whether room was freed.
    fn demote_or_evict_oldest_active(&self, inner: &mut Inner<K, V>) -> bool {
        let candidate = inner
            .active
            .iter()
            .rev()
            .find(|k| !self.protected(&inner.nodes.get(*k).unwrap().value))
            .cloned();

        let Some(candidate) = candidate else {
            inner.stats.protected_skips += 1;
            return false;
        };

        inner.active.retain(|x| x != &candidate);

        if inner.inactive.len() >= self.inactive_cap && !self.evict_oldest_inactive(inner) {
            // Could not make room in Inactive either; the node that left
            // Active is simply discarded rather than demoted.
            inner.nodes.remove(&candidate);
            return true;
        }

        inner.inactive.push_front(candidate.clone());
        if let Some(node) = inner.nodes.get_mut(&candidate) {
            node.list = List::Inactive;
        }
        inner.stats.demotions += 1;
        true
    }

    /// Walk Inactive tail→head skipping protected nodes; remove the first
    /// unprotected one from both the list and the map.
    fn evict_oldest_inactive(&self, inner: &mut Inner<K, V>) -> bool {
        let candidate = inner
            .inactive
            .iter()
            .rev()
            .find(|k| !self.protected(&inner.nodes.get(*k).unwrap().value))
            .cloned();

        let Some(candidate) = candidate else {
            inner.stats.protected_skips += 1;
            return false;
        };

        inner.inactive.retain(|x| x != &candidate);
        inner.nodes.remove(&candidate);
        inner.stats.evictions += 1;
        true
    }
}
