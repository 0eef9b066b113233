//! Equivalence-class cache of filter verdicts
//!
//! Pods created by the same controller with the same bound volumes get the
//! same filter verdict on a given node, so a verdict computed for one of them
//! can be reused for the rest until the node (or the predicate) is
//! invalidated.
//!
//! Invalidations may race with a scheduling cycle that snapshotted the old
//! state and is about to write a verdict computed from it. Every invalidation
//! therefore ticks a clock and stamps its scope; a cycle captures the clock
//! before snapshotting and its writes are dropped if any stamp covering the
//! entry is newer. Stamps no live cycle can be older than are pruned, so
//! the stamp maps only hold invalidations issued while a cycle was running.

pub mod class;

pub use class::{
    EquivalencePod, EquivalencePodGenerator, PersistentVolumeClaimLister, VolumeAwareEquivalence,
    VolumeClaimStore,
};

use parking_lot::{Mutex, RwLock};
use starbug_core::Pod;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Predicate keys kept per node before the oldest is evicted
pub const MAX_CACHED_PREDICATES: usize = 100;

/// A cached filter verdict
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostPredicate {
    pub fit: bool,
    pub fail_reasons: Vec<String>,
}

/// Equivalence hash -> verdict, for one predicate on one node
pub type PredicateMap = HashMap<u64, HostPredicate>;

/// Verdicts of a single node, bounded by predicate key count
#[derive(Debug, Default)]
struct AlgorithmCache {
    predicates: HashMap<String, PredicateMap>,
    /// Insertion order of predicate keys, oldest first
    order: VecDeque<String>,
}

impl AlgorithmCache {
    fn get(&self, predicate_key: &str, equivalence_hash: u64) -> Option<&HostPredicate> {
        self.predicates.get(predicate_key)?.get(&equivalence_hash)
    }

    fn insert(&mut self, predicate_key: &str, equivalence_hash: u64, item: HostPredicate) {
        if let Some(map) = self.predicates.get_mut(predicate_key) {
            map.insert(equivalence_hash, item);
            return;
        }

        if self.predicates.len() >= MAX_CACHED_PREDICATES {
            if let Some(oldest) = self.order.pop_front() {
                self.predicates.remove(&oldest);
            }
        }

        self.order.push_back(predicate_key.to_string());
        self.predicates.insert(
            predicate_key.to_string(),
            PredicateMap::from([(equivalence_hash, item)]),
        );
    }

    fn remove(&mut self, predicate_key: &str) {
        if self.predicates.remove(predicate_key).is_some() {
            self.order.retain(|key| key != predicate_key);
        }
    }
}

/// Equivalence class of a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EquivalenceClass {
    pub hash: u64,
}

/// Invalidation clock reading taken at the start of a scheduling cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CycleToken(u64);

/// Cache of filter verdicts keyed by node, predicate and equivalence hash
pub struct EquivalenceCache {
    generator: Arc<dyn EquivalencePodGenerator>,
    nodes: RwLock<HashMap<String, Arc<Mutex<AlgorithmCache>>>>,
    clock: AtomicU64,
    /// Tokens of running cycles -> number of cycles holding each
    live_cycles: Mutex<BTreeMap<u64, usize>>,
    node_invalidated_at: RwLock<HashMap<String, u64>>,
    predicate_invalidated_at: RwLock<HashMap<String, u64>>,
    all_invalidated_at: AtomicU64,
}

impl EquivalenceCache {
    pub fn new(generator: Arc<dyn EquivalencePodGenerator>) -> Self {
        Self {
            generator,
            nodes: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            live_cycles: Mutex::new(BTreeMap::new()),
            node_invalidated_at: RwLock::new(HashMap::new()),
            predicate_invalidated_at: RwLock::new(HashMap::new()),
            all_invalidated_at: AtomicU64::new(0),
        }
    }

    /// Equivalence class of a pod, or `None` if the pod cannot use the cache
    pub fn equivalence_class_info(&self, pod: &Pod) -> Option<EquivalenceClass> {
        self.generator
            .equivalence_pod(pod)
            .map(|equivalence| EquivalenceClass {
                hash: equivalence.hash_value(),
            })
    }

    /// Current invalidation clock
    ///
    /// Must be read before the snapshot the cycle's verdicts are computed
    /// from.
    pub fn cycle_token(&self) -> CycleToken {
        CycleToken(self.clock.load(Ordering::SeqCst))
    }

    /// Record a verdict unconditionally
    ///
    /// Verdicts of element-dependent predicates are not cached.
    #[allow(clippy::too_many_arguments)]
    pub fn update_cached_predicate_item(
        &self,
        pod_name: &str,
        node_name: &str,
        predicate_key: &str,
        fit: bool,
        fail_reasons: &[String],
        equivalence_hash: u64,
        predicate_element_independent: bool,
    ) {
        if !predicate_element_independent {
            return;
        }

        let item = HostPredicate {
            fit,
            fail_reasons: fail_reasons.to_vec(),
        };
        self.write(node_name, predicate_key, equivalence_hash, item, None);
        trace!(
            "Cached {} verdict for pod {} on node {}: fit={}",
            predicate_key,
            pod_name,
            node_name,
            fit
        );
    }

    /// Look up a verdict; `None` means there is no valid entry
    pub fn predicate_with_ecache(
        &self,
        pod_name: &str,
        node_name: &str,
        predicate_key: &str,
        equivalence_hash: u64,
        predicate_element_independent: bool,
    ) -> Option<HostPredicate> {
        if !predicate_element_independent {
            return None;
        }

        let entry = self.nodes.read().get(node_name).cloned()?;
        let cache = entry.lock();
        let item = cache.get(predicate_key, equivalence_hash).cloned();
        if item.is_some() {
            trace!(
                "Equivalence cache hit for pod {} on node {} ({})",
                pod_name,
                node_name,
                predicate_key
            );
        }
        item
    }

    /// Drop the given predicates on one node
    pub fn invalidate_cached_predicate_item(&self, node_name: &str, predicate_keys: &HashSet<String>) {
        if predicate_keys.is_empty() {
            return;
        }

        let stamp = self.tick();
        // node granularity: concurrent writes for other predicates on this
        // node are dropped as well
        self.node_invalidated_at
            .write()
            .insert(node_name.to_string(), stamp);
        self.prune_stamps();

        let entry = self.nodes.read().get(node_name).cloned();
        if let Some(entry) = entry {
            let mut cache = entry.lock();
            for key in predicate_keys {
                cache.remove(key);
            }
        }
        debug!(
            "Invalidated cached predicates {:?} on node {}",
            predicate_keys, node_name
        );
    }

    /// Drop the given predicates on every node
    pub fn invalidate_cached_predicate_item_of_all_nodes(&self, predicate_keys: &HashSet<String>) {
        if predicate_keys.is_empty() {
            return;
        }

        let stamp = self.tick();
        {
            let mut stamps = self.predicate_invalidated_at.write();
            for key in predicate_keys {
                stamps.insert(key.clone(), stamp);
            }
        }
        self.prune_stamps();

        let entries: Vec<_> = self.nodes.read().values().cloned().collect();
        for entry in entries {
            let mut cache = entry.lock();
            for key in predicate_keys {
                cache.remove(key);
            }
        }
        debug!("Invalidated cached predicates {:?} on all nodes", predicate_keys);
    }

    /// Drop every verdict of one node
    pub fn invalidate_all_cached_predicate_item_of_node(&self, node_name: &str) {
        let stamp = self.tick();
        self.node_invalidated_at
            .write()
            .insert(node_name.to_string(), stamp);
        self.prune_stamps();
        self.nodes.write().remove(node_name);
        debug!("Invalidated all cached predicates on node {}", node_name);
    }

    /// Drop everything
    pub fn invalidate_all(&self) {
        let stamp = self.tick();
        self.all_invalidated_at.store(stamp, Ordering::SeqCst);
        self.nodes.write().clear();
        debug!("Invalidated the whole equivalence cache");
    }

    /// Number of nodes holding at least one cached verdict
    #[cfg(test)]
    fn cached_node_count(&self) -> usize {
        self.nodes.read().len()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Register a running cycle and return its token
    fn begin_cycle(&self) -> CycleToken {
        let mut live = self.live_cycles.lock();
        let token = self.cycle_token();
        *live.entry(token.0).or_default() += 1;
        token
    }

    fn end_cycle(&self, token: CycleToken) {
        let CycleToken(taken_at) = token;
        let mut live = self.live_cycles.lock();
        if let Some(count) = live.get_mut(&taken_at) {
            *count -= 1;
            if *count == 0 {
                live.remove(&taken_at);
            }
        }
    }

    /// Forget stamps that cannot be newer than any running or future cycle
    fn prune_stamps(&self) {
        // held so no cycle can begin with an older token meanwhile
        let live = self.live_cycles.lock();
        let low_water = live
            .keys()
            .next()
            .copied()
            .unwrap_or_else(|| self.clock.load(Ordering::SeqCst));
        self.node_invalidated_at
            .write()
            .retain(|_, stamp| *stamp > low_water);
        self.predicate_invalidated_at
            .write()
            .retain(|_, stamp| *stamp > low_water);
    }

    fn is_stale(&self, node_name: &str, predicate_key: &str, token: CycleToken) -> bool {
        let CycleToken(taken_at) = token;
        if self.all_invalidated_at.load(Ordering::SeqCst) > taken_at {
            return true;
        }
        if self
            .node_invalidated_at
            .read()
            .get(node_name)
            .is_some_and(|stamp| *stamp > taken_at)
        {
            return true;
        }
        self.predicate_invalidated_at
            .read()
            .get(predicate_key)
            .is_some_and(|stamp| *stamp > taken_at)
    }

    /// Write under the node lock; with a token, skip if invalidated since
    fn write(
        &self,
        node_name: &str,
        predicate_key: &str,
        equivalence_hash: u64,
        item: HostPredicate,
        token: Option<CycleToken>,
    ) -> bool {
        let existing = self.nodes.read().get(node_name).cloned();
        let entry = match existing {
            Some(entry) => entry,
            None => self
                .nodes
                .write()
                .entry(node_name.to_string())
                .or_default()
                .clone(),
        };

        let mut cache = entry.lock();
        if let Some(token) = token {
            if self.is_stale(node_name, predicate_key, token) {
                debug!(
                    "Skipping stale {} verdict for node {}, invalidated during the cycle",
                    predicate_key, node_name
                );
                return false;
            }
        }
        cache.insert(predicate_key, equivalence_hash, item);
        true
    }
}

/// Equivalence cache access bound to one scheduling cycle
///
/// Carries the pod's class and the token captured before the snapshot, so
/// every write of the cycle is guarded against intervening invalidations.
/// The cycle stays registered with the cache until dropped.
pub struct EquivalenceCycle {
    cache: Arc<EquivalenceCache>,
    class: EquivalenceClass,
    token: CycleToken,
}

impl EquivalenceCycle {
    /// Key under which the orchestrator stores the cycle in `CycleState`
    pub const STATE_KEY: &'static str = "EquivalenceCycle";

    /// Start a cycle for `pod`; `None` if the pod has no equivalence class
    pub fn begin(cache: &Arc<EquivalenceCache>, pod: &Pod) -> Option<Self> {
        let class = cache.equivalence_class_info(pod)?;
        Some(Self {
            cache: cache.clone(),
            class,
            token: cache.begin_cycle(),
        })
    }

    pub fn lookup(
        &self,
        pod_name: &str,
        node_name: &str,
        predicate_key: &str,
        predicate_element_independent: bool,
    ) -> Option<HostPredicate> {
        self.cache.predicate_with_ecache(
            pod_name,
            node_name,
            predicate_key,
            self.class.hash,
            predicate_element_independent,
        )
    }

    /// Record a verdict unless the node or predicate was invalidated after
    /// the cycle began; returns whether it was written
    pub fn record(
        &self,
        node_name: &str,
        predicate_key: &str,
        predicate_element_independent: bool,
        fit: bool,
        fail_reasons: &[String],
    ) -> bool {
        if !predicate_element_independent {
            return false;
        }

        let item = HostPredicate {
            fit,
            fail_reasons: fail_reasons.to_vec(),
        };
        self.cache.write(
            node_name,
            predicate_key,
            self.class.hash,
            item,
            Some(self.token),
        )
    }
}

impl Drop for EquivalenceCycle {
    fn drop(&mut self) {
        self.cache.end_cycle(self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::owned_pod_with_claims;

    fn cache() -> Arc<EquivalenceCache> {
        let generator = |pod: &Pod| starbug_core::controller_uid(pod).map(EquivalencePod::new);
        Arc::new(EquivalenceCache::new(Arc::new(generator)))
    }

    fn keys(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_update_and_lookup() {
        let ecache = cache();
        assert!(ecache
            .predicate_with_ecache("p", "node1", "PodFitsPorts", 123, true)
            .is_none());

        ecache.update_cached_predicate_item("p", "node1", "PodFitsPorts", true, &[], 123, true);
        let hit = ecache
            .predicate_with_ecache("p", "node1", "PodFitsPorts", 123, true)
            .unwrap();
        assert!(hit.fit);
        assert!(hit.fail_reasons.is_empty());

        // same node and predicate, different class
        assert!(ecache
            .predicate_with_ecache("p", "node1", "PodFitsPorts", 456, true)
            .is_none());
    }

    #[test]
    fn test_update_overwrites_verdict() {
        let ecache = cache();
        ecache.update_cached_predicate_item("p", "node1", "GeneralPredicates", true, &[], 123, true);
        let reasons = vec!["Insufficient cpu".to_string()];
        ecache.update_cached_predicate_item(
            "p",
            "node1",
            "GeneralPredicates",
            false,
            &reasons,
            123,
            true,
        );

        let hit = ecache
            .predicate_with_ecache("p", "node1", "GeneralPredicates", 123, true)
            .unwrap();
        assert!(!hit.fit);
        assert_eq!(hit.fail_reasons, reasons);
    }

    #[test]
    fn test_element_dependent_predicates_are_never_cached() {
        let ecache = cache();
        ecache.update_cached_predicate_item("p", "node1", "InterPodAffinity", true, &[], 123, false);
        assert_eq!(ecache.cached_node_count(), 0);
        assert!(ecache
            .predicate_with_ecache("p", "node1", "InterPodAffinity", 123, false)
            .is_none());
    }

    #[test]
    fn test_invalidate_predicate_on_all_nodes() {
        let ecache = cache();
        for node in ["node1", "node2"] {
            ecache.update_cached_predicate_item("p", node, "VolumeZone", true, &[], 1, true);
            ecache.update_cached_predicate_item("p", node, "PodFitsPorts", true, &[], 1, true);
        }

        ecache.invalidate_cached_predicate_item_of_all_nodes(&keys(&["VolumeZone"]));

        for node in ["node1", "node2"] {
            assert!(ecache
                .predicate_with_ecache("p", node, "VolumeZone", 1, true)
                .is_none());
            assert!(ecache
                .predicate_with_ecache("p", node, "PodFitsPorts", 1, true)
                .is_some());
        }
    }

    #[test]
    fn test_invalidate_all_predicates_of_node() {
        let ecache = cache();
        for node in ["node1", "node2"] {
            ecache.update_cached_predicate_item("p", node, "VolumeZone", true, &[], 1, true);
            ecache.update_cached_predicate_item("p", node, "PodFitsPorts", true, &[], 1, true);
        }

        ecache.invalidate_all_cached_predicate_item_of_node("node1");

        assert!(ecache
            .predicate_with_ecache("p", "node1", "VolumeZone", 1, true)
            .is_none());
        assert!(ecache
            .predicate_with_ecache("p", "node1", "PodFitsPorts", 1, true)
            .is_none());
        assert!(ecache
            .predicate_with_ecache("p", "node2", "VolumeZone", 1, true)
            .is_some());
        assert_eq!(ecache.cached_node_count(), 1);
    }

    #[test]
    fn test_invalidate_predicate_on_one_node() {
        let ecache = cache();
        for node in ["node1", "node2"] {
            ecache.update_cached_predicate_item("p", node, "VolumeZone", true, &[], 1, true);
            ecache.update_cached_predicate_item("p", node, "PodFitsPorts", true, &[], 1, true);
        }

        ecache.invalidate_cached_predicate_item("node1", &keys(&["VolumeZone"]));

        assert!(ecache
            .predicate_with_ecache("p", "node1", "VolumeZone", 1, true)
            .is_none());
        assert!(ecache
            .predicate_with_ecache("p", "node1", "PodFitsPorts", 1, true)
            .is_some());
        assert!(ecache
            .predicate_with_ecache("p", "node2", "VolumeZone", 1, true)
            .is_some());
    }

    #[test]
    fn test_invalidate_all() {
        let ecache = cache();
        ecache.update_cached_predicate_item("p", "node1", "VolumeZone", true, &[], 1, true);
        ecache.update_cached_predicate_item("p", "node2", "VolumeZone", true, &[], 1, true);
        ecache.invalidate_all();
        assert_eq!(ecache.cached_node_count(), 0);
    }

    #[test]
    fn test_oldest_predicate_is_evicted() {
        let ecache = cache();
        for i in 0..=MAX_CACHED_PREDICATES {
            ecache.update_cached_predicate_item("p", "node1", &format!("pred-{}", i), true, &[], 1, true);
        }

        assert!(ecache
            .predicate_with_ecache("p", "node1", "pred-0", 1, true)
            .is_none());
        assert!(ecache
            .predicate_with_ecache("p", "node1", "pred-1", 1, true)
            .is_some());
        let newest = format!("pred-{}", MAX_CACHED_PREDICATES);
        assert!(ecache
            .predicate_with_ecache("p", "node1", &newest, 1, true)
            .is_some());
    }

    #[test]
    fn test_class_requires_controller() {
        let ecache = cache();
        let owned = owned_pod_with_claims("a", "rc-1", &[]);
        let other = owned_pod_with_claims("b", "rc-1", &[]);
        let mut orphan = owned_pod_with_claims("c", "rc-1", &[]);
        orphan.metadata.owner_references = None;

        assert_eq!(
            ecache.equivalence_class_info(&owned),
            ecache.equivalence_class_info(&other)
        );
        assert!(ecache.equivalence_class_info(&orphan).is_none());
        assert!(EquivalenceCycle::begin(&ecache, &orphan).is_none());
    }

    #[test]
    fn test_cycle_write_after_node_invalidation_is_dropped() {
        let ecache = cache();
        let pod = owned_pod_with_claims("a", "rc-1", &[]);
        let cycle = EquivalenceCycle::begin(&ecache, &pod).unwrap();

        // state changed after the cycle snapshotted
        ecache.invalidate_all_cached_predicate_item_of_node("node1");

        assert!(!cycle.record("node1", "PodFitsResources", true, true, &[]));
        assert!(cycle.lookup("a", "node1", "PodFitsResources", true).is_none());

        // other nodes are unaffected
        assert!(cycle.record("node2", "PodFitsResources", true, true, &[]));
        assert!(cycle.lookup("a", "node2", "PodFitsResources", true).is_some());
    }

    #[test]
    fn test_cycle_write_after_predicate_or_global_invalidation_is_dropped() {
        let ecache = cache();
        let pod = owned_pod_with_claims("a", "rc-1", &[]);

        let cycle = EquivalenceCycle::begin(&ecache, &pod).unwrap();
        ecache.invalidate_cached_predicate_item_of_all_nodes(&keys(&["VolumeZone"]));
        assert!(!cycle.record("node1", "VolumeZone", true, true, &[]));
        assert!(cycle.record("node1", "PodFitsPorts", true, true, &[]));

        let cycle = EquivalenceCycle::begin(&ecache, &pod).unwrap();
        ecache.invalidate_all();
        assert!(!cycle.record("node1", "PodFitsPorts", true, true, &[]));

        // a cycle started after the invalidation writes normally
        let cycle = EquivalenceCycle::begin(&ecache, &pod).unwrap();
        assert!(cycle.record("node1", "VolumeZone", true, true, &[]));
    }

    #[test]
    fn test_stamps_are_pruned_once_no_cycle_needs_them() {
        let ecache = cache();
        let pod = owned_pod_with_claims("a", "rc-1", &[]);

        // nothing running: the stamp can never mark a write stale
        ecache.invalidate_all_cached_predicate_item_of_node("deleted-node");
        assert!(ecache.node_invalidated_at.read().is_empty());

        let cycle = EquivalenceCycle::begin(&ecache, &pod).unwrap();
        ecache.invalidate_all_cached_predicate_item_of_node("node1");
        ecache.invalidate_cached_predicate_item_of_all_nodes(&keys(&["VolumeZone"]));
        assert!(ecache.node_invalidated_at.read().contains_key("node1"));
        assert!(ecache.predicate_invalidated_at.read().contains_key("VolumeZone"));
        assert!(!cycle.record("node1", "PodFitsPorts", true, true, &[]));

        drop(cycle);
        assert!(ecache.live_cycles.lock().is_empty());
        ecache.invalidate_all_cached_predicate_item_of_node("node2");
        assert!(ecache.node_invalidated_at.read().is_empty());
        assert!(ecache.predicate_invalidated_at.read().is_empty());
    }
}
