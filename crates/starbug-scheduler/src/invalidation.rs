//! Routing of cluster events into the cache and the equivalence cache
//!
//! Every event is applied to the cluster cache before any cached verdict is
//! invalidated, so a scheduling cycle that snapshots after the invalidation
//! also sees the change.

use crate::cache::InMemoryCache;
use crate::config::InvalidationConfig;
use crate::equivalence::{EquivalenceCache, VolumeClaimStore};
use crate::error::Result;
use starbug_core::{ClusterEvent, ClusterObject, Pod, WatchEventType};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

pub struct ClusterEventHandler {
    cache: Arc<InMemoryCache>,
    claims: Arc<VolumeClaimStore>,
    equivalence_cache: Option<Arc<EquivalenceCache>>,
    volume_predicates: HashSet<String>,
    affinity_predicates: HashSet<String>,
}

impl ClusterEventHandler {
    pub fn new(
        cache: Arc<InMemoryCache>,
        claims: Arc<VolumeClaimStore>,
        equivalence_cache: Option<Arc<EquivalenceCache>>,
        invalidation: &InvalidationConfig,
    ) -> Self {
        Self {
            cache,
            claims,
            equivalence_cache,
            volume_predicates: invalidation.volume_predicates.iter().cloned().collect(),
            affinity_predicates: invalidation.affinity_predicates.iter().cloned().collect(),
        }
    }

    /// Apply one event
    pub fn handle(&self, event: ClusterEvent) -> Result<()> {
        trace!(
            "Handling {:?} event for {}",
            event.event_type,
            event.object.kind()
        );

        match event.object {
            ClusterObject::Node(node) => {
                let name = starbug_core::node_name(&node).to_string();
                match event.event_type {
                    WatchEventType::Added => self.cache.add_node(*node)?,
                    WatchEventType::Modified => {
                        self.cache.update_node(*node)?;
                        self.invalidate_node(&name);
                    }
                    WatchEventType::Deleted => {
                        self.cache.remove_node(&name)?;
                        self.invalidate_node(&name);
                    }
                }
            }
            ClusterObject::Pod(pod) => self.handle_pod(event.event_type, *pod)?,
            ClusterObject::PersistentVolume(_) => {
                self.invalidate_everywhere(&self.volume_predicates);
            }
            ClusterObject::PersistentVolumeClaim(claim) => {
                match event.event_type {
                    WatchEventType::Added | WatchEventType::Modified => self.claims.upsert(*claim),
                    WatchEventType::Deleted => self.claims.remove(&claim),
                }
                self.invalidate_everywhere(&self.volume_predicates);
            }
        }
        Ok(())
    }

    fn handle_pod(&self, event_type: WatchEventType, pod: Pod) -> Result<()> {
        let previous_node = self.cache.pod_node(&pod);
        let assigned = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.node_name.clone())
            .filter(|name| !name.is_empty());

        match event_type {
            WatchEventType::Added | WatchEventType::Modified => {
                let Some(node_name) = assigned else {
                    debug!(
                        "Ignoring unassigned pod {}",
                        starbug_core::pod_full_name(&pod)
                    );
                    return Ok(());
                };

                if previous_node.is_some() {
                    self.cache.update_pod(pod)?;
                } else {
                    self.cache.add_pod(pod)?;
                }

                if let Some(previous) = previous_node.filter(|p| *p != node_name) {
                    self.invalidate_node(&previous);
                }
                self.invalidate_node(&node_name);
            }
            WatchEventType::Deleted => {
                if previous_node.is_none() {
                    debug!(
                        "Ignoring deletion of uncached pod {}",
                        starbug_core::pod_full_name(&pod)
                    );
                    return Ok(());
                }

                let node_name = self.cache.remove_pod(&pod)?;
                self.invalidate_node(&node_name);
                // a departed pod can unblock anti-affinity on any node
                self.invalidate_everywhere(&self.affinity_predicates);
            }
        }
        Ok(())
    }

    fn invalidate_node(&self, node_name: &str) {
        if let Some(ecache) = &self.equivalence_cache {
            ecache.invalidate_all_cached_predicate_item_of_node(node_name);
        }
    }

    fn invalidate_everywhere(&self, predicates: &HashSet<String>) {
        if predicates.is_empty() {
            return;
        }
        if let Some(ecache) = &self.equivalence_cache {
            ecache.invalidate_cached_predicate_item_of_all_nodes(predicates);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, Snapshot};
    use crate::equivalence::EquivalencePod;
    use crate::testing::{assign, make_claim, make_node, make_pod};

    const HASH: u64 = 7;

    fn handler(invalidation: InvalidationConfig) -> (ClusterEventHandler, Arc<EquivalenceCache>) {
        let generator = |pod: &Pod| starbug_core::controller_uid(pod).map(EquivalencePod::new);
        let ecache = Arc::new(EquivalenceCache::new(Arc::new(generator)));
        let handler = ClusterEventHandler::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(VolumeClaimStore::new()),
            Some(ecache.clone()),
            &invalidation,
        );
        (handler, ecache)
    }

    fn cache_verdict(ecache: &EquivalenceCache, node: &str, predicate: &str) {
        ecache.update_cached_predicate_item("p", node, predicate, true, &[], HASH, true);
    }

    fn cached(ecache: &EquivalenceCache, node: &str, predicate: &str) -> bool {
        ecache
            .predicate_with_ecache("p", node, predicate, HASH, true)
            .is_some()
    }

    fn snapshot_nodes(handler: &ClusterEventHandler) -> Vec<String> {
        let mut snapshot = Snapshot::new();
        handler.cache.update_snapshot(&mut snapshot).unwrap();
        snapshot
            .node_infos()
            .iter()
            .map(|info| info.name().to_string())
            .collect()
    }

    fn snapshot_pods(handler: &ClusterEventHandler, node: &str) -> usize {
        let mut snapshot = Snapshot::new();
        handler.cache.update_snapshot(&mut snapshot).unwrap();
        snapshot.get(node).map(|info| info.pods().len()).unwrap_or(0)
    }

    #[test]
    fn test_pod_events_invalidate_their_node() {
        let (handler, ecache) = handler(InvalidationConfig::default());
        handler
            .handle(ClusterEvent::node_added(make_node("a", "4", "8Gi")))
            .unwrap();
        handler
            .handle(ClusterEvent::node_added(make_node("b", "4", "8Gi")))
            .unwrap();
        cache_verdict(&ecache, "a", "Fit");
        cache_verdict(&ecache, "b", "Fit");

        let pod = assign(make_pod("web", "1", "1Gi"), "a");
        handler.handle(ClusterEvent::pod_added(pod)).unwrap();

        assert_eq!(snapshot_pods(&handler, "a"), 1);
        assert!(!cached(&ecache, "a", "Fit"));
        assert!(cached(&ecache, "b", "Fit"));
    }

    #[test]
    fn test_moved_pod_invalidates_both_nodes() {
        let (handler, ecache) = handler(InvalidationConfig::default());
        for name in ["a", "b", "c"] {
            handler
                .handle(ClusterEvent::node_added(make_node(name, "4", "8Gi")))
                .unwrap();
        }
        handler
            .handle(ClusterEvent::pod_added(assign(make_pod("web", "1", "1Gi"), "a")))
            .unwrap();
        for name in ["a", "b", "c"] {
            cache_verdict(&ecache, name, "Fit");
        }

        let moved = assign(make_pod("web", "1", "1Gi"), "b");
        handler
            .handle(ClusterEvent::modified(ClusterObject::Pod(Box::new(moved))))
            .unwrap();

        assert_eq!(snapshot_pods(&handler, "a"), 0);
        assert_eq!(snapshot_pods(&handler, "b"), 1);
        assert!(!cached(&ecache, "a", "Fit"));
        assert!(!cached(&ecache, "b", "Fit"));
        assert!(cached(&ecache, "c", "Fit"));
    }

    #[test]
    fn test_pod_deletion_invalidates_affinity_everywhere() {
        let (handler, ecache) = handler(InvalidationConfig {
            affinity_predicates: vec!["InterPodAffinity".to_string()],
            ..Default::default()
        });
        handler
            .handle(ClusterEvent::node_added(make_node("a", "4", "8Gi")))
            .unwrap();
        handler
            .handle(ClusterEvent::node_added(make_node("b", "4", "8Gi")))
            .unwrap();
        let pod = assign(make_pod("web", "1", "1Gi"), "a");
        handler.handle(ClusterEvent::pod_added(pod.clone())).unwrap();

        cache_verdict(&ecache, "b", "InterPodAffinity");
        cache_verdict(&ecache, "b", "Fit");

        handler
            .handle(ClusterEvent::deleted(ClusterObject::Pod(Box::new(pod))))
            .unwrap();

        assert_eq!(snapshot_pods(&handler, "a"), 0);
        assert!(!cached(&ecache, "b", "InterPodAffinity"));
        assert!(cached(&ecache, "b", "Fit"));
    }

    #[test]
    fn test_unassigned_and_unknown_pods_are_ignored() {
        let (handler, _) = handler(InvalidationConfig::default());
        handler
            .handle(ClusterEvent::node_added(make_node("a", "4", "8Gi")))
            .unwrap();

        let pending = make_pod("pending", "1", "1Gi");
        handler.handle(ClusterEvent::pod_added(pending.clone())).unwrap();
        handler
            .handle(ClusterEvent::deleted(ClusterObject::Pod(Box::new(pending))))
            .unwrap();
        assert_eq!(snapshot_pods(&handler, "a"), 0);
    }

    #[test]
    fn test_node_events() {
        let (handler, ecache) = handler(InvalidationConfig::default());
        handler
            .handle(ClusterEvent::node_added(make_node("a", "4", "8Gi")))
            .unwrap();
        cache_verdict(&ecache, "a", "Fit");

        handler
            .handle(ClusterEvent::modified(ClusterObject::Node(Box::new(make_node(
                "a", "8", "16Gi",
            )))))
            .unwrap();
        assert!(!cached(&ecache, "a", "Fit"));

        cache_verdict(&ecache, "a", "Fit");
        handler
            .handle(ClusterEvent::deleted(ClusterObject::Node(Box::new(make_node(
                "a", "8", "16Gi",
            )))))
            .unwrap();
        assert!(!cached(&ecache, "a", "Fit"));
        assert!(snapshot_nodes(&handler).is_empty());
    }

    #[test]
    fn test_claim_events_update_store_and_invalidate_volume_predicates() {
        let (handler, ecache) = handler(InvalidationConfig {
            volume_predicates: vec!["VolumeZone".to_string()],
            ..Default::default()
        });
        handler
            .handle(ClusterEvent::node_added(make_node("a", "4", "8Gi")))
            .unwrap();
        cache_verdict(&ecache, "a", "VolumeZone");
        cache_verdict(&ecache, "a", "Fit");

        let claim = make_claim("test", "data", Some("pv-1"));
        handler
            .handle(ClusterEvent::added(ClusterObject::PersistentVolumeClaim(Box::new(
                claim.clone(),
            ))))
            .unwrap();
        assert_eq!(handler.claims.len(), 1);
        assert!(!cached(&ecache, "a", "VolumeZone"));
        assert!(cached(&ecache, "a", "Fit"));

        handler
            .handle(ClusterEvent::deleted(ClusterObject::PersistentVolumeClaim(Box::new(
                claim,
            ))))
            .unwrap();
        assert!(handler.claims.is_empty());
    }

    #[test]
    fn test_volume_events_invalidate_volume_predicates() {
        let (handler, ecache) = handler(InvalidationConfig {
            volume_predicates: vec!["VolumeZone".to_string()],
            ..Default::default()
        });
        cache_verdict(&ecache, "a", "VolumeZone");

        handler
            .handle(ClusterEvent::added(ClusterObject::PersistentVolume(Box::default())))
            .unwrap();
        assert!(!cached(&ecache, "a", "VolumeZone"));
    }

    #[test]
    fn test_without_equivalence_cache() {
        let handler = ClusterEventHandler::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(VolumeClaimStore::new()),
            None,
            &InvalidationConfig::default(),
        );
        handler
            .handle(ClusterEvent::node_added(make_node("a", "4", "8Gi")))
            .unwrap();
        handler
            .handle(ClusterEvent::pod_added(assign(make_pod("web", "1", "1Gi"), "a")))
            .unwrap();
        assert_eq!(snapshot_pods(&handler, "a"), 1);
    }
}
