//! Offline scheduling of a cluster state file

use serde::Deserialize;
use starbug_core::{ClusterEvent, ClusterObject, Node, PersistentVolumeClaim, Pod};
use starbug_scheduler::{
    ClusterEventHandler, GenericScheduler, InMemoryCache, PluginFramework, Registry,
    ScheduleResult, SchedulerConfig, SchedulerError, VolumeAwareEquivalence, VolumeClaimStore,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Nodes, pods and claims to schedule against
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterState {
    pub nodes: Vec<Node>,
    /// Pods with `spec.nodeName` set are already placed; the rest are
    /// scheduled in order
    pub pods: Vec<Pod>,
    pub persistent_volume_claims: Vec<PersistentVolumeClaim>,
}

impl ClusterState {
    /// Load a YAML or JSON cluster state
    pub fn from_file(path: &Path) -> miette::Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| miette::miette!("Failed to read cluster state '{}': {}", path.display(), e))?;
        starbug_core::from_yaml(&data)
            .map_err(|e| miette::miette!("Failed to parse cluster state '{}': {}", path.display(), e))
    }
}

/// What happened to one pending pod
#[derive(Debug)]
pub struct Placement {
    /// `namespace/name`
    pub pod: String,
    pub outcome: Result<ScheduleResult, SchedulerError>,
}

/// Schedule every pending pod of `state`, assuming each placement before the
/// next pod is attempted
pub async fn schedule_pending(
    state: ClusterState,
    config: &SchedulerConfig,
) -> starbug_scheduler::Result<Vec<Placement>> {
    let cache = Arc::new(InMemoryCache::new());
    let claims = Arc::new(VolumeClaimStore::new());
    let framework = PluginFramework::from_profile(&config.profile, &Registry::with_default_plugins())?;
    let mut scheduler = GenericScheduler::from_config(
        config,
        cache.clone(),
        Arc::new(framework),
        Arc::new(VolumeAwareEquivalence::new(claims.clone())),
    )?;
    let events = ClusterEventHandler::new(
        cache,
        claims,
        scheduler.equivalence_cache().cloned(),
        &config.invalidation,
    );

    for claim in state.persistent_volume_claims {
        events.handle(ClusterEvent::added(ClusterObject::PersistentVolumeClaim(Box::new(claim))))?;
    }
    for node in state.nodes {
        events.handle(ClusterEvent::node_added(node))?;
    }

    let (placed, pending): (Vec<Pod>, Vec<Pod>) = state
        .pods
        .into_iter()
        .partition(|pod| pod.spec.as_ref().and_then(|s| s.node_name.as_ref()).is_some());
    for pod in placed {
        events.handle(ClusterEvent::pod_added(pod))?;
    }
    info!("Scheduling {} pending pod(s)", pending.len());

    let mut placements = Vec::with_capacity(pending.len());
    for mut pod in pending {
        let name = starbug_core::pod_full_name(&pod);
        let outcome = scheduler.schedule(&pod).await;

        if let Ok(result) = &outcome {
            debug!("Assuming pod {} on node {}", name, result.suggested_host);
            pod.spec.get_or_insert_with(Default::default).node_name =
                Some(result.suggested_host.clone());
            events.handle(ClusterEvent::pod_added(pod))?;
        }
        placements.push(Placement { pod: name, outcome });
    }

    Ok(placements)
}
