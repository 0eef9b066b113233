use super::{pod_key, Cache, NodeInfo, Snapshot};
use crate::error::{Result, SchedulerError};
use parking_lot::RwLock;
use starbug_core::{Node, Pod, StarbugError};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct CacheState {
    /// Ordered by name so snapshots iterate nodes deterministically
    nodes: BTreeMap<String, NodeInfo>,
    /// Pod key -> node name, for every assigned pod
    pod_nodes: HashMap<String, String>,
    /// Pods whose node has not been added yet, keyed by node name
    orphans: HashMap<String, Vec<Pod>>,
    generation: u64,
}

impl CacheState {
    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn touch(&mut self, node_name: &str) {
        let generation = self.next_generation();
        if let Some(info) = self.nodes.get_mut(node_name) {
            info.set_generation(generation);
        }
    }
}

/// In-memory cluster cache fed by node and pod events
///
/// Every mutation stamps the affected `NodeInfo` with a new generation, which
/// lets `update_snapshot` reuse the `Arc` of every node that did not change.
#[derive(Default)]
pub struct InMemoryCache {
    state: RwLock<CacheState>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; pods seen for it earlier are attached
    pub fn add_node(&self, node: Node) -> Result<()> {
        let name = node_name_of(&node)?;
        let mut state = self.state.write();
        if state.nodes.contains_key(&name) {
            return Err(SchedulerError::internal_error(format!(
                "node {} already exists in cache",
                name
            )));
        }

        let orphans = state.orphans.remove(&name).unwrap_or_default();
        state.nodes.insert(name.clone(), NodeInfo::with_pods(node, orphans));
        state.touch(&name);
        debug!("Added node {} to cache", name);
        Ok(())
    }

    /// Replace a node object, keeping its pods
    pub fn update_node(&self, node: Node) -> Result<()> {
        let name = node_name_of(&node)?;
        let mut state = self.state.write();
        if !state.nodes.contains_key(&name) {
            drop(state);
            return self.add_node(node);
        }

        if let Some(info) = state.nodes.get_mut(&name) {
            info.set_node(node);
        }
        state.touch(&name);
        Ok(())
    }

    pub fn remove_node(&self, node_name: &str) -> Result<()> {
        let mut state = self.state.write();
        let info = state
            .nodes
            .remove(node_name)
            .ok_or_else(|| SchedulerError::internal_error(format!("node {} not in cache", node_name)))?;

        for pod in info.pods() {
            state.pod_nodes.remove(&pod_key(pod));
        }
        state.next_generation();
        debug!("Removed node {} from cache", node_name);
        Ok(())
    }

    /// Add an assigned pod (`spec.nodeName` set)
    pub fn add_pod(&self, pod: Pod) -> Result<()> {
        let node_name = assigned_node(&pod)?;
        let key = pod_key(&pod);
        let mut guard = self.state.write();
        let state = &mut *guard;
        if state.pod_nodes.contains_key(&key) {
            return Err(SchedulerError::internal_error(format!(
                "pod {} already exists in cache",
                key
            )));
        }

        state.pod_nodes.insert(key, node_name.clone());
        match state.nodes.get_mut(&node_name) {
            Some(info) => {
                info.add_pod(pod);
                state.touch(&node_name);
            }
            None => state.orphans.entry(node_name).or_default().push(pod),
        }
        Ok(())
    }

    /// Replace a pod, moving it between nodes if its assignment changed
    pub fn update_pod(&self, pod: Pod) -> Result<()> {
        if self.state.read().pod_nodes.contains_key(&pod_key(&pod)) {
            self.remove_pod(&pod)?;
        }
        self.add_pod(pod)
    }

    /// Remove a pod; returns the node it was assigned to
    pub fn remove_pod(&self, pod: &Pod) -> Result<String> {
        let key = pod_key(pod);
        let mut guard = self.state.write();
        let state = &mut *guard;
        let node_name = state
            .pod_nodes
            .remove(&key)
            .ok_or_else(|| SchedulerError::internal_error(format!("pod {} not in cache", key)))?;

        let removed = match state.nodes.get_mut(&node_name) {
            Some(info) => info.remove_pod(pod),
            None => state
                .orphans
                .get_mut(&node_name)
                .map(|pods| {
                    let before = pods.len();
                    pods.retain(|p| pod_key(p) != key);
                    before != pods.len()
                })
                .unwrap_or(false),
        };
        if !removed {
            return Err(SchedulerError::internal_error(format!(
                "pod {} missing from node {}",
                key, node_name
            )));
        }

        state.touch(&node_name);
        Ok(node_name)
    }

    /// Node the pod is currently assigned to, if cached
    pub fn pod_node(&self, pod: &Pod) -> Option<String> {
        self.state.read().pod_nodes.get(&pod_key(pod)).cloned()
    }
}

impl Cache for InMemoryCache {
    fn update_snapshot(&self, snapshot: &mut Snapshot) -> Result<()> {
        let state = self.state.read();
        if snapshot.generation() == state.generation && snapshot.num_nodes() == state.nodes.len() {
            return Ok(());
        }

        let list = state
            .nodes
            .values()
            .map(|info| match snapshot.get(info.name()) {
                Some(existing) if existing.generation() == info.generation() => existing.clone(),
                _ => Arc::new(info.clone()),
            })
            .collect();
        snapshot.update(list, state.generation);
        Ok(())
    }
}

fn node_name_of(node: &Node) -> Result<String> {
    match node.metadata.name.as_deref() {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(StarbugError::invalid_resource("node has no name", "Set metadata.name on the node").into()),
    }
}

fn assigned_node(pod: &Pod) -> Result<String> {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.clone())
        .ok_or_else(|| {
            SchedulerError::internal_error(format!(
                "pod {} is not assigned to a node",
                starbug_core::pod_full_name(pod)
            ))
        })
}
