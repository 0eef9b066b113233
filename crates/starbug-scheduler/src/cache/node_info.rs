use super::pod_key;
use starbug_core::{Node, Pod, ResourceQuantities};

/// A node together with the pods assigned to it
///
/// Snapshots hand these out behind `Arc`, so a `NodeInfo` seen by a
/// scheduling cycle never changes underneath it. The cache mutates its own
/// copy and stamps it with a fresh `generation` on every change.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    node: Node,
    name: String,
    pods: Vec<Pod>,
    requested: ResourceQuantities,
    allocatable: ResourceQuantities,
    generation: u64,
}

impl NodeInfo {
    /// Create an info for a node with no pods
    pub fn new(node: Node) -> Self {
        let name = starbug_core::node_name(&node).to_string();
        let allocatable = ResourceQuantities::from_node_allocatable(&node);
        Self {
            node,
            name,
            pods: Vec::new(),
            requested: ResourceQuantities::default(),
            allocatable,
            generation: 0,
        }
    }

    /// Create an info with pods already assigned
    pub fn with_pods(node: Node, pods: impl IntoIterator<Item = Pod>) -> Self {
        let mut info = Self::new(node);
        for pod in pods {
            info.add_pod(pod);
        }
        info
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pods(&self) -> &[Pod] {
        &self.pods
    }

    /// Sum of the requests of all assigned pods
    pub fn requested(&self) -> ResourceQuantities {
        self.requested
    }

    pub fn allocatable(&self) -> ResourceQuantities {
        self.allocatable
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    /// Replace the node object, keeping the assigned pods
    pub fn set_node(&mut self, node: Node) {
        self.allocatable = ResourceQuantities::from_node_allocatable(&node);
        self.name = starbug_core::node_name(&node).to_string();
        self.node = node;
    }

    pub fn add_pod(&mut self, pod: Pod) {
        self.requested += ResourceQuantities::from_pod_requests(&pod);
        self.pods.push(pod);
    }

    /// Remove a pod by identity; returns false if it was not assigned here
    pub fn remove_pod(&mut self, pod: &Pod) -> bool {
        let key = pod_key(pod);
        let Some(index) = self.pods.iter().position(|p| pod_key(p) == key) else {
            return false;
        };

        let removed = self.pods.swap_remove(index);
        self.requested -= ResourceQuantities::from_pod_requests(&removed);
        true
    }
}
