use super::PodNominator;
use crate::cache::pod_key;
use parking_lot::RwLock;
use starbug_core::Pod;
use std::collections::HashMap;
use tracing::debug;

/// Nominated pods kept in memory, keyed by node name
#[derive(Default)]
pub struct InMemoryNominator {
    nominated: RwLock<HashMap<String, Vec<Pod>>>,
}

impl InMemoryNominator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nominate `pod` to `node_name`, replacing any earlier nomination
    pub fn add_nominated_pod(&self, pod: Pod, node_name: &str) {
        self.delete_nominated_pod(&pod);
        debug!(
            "Nominated pod {} to node {}",
            starbug_core::pod_full_name(&pod),
            node_name
        );
        self.nominated
            .write()
            .entry(node_name.to_string())
            .or_default()
            .push(pod);
    }

    pub fn delete_nominated_pod(&self, pod: &Pod) {
        let key = pod_key(pod);
        let mut nominated = self.nominated.write();
        nominated.retain(|_, pods| {
            pods.retain(|p| pod_key(p) != key);
            !pods.is_empty()
        });
    }
}

impl PodNominator for InMemoryNominator {
    fn nominated_pods_for_node(&self, node_name: &str) -> Vec<Pod> {
        self.nominated
            .read()
            .get(node_name)
            .cloned()
            .unwrap_or_default()
    }
}
