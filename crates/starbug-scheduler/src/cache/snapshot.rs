use super::NodeInfo;
use std::collections::HashMap;
use std::sync::Arc;

/// Point-in-time view of every node, used for exactly one scheduling cycle
#[derive(Debug, Default)]
pub struct Snapshot {
    node_info_list: Vec<Arc<NodeInfo>>,
    node_info_map: HashMap<String, Arc<NodeInfo>>,
    generation: u64,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes in iteration order
    pub fn node_infos(&self) -> &[Arc<NodeInfo>] {
        &self.node_info_list
    }

    pub fn get(&self, node_name: &str) -> Option<&Arc<NodeInfo>> {
        self.node_info_map.get(node_name)
    }

    pub fn num_nodes(&self) -> usize {
        self.node_info_list.len()
    }

    /// Cache generation this snapshot reflects
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replace the contents; called by `Cache` implementations
    pub fn update(&mut self, node_info_list: Vec<Arc<NodeInfo>>, generation: u64) {
        self.node_info_map = node_info_list
            .iter()
            .map(|info| (info.name().to_string(), info.clone()))
            .collect();
        self.node_info_list = node_info_list;
        self.generation = generation;
    }
}
