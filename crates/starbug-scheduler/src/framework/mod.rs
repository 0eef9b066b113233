//! Plugin framework consumed by the scheduler
//!
//! The scheduler only talks to a [`Framework`]. [`PluginFramework`] is the
//! shipped implementation: it runs the plugins of one profile at each
//! extension point, in configuration order.
//!
//! Every method here is synchronous. Filter plugins run on blocking worker
//! threads during the feasibility search; the other extension points run
//! inline on the scheduling task.

pub mod cycle_state;
pub mod nominator;
pub mod registry;
pub mod runtime;

pub use cycle_state::CycleState;
pub use nominator::InMemoryNominator;
pub use registry::Registry;
pub use runtime::PluginFramework;

use crate::cache::NodeInfo;
use crate::types::{NodeScoreList, PluginToNodeScores, Status};
use starbug_core::Pod;
use std::sync::Arc;

/// Common plugin identity
pub trait Plugin: Send + Sync {
    /// Name of the plugin, unique within a profile
    fn name(&self) -> &str;
}

/// Runs once per attempt before any node is filtered
pub trait PreFilterPlugin: Plugin {
    fn pre_filter(&self, state: &CycleState, pod: &Pod) -> Status;
}

/// Decides whether a pod fits a node
pub trait FilterPlugin: Plugin {
    fn filter(&self, state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> Status;

    /// Whether the verdict depends only on the pod's equivalence class and
    /// the node itself. Verdicts of dependent filters are never cached.
    fn element_independent(&self) -> bool {
        true
    }
}

/// Runs once per attempt before scoring, with every feasible node
pub trait PreScorePlugin: Plugin {
    fn pre_score(&self, state: &CycleState, pod: &Pod, nodes: &[Arc<NodeInfo>]) -> Status;
}

/// Ranks feasible nodes
pub trait ScorePlugin: Plugin {
    /// Score in `[MIN_NODE_SCORE, MAX_NODE_SCORE]` once normalized
    fn score(&self, state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> Result<i64, Status>;

    /// Rescale raw scores in place; the default leaves them unchanged
    fn normalize_score(&self, _state: &CycleState, _pod: &Pod, _scores: &mut NodeScoreList) -> Status {
        Status::success()
    }
}

/// Pods nominated to run on a node but not yet bound there
pub trait PodNominator: Send + Sync {
    fn nominated_pods_for_node(&self, node_name: &str) -> Vec<Pod>;
}

/// The plugin runtime the scheduler drives
pub trait Framework: Send + Sync {
    fn profile_name(&self) -> &str;

    fn run_pre_filter_plugins(&self, state: &CycleState, pod: &Pod) -> Status;

    fn has_filter_plugins(&self) -> bool;

    /// Run filter plugins, accounting for pods nominated to the node
    fn run_filter_plugins_with_nominated_pods(
        &self,
        state: &CycleState,
        pod: &Pod,
        node_info: &NodeInfo,
    ) -> Status;

    fn run_pre_score_plugins(&self, state: &CycleState, pod: &Pod, nodes: &[Arc<NodeInfo>]) -> Status;

    fn has_score_plugins(&self) -> bool;

    /// Weighted scores per plugin, each list in the order of `nodes`
    fn run_score_plugins(
        &self,
        state: &CycleState,
        pod: &Pod,
        nodes: &[Arc<NodeInfo>],
    ) -> Result<PluginToNodeScores, Status>;
}
