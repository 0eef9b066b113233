//! Plugins shipped with the scheduler

pub mod filter;
pub mod score;

pub use filter::{NodeResourcesFit, NodeSelector, NodeUnschedulable, TaintToleration};
pub use score::{BalancedAllocation, LeastAllocated};

use crate::framework::Registry;
use std::sync::Arc;

/// Registered plugin names
pub mod names {
    pub const NODE_RESOURCES_FIT: &str = "NodeResourcesFit";
    pub const NODE_SELECTOR: &str = "NodeSelector";
    pub const TAINT_TOLERATION: &str = "TaintToleration";
    pub const NODE_UNSCHEDULABLE: &str = "NodeUnschedulable";
    pub const LEAST_ALLOCATED: &str = "LeastAllocated";
    pub const BALANCED_ALLOCATION: &str = "BalancedAllocation";
}

/// Register every default plugin at each extension point it implements
pub fn register_defaults(registry: &mut Registry) {
    let resources_fit = Arc::new(NodeResourcesFit);
    registry
        .register_pre_filter(resources_fit.clone())
        .register_filter(resources_fit)
        .register_filter(Arc::new(NodeSelector))
        .register_filter(Arc::new(TaintToleration))
        .register_filter(Arc::new(NodeUnschedulable))
        .register_score(Arc::new(LeastAllocated))
        .register_score(Arc::new(BalancedAllocation));
}
