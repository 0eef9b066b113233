use super::names;
use crate::cache::NodeInfo;
use crate::framework::{CycleState, Plugin, ScorePlugin};
use crate::types::{Status, MAX_NODE_SCORE};
use starbug_core::{Pod, ResourceQuantities};
use tracing::debug;

/// Requested resources on the node once the pod is placed there
fn requested_with_pod(pod: &Pod, node_info: &NodeInfo) -> ResourceQuantities {
    let mut requested = node_info.requested();
    requested += ResourceQuantities::from_pod_requests(pod);
    requested
}

/// Prefers nodes with the most free resources after placement
pub struct LeastAllocated;

impl Plugin for LeastAllocated {
    fn name(&self) -> &str {
        names::LEAST_ALLOCATED
    }
}

impl ScorePlugin for LeastAllocated {
    fn score(&self, _state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> Result<i64, Status> {
        let allocatable = node_info.allocatable();
        if allocatable.cpu_millicores == 0 || allocatable.memory_bytes == 0 {
            return Ok(0);
        }

        let requested = requested_with_pod(pod, node_info);
        let free = |capacity: i64, used: i64| {
            if used > capacity {
                0
            } else {
                (capacity - used) * MAX_NODE_SCORE / capacity
            }
        };

        let cpu_score = free(allocatable.cpu_millicores, requested.cpu_millicores);
        let memory_score = free(allocatable.memory_bytes, requested.memory_bytes);
        let score = (cpu_score + memory_score) / 2;

        debug!(
            "Node {} least-allocated score: {} (CPU: {}, Memory: {})",
            node_info.name(),
            score,
            cpu_score,
            memory_score
        );
        Ok(score)
    }
}

/// Prefers nodes whose CPU and memory usage stay balanced after placement
pub struct BalancedAllocation;

impl Plugin for BalancedAllocation {
    fn name(&self) -> &str {
        names::BALANCED_ALLOCATION
    }
}

impl ScorePlugin for BalancedAllocation {
    fn score(&self, _state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> Result<i64, Status> {
        let allocatable = node_info.allocatable();
        if allocatable.cpu_millicores == 0 || allocatable.memory_bytes == 0 {
            return Ok(0);
        }

        let requested = requested_with_pod(pod, node_info);
        let cpu_fraction = requested.cpu_millicores as f64 / allocatable.cpu_millicores as f64;
        let memory_fraction = requested.memory_bytes as f64 / allocatable.memory_bytes as f64;

        // over-committed nodes get no balance credit
        if cpu_fraction >= 1.0 || memory_fraction >= 1.0 {
            return Ok(0);
        }

        let diff = (cpu_fraction - memory_fraction).abs();
        let score = ((1.0 - diff) * MAX_NODE_SCORE as f64) as i64;

        debug!(
            "Node {} balanced-allocation score: {} (CPU: {:.2}, Memory: {:.2})",
            node_info.name(),
            score,
            cpu_fraction,
            memory_fraction
        );
        Ok(score.clamp(0, MAX_NODE_SCORE))
    }
}
