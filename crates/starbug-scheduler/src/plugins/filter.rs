use super::names;
use crate::cache::NodeInfo;
use crate::framework::{CycleState, FilterPlugin, Plugin, PreFilterPlugin};
use crate::types::{Code, Status};
use starbug_core::{Pod, ResourceQuantities, Taint, Toleration};
use tracing::debug;

/// Taint placed on nodes marked unschedulable
const UNSCHEDULABLE_TAINT_KEY: &str = "node.kubernetes.io/unschedulable";

/// Rejects nodes without enough free CPU or memory for the pod's requests
pub struct NodeResourcesFit;

impl NodeResourcesFit {
    /// Cycle state key of the pod's summed requests
    pub const STATE_KEY: &'static str = "PreFilterNodeResourcesFit";
}

impl Plugin for NodeResourcesFit {
    fn name(&self) -> &str {
        names::NODE_RESOURCES_FIT
    }
}

impl PreFilterPlugin for NodeResourcesFit {
    fn pre_filter(&self, state: &CycleState, pod: &Pod) -> Status {
        state.write(Self::STATE_KEY, ResourceQuantities::from_pod_requests(pod));
        Status::success()
    }
}

impl FilterPlugin for NodeResourcesFit {
    fn filter(&self, state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> Status {
        let request = state
            .read::<ResourceQuantities>(Self::STATE_KEY)
            .map(|r| *r)
            .unwrap_or_else(|| ResourceQuantities::from_pod_requests(pod));
        if request.is_zero() {
            return Status::success();
        }

        let allocatable = node_info.allocatable();
        let requested = node_info.requested();
        debug!(
            "Node {} has CPU: {}/{} milli, Memory: {}/{} bytes requested",
            node_info.name(),
            requested.cpu_millicores,
            allocatable.cpu_millicores,
            requested.memory_bytes,
            allocatable.memory_bytes
        );

        let mut reasons = Vec::new();
        if request.cpu_millicores > allocatable.cpu_millicores - requested.cpu_millicores {
            reasons.push("Insufficient cpu".to_string());
        }
        if request.memory_bytes > allocatable.memory_bytes - requested.memory_bytes {
            reasons.push("Insufficient memory".to_string());
        }

        if reasons.is_empty() {
            Status::success()
        } else {
            Status::with_reasons(Code::Unschedulable, reasons)
        }
    }
}

/// Rejects nodes whose labels do not satisfy the pod's node selector
pub struct NodeSelector;

impl Plugin for NodeSelector {
    fn name(&self) -> &str {
        names::NODE_SELECTOR
    }
}

impl FilterPlugin for NodeSelector {
    fn filter(&self, _state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> Status {
        let Some(selector) = pod.spec.as_ref().and_then(|s| s.node_selector.as_ref()) else {
            return Status::success();
        };

        let labels = node_info.node().metadata.labels.as_ref();
        let matches = selector
            .iter()
            .all(|(key, value)| labels.and_then(|l| l.get(key)) == Some(value));

        if matches {
            Status::success()
        } else {
            Status::new(
                Code::UnschedulableAndUnresolvable,
                "node(s) didn't match node selector",
            )
        }
    }
}

/// Rejects nodes with NoSchedule or NoExecute taints the pod does not tolerate
pub struct TaintToleration;

impl Plugin for TaintToleration {
    fn name(&self) -> &str {
        names::TAINT_TOLERATION
    }
}

impl FilterPlugin for TaintToleration {
    fn filter(&self, _state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> Status {
        let taints = node_info
            .node()
            .spec
            .as_ref()
            .and_then(|s| s.taints.as_deref())
            .unwrap_or_default();
        let tolerations = pod
            .spec
            .as_ref()
            .and_then(|s| s.tolerations.as_deref())
            .unwrap_or_default();

        let untolerated = taints
            .iter()
            .filter(|t| t.effect == "NoSchedule" || t.effect == "NoExecute")
            .find(|t| !tolerations.iter().any(|tol| tolerates(tol, t)));

        match untolerated {
            None => Status::success(),
            Some(taint) => Status::new(
                Code::UnschedulableAndUnresolvable,
                format!(
                    "node(s) had untolerated taint {{{}: {}}}",
                    taint.key,
                    taint.value.as_deref().unwrap_or_default()
                ),
            ),
        }
    }
}

/// Rejects nodes marked unschedulable, unless the pod tolerates that
pub struct NodeUnschedulable;

impl Plugin for NodeUnschedulable {
    fn name(&self) -> &str {
        names::NODE_UNSCHEDULABLE
    }
}

impl FilterPlugin for NodeUnschedulable {
    fn filter(&self, _state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> Status {
        let unschedulable = node_info
            .node()
            .spec
            .as_ref()
            .and_then(|s| s.unschedulable)
            .unwrap_or(false);
        if !unschedulable {
            return Status::success();
        }

        let taint = Taint {
            key: UNSCHEDULABLE_TAINT_KEY.to_string(),
            effect: "NoSchedule".to_string(),
            ..Default::default()
        };
        let tolerated = pod
            .spec
            .as_ref()
            .and_then(|s| s.tolerations.as_ref())
            .is_some_and(|tols| tols.iter().any(|tol| tolerates(tol, &taint)));

        if tolerated {
            Status::success()
        } else {
            Status::new(
                Code::UnschedulableAndUnresolvable,
                "node(s) were unschedulable",
            )
        }
    }
}

/// Whether a toleration matches a taint
fn tolerates(toleration: &Toleration, taint: &Taint) -> bool {
    if let Some(effect) = toleration.effect.as_deref() {
        if !effect.is_empty() && effect != taint.effect {
            return false;
        }
    }

    let key = toleration.key.as_deref().unwrap_or_default();
    match toleration.operator.as_deref() {
        // an empty key with Exists tolerates everything
        Some("Exists") => key.is_empty() || key == taint.key,
        Some("Equal") | None => {
            key == taint.key
                && toleration.value.as_deref().unwrap_or_default()
                    == taint.value.as_deref().unwrap_or_default()
        }
        Some(_) => false,
    }
}
