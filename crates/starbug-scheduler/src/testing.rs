//! Fixtures and fake plugins shared by the unit tests

use crate::cache::NodeInfo;
use crate::framework::{CycleState, FilterPlugin, Plugin, ScorePlugin};
use crate::types::{Code, Status};
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec,
    ResourceRequirements, Volume,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use starbug_core::{Node, PersistentVolumeClaim, Pod};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

fn resources(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ])
}

pub fn make_node(name: &str, cpu: &str, memory: &str) -> Node {
    let mut node = Node::default();
    node.metadata.name = Some(name.to_string());
    node.status = Some(Default::default());
    if let Some(status) = node.status.as_mut() {
        status.allocatable = Some(resources(cpu, memory));
    }
    node
}

pub fn make_pod(name: &str, cpu: &str, memory: &str) -> Pod {
    let mut pod = Pod::default();
    pod.metadata.name = Some(name.to_string());
    pod.metadata.namespace = Some("default".to_string());
    pod.spec = Some(PodSpec {
        containers: vec![Container {
            name: "app".to_string(),
            resources: Some(ResourceRequirements {
                requests: Some(resources(cpu, memory)),
                ..Default::default()
            }),
            ..Default::default()
        }],
        ..Default::default()
    });
    pod
}

/// Set `spec.nodeName`
pub fn assign(mut pod: Pod, node_name: &str) -> Pod {
    pod.spec.get_or_insert_with(Default::default).node_name = Some(node_name.to_string());
    pod
}

pub fn make_claim(namespace: &str, name: &str, volume: Option<&str>) -> PersistentVolumeClaim {
    let mut claim = PersistentVolumeClaim::default();
    claim.metadata.name = Some(name.to_string());
    claim.metadata.namespace = Some(namespace.to_string());
    claim.spec = Some(PersistentVolumeClaimSpec {
        volume_name: volume.map(str::to_string),
        ..Default::default()
    });
    claim
}

/// A pod in namespace `test`, controlled by `controller_uid`, mounting
/// `claims`
pub fn owned_pod_with_claims(name: &str, controller_uid: &str, claims: &[&str]) -> Pod {
    let mut pod = make_pod(name, "100m", "128Mi");
    pod.metadata.namespace = Some("test".to_string());
    pod.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "v1".to_string(),
        kind: "ReplicationController".to_string(),
        name: "rc".to_string(),
        uid: controller_uid.to_string(),
        controller: Some(true),
        ..Default::default()
    }]);

    if let Some(spec) = pod.spec.as_mut() {
        spec.volumes = Some(
            claims
                .iter()
                .map(|claim| Volume {
                    name: format!("vol-{}", claim),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: claim.to_string(),
                        read_only: None,
                    }),
                    ..Default::default()
                })
                .collect(),
        );
    }
    pod
}

/// Accepts every node
pub struct TrueFilter;

impl Plugin for TrueFilter {
    fn name(&self) -> &str {
        "TrueFilter"
    }
}

impl FilterPlugin for TrueFilter {
    fn filter(&self, _state: &CycleState, _pod: &Pod, _node_info: &NodeInfo) -> Status {
        Status::success()
    }
}

/// Rejects every node
pub struct FalseFilter;

impl Plugin for FalseFilter {
    fn name(&self) -> &str {
        "FalseFilter"
    }
}

impl FilterPlugin for FalseFilter {
    fn filter(&self, _state: &CycleState, _pod: &Pod, _node_info: &NodeInfo) -> Status {
        Status::unschedulable("node(s) rejected by FalseFilter")
    }
}

/// Accepts only the node named like the pod
pub struct MatchFilter;

impl Plugin for MatchFilter {
    fn name(&self) -> &str {
        "MatchFilter"
    }
}

impl FilterPlugin for MatchFilter {
    fn filter(&self, _state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> Status {
        if pod.metadata.name.as_deref() == Some(node_info.name()) {
            Status::success()
        } else {
            Status::unschedulable("node(s) didn't match the pod name")
        }
    }
}

/// Accepts only nodes without pods
pub struct NoPodsFilter;

impl Plugin for NoPodsFilter {
    fn name(&self) -> &str {
        "NoPodsFilter"
    }
}

impl FilterPlugin for NoPodsFilter {
    fn filter(&self, _state: &CycleState, _pod: &Pod, node_info: &NodeInfo) -> Status {
        if node_info.pods().is_empty() {
            Status::success()
        } else {
            Status::unschedulable("node(s) already have pods")
        }
    }
}

/// Fails to run on the node named "err", accepts the rest
pub struct ErrorFilter;

impl Plugin for ErrorFilter {
    fn name(&self) -> &str {
        "ErrorFilter"
    }
}

impl FilterPlugin for ErrorFilter {
    fn filter(&self, _state: &CycleState, _pod: &Pod, node_info: &NodeInfo) -> Status {
        if node_info.name() == "err" {
            Status::new(Code::Error, "filter crashed")
        } else {
            Status::success()
        }
    }
}

/// Rejects on its first call only, counting calls
#[derive(Default)]
pub struct FailOnceFilter {
    calls: AtomicUsize,
}

impl FailOnceFilter {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Plugin for FailOnceFilter {
    fn name(&self) -> &str {
        "FailOnceFilter"
    }
}

impl FilterPlugin for FailOnceFilter {
    fn filter(&self, _state: &CycleState, _pod: &Pod, _node_info: &NodeInfo) -> Status {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Status::unschedulable("node(s) failed the first check")
        } else {
            Status::success()
        }
    }
}

/// Scores a node by its name parsed as a number
pub struct NumericScore;

impl Plugin for NumericScore {
    fn name(&self) -> &str {
        "NumericScore"
    }
}

impl ScorePlugin for NumericScore {
    fn score(&self, _state: &CycleState, _pod: &Pod, node_info: &NodeInfo) -> Result<i64, Status> {
        node_info
            .name()
            .parse()
            .map_err(|_| Status::error(format!("node name {} is not a number", node_info.name())))
    }
}

/// Scores every node 1 and counts calls
#[derive(Default)]
pub struct CountingScore {
    calls: AtomicUsize,
}

impl CountingScore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Plugin for CountingScore {
    fn name(&self) -> &str {
        "CountingScore"
    }
}

impl ScorePlugin for CountingScore {
    fn score(&self, _state: &CycleState, _pod: &Pod, _node_info: &NodeInfo) -> Result<i64, Status> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    }
}

/// Returns a score above the allowed maximum
pub struct OutOfRangeScore;

impl Plugin for OutOfRangeScore {
    fn name(&self) -> &str {
        "OutOfRangeScore"
    }
}

impl ScorePlugin for OutOfRangeScore {
    fn score(&self, _state: &CycleState, _pod: &Pod, _node_info: &NodeInfo) -> Result<i64, Status> {
        Ok(crate::types::MAX_NODE_SCORE + 1)
    }
}
