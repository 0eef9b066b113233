use k8s_openapi::api::core::v1::{Node, PersistentVolume, PersistentVolumeClaim, Pod};
use serde::{Deserialize, Serialize};

/// Watch event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// The object carried by a cluster event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "object")]
pub enum ClusterObject {
    Node(Box<Node>),
    Pod(Box<Pod>),
    PersistentVolume(Box<PersistentVolume>),
    PersistentVolumeClaim(Box<PersistentVolumeClaim>),
}

impl ClusterObject {
    /// Kind name of the carried object
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Node(_) => "Node",
            Self::Pod(_) => "Pod",
            Self::PersistentVolume(_) => "PersistentVolume",
            Self::PersistentVolumeClaim(_) => "PersistentVolumeClaim",
        }
    }
}

/// A change to cluster state observed by the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterEvent {
    /// Type of watch event (ADDED, MODIFIED, DELETED)
    pub event_type: WatchEventType,
    /// The object after the change (or the last known state for deletes)
    pub object: ClusterObject,
}

impl ClusterEvent {
    /// Create an ADDED event
    pub fn added(object: ClusterObject) -> Self {
        Self {
            event_type: WatchEventType::Added,
            object,
        }
    }

    /// Create a MODIFIED event
    pub fn modified(object: ClusterObject) -> Self {
        Self {
            event_type: WatchEventType::Modified,
            object,
        }
    }

    /// Create a DELETED event
    pub fn deleted(object: ClusterObject) -> Self {
        Self {
            event_type: WatchEventType::Deleted,
            object,
        }
    }

    pub fn pod_added(pod: Pod) -> Self {
        Self::added(ClusterObject::Pod(Box::new(pod)))
    }

    pub fn node_added(node: Node) -> Self {
        Self::added(ClusterObject::Node(Box::new(node)))
    }
}
