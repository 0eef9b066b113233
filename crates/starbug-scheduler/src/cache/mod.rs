//! Cluster state as seen by the scheduler
//!
//! The scheduler never reads live cluster state directly. Each scheduling
//! cycle starts by asking a [`Cache`] to refresh a [`Snapshot`], and every
//! later step of that cycle works from the snapshot alone.

pub mod memory;
pub mod node_info;
pub mod snapshot;

pub use memory::InMemoryCache;
pub use node_info::NodeInfo;
pub use snapshot::Snapshot;

use crate::error::Result;
use starbug_core::Pod;

/// Source of node and pod state for scheduling cycles
pub trait Cache: Send + Sync {
    /// Bring `snapshot` up to date with the current cluster state
    fn update_snapshot(&self, snapshot: &mut Snapshot) -> Result<()>;
}

/// Stable identity of a pod: its UID, or `namespace/name` when unset
pub fn pod_key(pod: &Pod) -> String {
    match pod.metadata.uid.as_deref() {
        Some(uid) if !uid.is_empty() => uid.to_string(),
        _ => starbug_core::pod_full_name(pod),
    }
}
