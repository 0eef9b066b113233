//! Starbug Core - Fundamental types shared by the Starbug scheduler
//!
//! This crate provides:
//! - Kubernetes resource re-exports and metadata helpers
//! - Error types with miette diagnostics
//! - Resource quantity parsing and arithmetic
//! - Cluster events consumed by the scheduler cache
//! - Serialization helpers

pub mod error;
pub mod events;
pub mod resources;

// Re-export commonly used types
pub use error::{Result, StarbugError};
pub use events::{ClusterEvent, ClusterObject, WatchEventType};
pub use resources::{controller_uid, node_name, pod_full_name, pod_priority, ResourceQuantities};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::{
    Node, PersistentVolume, PersistentVolumeClaim, Pod, Taint, Toleration,
};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Deserialize a resource from YAML
///
/// YAML is a superset of JSON, so this also accepts JSON documents.
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        StarbugError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_and_json_documents() {
        let node: Node = from_yaml("metadata:\n  name: worker-1\n").unwrap();
        assert_eq!(node.metadata.name, Some("worker-1".to_string()));

        let pod: Pod = from_yaml(r#"{"metadata": {"name": "nginx"}}"#).unwrap();
        assert_eq!(pod.metadata.name, Some("nginx".to_string()));
    }

    #[test]
    fn test_invalid_yaml() {
        let result: Result<Pod> = from_yaml("metadata: [unterminated");
        assert!(matches!(
            result,
            Err(StarbugError::SerializationError { .. })
        ));
    }
}
