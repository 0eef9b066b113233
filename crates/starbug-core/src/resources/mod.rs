pub mod quantities;

pub use quantities::ResourceQuantities;

use k8s_openapi::api::core::v1::{Node, Pod};

/// Name of a node, or "unknown" when the manifest has none
pub fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or("unknown")
}

/// `namespace/name` of a pod, used in logs and error messages
pub fn pod_full_name(pod: &Pod) -> String {
    format!(
        "{}/{}",
        pod.metadata.namespace.as_deref().unwrap_or("default"),
        pod.metadata.name.as_deref().unwrap_or("unknown")
    )
}

/// UID of the pod's controlling owner reference, if any
pub fn controller_uid(pod: &Pod) -> Option<&str> {
    pod.metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|owner| owner.controller == Some(true))
        .map(|owner| owner.uid.as_str())
}

/// Pod priority, defaulting to zero
pub fn pod_priority(pod: &Pod) -> i32 {
    pod.spec.as_ref().and_then(|s| s.priority).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn owner(uid: &str, controller: Option<bool>) -> OwnerReference {
        OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: "ReplicaSet".to_string(),
            name: "web".to_string(),
            uid: uid.to_string(),
            controller,
            ..Default::default()
        }
    }

    #[test]
    fn test_controller_uid() {
        let mut pod = Pod::default();
        assert_eq!(controller_uid(&pod), None);

        pod.metadata.owner_references = Some(vec![owner("a", None), owner("b", Some(true))]);
        assert_eq!(controller_uid(&pod), Some("b"));

        pod.metadata.owner_references = Some(vec![owner("a", Some(false))]);
        assert_eq!(controller_uid(&pod), None);
    }

    #[test]
    fn test_pod_full_name() {
        let mut pod = Pod::default();
        pod.metadata.name = Some("nginx".to_string());
        assert_eq!(pod_full_name(&pod), "default/nginx");

        pod.metadata.namespace = Some("web".to_string());
        assert_eq!(pod_full_name(&pod), "web/nginx");
    }
}
