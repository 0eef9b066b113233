use parking_lot::RwLock;
use starbug_core::{controller_uid, PersistentVolumeClaim, Pod};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

/// The scheduling-relevant attributes two pods must share to be equivalent
///
/// Only revision-independent attributes belong here: the controlling owner
/// and the volumes the pod's claims are bound to. Two pods with equal
/// `EquivalencePod`s get identical filter verdicts on any given node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EquivalencePod {
    controller_uid: String,
    /// (claim name, bound volume name), sorted
    volume_bindings: BTreeSet<(String, String)>,
}

impl EquivalencePod {
    pub fn new(controller_uid: impl Into<String>) -> Self {
        Self {
            controller_uid: controller_uid.into(),
            volume_bindings: BTreeSet::new(),
        }
    }

    pub fn with_volume_binding(mut self, claim: impl Into<String>, volume: impl Into<String>) -> Self {
        self.volume_bindings.insert((claim.into(), volume.into()));
        self
    }

    pub fn controller_uid(&self) -> &str {
        &self.controller_uid
    }

    /// Hash used as the equivalence class key
    pub fn hash_value(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Derives the equivalence attributes of a pod
///
/// Returning `None` disables the equivalence cache for that pod; it must be
/// returned whenever an attribute cannot be resolved.
pub trait EquivalencePodGenerator: Send + Sync {
    fn equivalence_pod(&self, pod: &Pod) -> Option<EquivalencePod>;
}

impl<F> EquivalencePodGenerator for F
where
    F: Fn(&Pod) -> Option<EquivalencePod> + Send + Sync,
{
    fn equivalence_pod(&self, pod: &Pod) -> Option<EquivalencePod> {
        self(pod)
    }
}

/// Read access to persistent volume claims
pub trait PersistentVolumeClaimLister: Send + Sync {
    fn get(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim>;
}

/// Equivalence from the controller owner and bound claim volumes
pub struct VolumeAwareEquivalence {
    claims: Arc<dyn PersistentVolumeClaimLister>,
}

impl VolumeAwareEquivalence {
    pub fn new(claims: Arc<dyn PersistentVolumeClaimLister>) -> Self {
        Self { claims }
    }
}

impl EquivalencePodGenerator for VolumeAwareEquivalence {
    fn equivalence_pod(&self, pod: &Pod) -> Option<EquivalencePod> {
        let mut equivalence = EquivalencePod::new(controller_uid(pod)?);
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");

        let volumes = pod.spec.as_ref().and_then(|s| s.volumes.as_ref());
        for volume in volumes.into_iter().flatten() {
            let Some(source) = &volume.persistent_volume_claim else {
                continue;
            };

            let Some(claim) = self.claims.get(namespace, &source.claim_name) else {
                debug!(
                    "Claim {}/{} not found, pod {} has no equivalence class",
                    namespace,
                    source.claim_name,
                    starbug_core::pod_full_name(pod)
                );
                return None;
            };

            let bound_volume = claim
                .spec
                .as_ref()
                .and_then(|s| s.volume_name.as_deref())
                .filter(|name| !name.is_empty());
            let Some(bound_volume) = bound_volume else {
                debug!(
                    "Claim {}/{} is not bound, pod {} has no equivalence class",
                    namespace,
                    source.claim_name,
                    starbug_core::pod_full_name(pod)
                );
                return None;
            };

            equivalence = equivalence.with_volume_binding(source.claim_name.clone(), bound_volume);
        }

        Some(equivalence)
    }
}

/// In-memory claim store, kept current by cluster events
#[derive(Default)]
pub struct VolumeClaimStore {
    claims: RwLock<HashMap<(String, String), PersistentVolumeClaim>>,
}

impl VolumeClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a claim
    pub fn upsert(&self, claim: PersistentVolumeClaim) {
        let key = claim_key(&claim);
        self.claims.write().insert(key, claim);
    }

    pub fn remove(&self, claim: &PersistentVolumeClaim) {
        self.claims.write().remove(&claim_key(claim));
    }

    pub fn len(&self) -> usize {
        self.claims.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.read().is_empty()
    }
}

impl PersistentVolumeClaimLister for VolumeClaimStore {
    fn get(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.claims
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }
}

fn claim_key(claim: &PersistentVolumeClaim) -> (String, String) {
    (
        claim
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string()),
        claim.metadata.name.clone().unwrap_or_default(),
    )
}
