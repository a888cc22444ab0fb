//! Pet reconciliation.
//!
//! A pet is one ordinally identified member of a StatefulSet: a pod plus the persistent volume
//! claims bound to it. Pets keep a stable name, network identity & storage binding across
//! restarts, are created & deleted in ordinal order, and at most one pet of a set is mutated
//! destructively at any point in time.
//!
//! The code here is organized as follows:
//! - `identity`: the identity mappers, and the identity equivalence check built on them.
//! - `health`: the health & dying predicates used to decide if an ordinal may be built past.
//! - `client`: the boundary to the remote store, including the conflict-retry update loop.
//! - `syncer`: the per-pass state machine which enforces ordinal ordering.
//! - `iterator`: the ordered walk over a set which drives a syncer through one pass.

pub mod client;
pub mod health;
pub mod identity;
pub mod iterator;
pub mod syncer;

use std::sync::Arc;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use crate::error::{SyncError, SyncResult};
use crate::pet::identity::{claim_name, update_identity, validate};

/// The lifecycle intent of a control block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PetEvent {
    /// The pet should exist and match its desired spec.
    Sync,
    /// The pet should not exist.
    Delete,
}

/// The control block of a pet, describing its desired or observed state.
#[derive(Clone, Debug)]
pub struct PetControlBlock {
    /// The pod of this pet.
    pub pod: Pod,
    /// The persistent volume claims owned by this pet, in template order.
    pub pvcs: Vec<PersistentVolumeClaim>,
    event: PetEvent,
    id: String,
    parent: Arc<StatefulSet>,
}

impl PetControlBlock {
    /// Build the desired control block for the pet with the given ordinal.
    ///
    /// The pod is built from the parent's template and stamped with every dimension of the pet's
    /// identity. One claim is built for each of the parent's volume claim templates.
    pub fn new(id: impl Into<String>, parent: Arc<StatefulSet>, event: PetEvent) -> SyncResult<Self> {
        let id = id.into();
        validate(&parent, &id)?;
        let template = parent.spec.as_ref().map(|spec| &spec.template);
        let pod_spec = match template.and_then(|tmpl| tmpl.spec.clone()) {
            Some(pod_spec) => pod_spec,
            None => {
                return Err(SyncError::InvalidArgument(format!(
                    "StatefulSet {} has no pod template spec",
                    parent.metadata.name.as_deref().unwrap_or_default()
                )))
            }
        };
        let tmpl_meta = template.and_then(|tmpl| tmpl.metadata.as_ref());

        let mut pod = Pod {
            metadata: ObjectMeta {
                labels: tmpl_meta.and_then(|meta| meta.labels.clone()),
                annotations: tmpl_meta.and_then(|meta| meta.annotations.clone()),
                namespace: parent.metadata.namespace.clone(),
                owner_references: controller_ref(&parent).map(|owner| vec![owner]),
                ..Default::default()
            },
            spec: Some(pod_spec),
            status: None,
        };
        update_identity(&parent, &id, &mut pod)?;
        let pvcs = build_pvcs(&parent, &id);

        Ok(Self { pod, pvcs, event, id, parent })
    }

    /// Build a control block around an observed pod of the pet with the given ordinal.
    pub fn observed(id: impl Into<String>, parent: Arc<StatefulSet>, event: PetEvent, pod: Pod) -> SyncResult<Self> {
        let id = id.into();
        validate(&parent, &id)?;
        let pvcs = build_pvcs(&parent, &id);
        Ok(Self { pod, pvcs, event, id, parent })
    }

    /// Create a copy of this control block carrying the given pod in place of its own.
    pub fn with_pod(&self, pod: Pod) -> Self {
        Self {
            pod,
            pvcs: self.pvcs.clone(),
            event: self.event,
            id: self.id.clone(),
            parent: self.parent.clone(),
        }
    }

    /// The lifecycle intent of this control block.
    pub fn event(&self) -> PetEvent {
        self.event
    }

    /// The ordinal id of this pet.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The StatefulSet owning this pet.
    pub fn parent(&self) -> &StatefulSet {
        &self.parent
    }

    /// The name of this pet's pod.
    pub fn name(&self) -> &str {
        self.pod.metadata.name.as_deref().unwrap_or_default()
    }

    /// The namespace of this pet's pod, falling back to the parent's namespace.
    pub fn namespace(&self) -> &str {
        self.pod
            .metadata
            .namespace
            .as_deref()
            .or_else(|| self.parent.metadata.namespace.as_deref())
            .unwrap_or("default")
    }

    /// The name of the owning StatefulSet.
    pub fn parent_name(&self) -> &str {
        self.parent.metadata.name.as_deref().unwrap_or_default()
    }
}

/// Build the claims of the pet with the given ordinal from the parent's volume claim templates.
fn build_pvcs(parent: &StatefulSet, id: &str) -> Vec<PersistentVolumeClaim> {
    let spec = match parent.spec.as_ref() {
        Some(spec) => spec,
        None => return vec![],
    };
    let labels = spec.selector.match_labels.clone();
    spec.volume_claim_templates
        .iter()
        .flatten()
        .filter_map(|template| {
            let template_name = template.metadata.name.as_deref()?;
            let mut pvc = template.clone();
            pvc.metadata = ObjectMeta {
                name: Some(claim_name(template_name, parent, id)),
                namespace: parent.metadata.namespace.clone(),
                labels: labels.clone(),
                annotations: template.metadata.annotations.clone(),
                ..Default::default()
            };
            pvc.status = None;
            Some(pvc)
        })
        .collect()
}

/// Build the controller owner reference pointing at the given parent, if it has been persisted.
fn controller_ref(parent: &StatefulSet) -> Option<OwnerReference> {
    Some(OwnerReference {
        api_version: "apps/v1".into(),
        kind: "StatefulSet".into(),
        name: parent.metadata.name.clone()?,
        uid: parent.metadata.uid.clone()?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}
