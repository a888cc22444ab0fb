//! Identity mappers.
//!
//! Each mapper owns one dimension of a pet's stable identity. A mapper can read that dimension
//! off of a pod as an opaque token, and can write the dimension onto a pod given the pet's
//! ordinal. Two pods are identity-equivalent when every mapper yields the same token for both.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{PersistentVolumeClaimVolumeSource, Pod, Volume};

use crate::error::{SyncError, SyncResult};

/// The annotation stamped onto each pet recording the parent's desired replica count.
pub const ANNOTATION_PETSET_REPLICAS: &str = "pod.alpha.kubernetes.io/petset-replicas";

/// A rule which derives and enforces one dimension of a pet's identity from its ordinal.
pub trait IdentityMapper {
    /// The name of this mapper, used for logging.
    fn name(&self) -> &'static str;

    /// Read this mapper's identity token off of the given pod.
    fn identity(&self, pod: &Pod) -> String;

    /// Write this mapper's identity for the given ordinal onto the given pod.
    fn set_identity(&self, id: &str, pod: &mut Pod);
}

/// Build the full set of identity mappers for the given parent.
pub fn new_identity_mappers(parent: &StatefulSet) -> Vec<Box<dyn IdentityMapper + '_>> {
    vec![
        Box::new(NameIdentityMapper { parent }),
        Box::new(NetworkIdentityMapper { parent }),
        Box::new(VolumeIdentityMapper { parent }),
    ]
}

/// Reconcile the identity of the observed pod with that of the desired pod.
///
/// Returns `true` if the observed pod was mutated toward the desired identity, in which case it
/// must be written back to the remote store. Returns `false` if no mutation is needed.
pub fn reconcile_identity(parent: &StatefulSet, id: &str, observed: &mut Pod, desired: &Pod) -> SyncResult<bool> {
    validate(parent, id)?;
    let mappers = new_identity_mappers(parent);
    let violated: Vec<_> = mappers
        .iter()
        .filter(|mapper| mapper.identity(observed) != mapper.identity(desired))
        .collect();
    if violated.is_empty() && replicas_annotation(observed) == Some(desired_replicas(parent)) {
        return Ok(false);
    }

    for mapper in violated {
        tracing::debug!(mapper = mapper.name(), pet = %pet_name(parent, id), "pet identity violated");
        mapper.set_identity(id, observed);
    }
    stamp_replicas(parent, observed);
    Ok(true)
}

/// Write every dimension of identity for the given ordinal onto the given pod.
pub fn update_identity(parent: &StatefulSet, id: &str, pod: &mut Pod) -> SyncResult<()> {
    validate(parent, id)?;
    for mapper in new_identity_mappers(parent) {
        mapper.set_identity(id, pod);
    }
    stamp_replicas(parent, pod);
    Ok(())
}

/// Ensure the given parent & ordinal are usable for identity derivation.
pub fn validate(parent: &StatefulSet, id: &str) -> SyncResult<()> {
    if parent.metadata.name.as_deref().unwrap_or_default().is_empty() {
        return Err(SyncError::InvalidArgument("parent StatefulSet has no name".into()));
    }
    if parent.spec.is_none() {
        return Err(SyncError::InvalidArgument(format!(
            "parent StatefulSet {} has no spec",
            parent.metadata.name.as_deref().unwrap_or_default()
        )));
    }
    if id.is_empty() {
        return Err(SyncError::InvalidArgument("pet ordinal id is empty".into()));
    }
    Ok(())
}

/// The desired replica count of the given parent, which defaults to 1 when unset.
pub fn desired_replicas(parent: &StatefulSet) -> i32 {
    parent.spec.as_ref().and_then(|spec| spec.replicas).unwrap_or(1)
}

/// The replica count stamped on the given pod, if present and numeric.
pub fn replicas_annotation(pod: &Pod) -> Option<i32> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(ANNOTATION_PETSET_REPLICAS))
        .and_then(|val| val.parse().ok())
}

/// Stamp the parent's desired replica count onto the given pod.
pub fn stamp_replicas(parent: &StatefulSet, pod: &mut Pod) {
    pod.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(ANNOTATION_PETSET_REPLICAS.into(), desired_replicas(parent).to_string());
}

/// The name of the pet with the given ordinal, `<set>-<ordinal>`.
pub fn pet_name(parent: &StatefulSet, id: &str) -> String {
    format!("{}-{}", parent.metadata.name.as_deref().unwrap_or_default(), id)
}

/// The name of the claim built from the given template for the pet with the given ordinal.
pub fn claim_name(template: &str, parent: &StatefulSet, id: &str) -> String {
    format!("{}-{}", template, pet_name(parent, id))
}

/// Parse the ordinal of the given pod, if it is named as a member of the given parent.
pub fn ordinal_of(parent: &StatefulSet, pod: &Pod) -> Option<u32> {
    let prefix = format!("{}-", parent.metadata.name.as_deref()?);
    pod.metadata
        .name
        .as_deref()?
        .strip_prefix(prefix.as_str())
        .and_then(|suffix| {
            // Only canonical ordinals, so that `web-03` is never mistaken for `web-3`.
            let ordinal: u32 = suffix.parse().ok()?;
            (ordinal.to_string() == suffix).then(|| ordinal)
        })
}

//////////////////////////////////////////////////////////////////////////////
// Name Identity /////////////////////////////////////////////////////////////

/// Owns the pod's name & namespace.
pub struct NameIdentityMapper<'a> {
    parent: &'a StatefulSet,
}

impl<'a> IdentityMapper for NameIdentityMapper<'a> {
    fn name(&self) -> &'static str {
        "name"
    }

    fn identity(&self, pod: &Pod) -> String {
        pod.metadata.name.clone().unwrap_or_default()
    }

    fn set_identity(&self, id: &str, pod: &mut Pod) {
        pod.metadata.name = Some(pet_name(self.parent, id));
        pod.metadata.namespace = self.parent.metadata.namespace.clone();
    }
}

//////////////////////////////////////////////////////////////////////////////
// Network Identity //////////////////////////////////////////////////////////

/// Owns the pod's hostname & subdomain, which together form its stable DNS identity under the
/// set's governing service.
pub struct NetworkIdentityMapper<'a> {
    parent: &'a StatefulSet,
}

impl<'a> IdentityMapper for NetworkIdentityMapper<'a> {
    fn name(&self) -> &'static str {
        "network"
    }

    fn identity(&self, pod: &Pod) -> String {
        let (hostname, subdomain) = pod
            .spec
            .as_ref()
            .map(|spec| (spec.hostname.as_deref().unwrap_or_default(), spec.subdomain.as_deref().unwrap_or_default()))
            .unwrap_or_default();
        format!("{}.{}", hostname, subdomain)
    }

    fn set_identity(&self, id: &str, pod: &mut Pod) {
        let service_name = self.parent.spec.as_ref().map(|spec| spec.service_name.clone());
        let spec = pod.spec.get_or_insert_with(Default::default);
        spec.hostname = Some(pet_name(self.parent, id));
        spec.subdomain = service_name;
    }
}

//////////////////////////////////////////////////////////////////////////////
// Volume Identity ///////////////////////////////////////////////////////////

/// Owns the pod's bindings to the claims built from the set's volume claim templates.
pub struct VolumeIdentityMapper<'a> {
    parent: &'a StatefulSet,
}

impl<'a> VolumeIdentityMapper<'a> {
    fn template_names(&self) -> impl Iterator<Item = &'a str> {
        let parent: &'a StatefulSet = self.parent;
        parent
            .spec
            .as_ref()
            .and_then(|spec| spec.volume_claim_templates.as_ref())
            .into_iter()
            .flatten()
            .filter_map(|template| template.metadata.name.as_deref())
    }
}

impl<'a> IdentityMapper for VolumeIdentityMapper<'a> {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn identity(&self, pod: &Pod) -> String {
        let templates: Vec<_> = self.template_names().collect();
        let mut bindings: Vec<_> = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.volumes.as_ref())
            .into_iter()
            .flatten()
            .filter(|vol| templates.contains(&vol.name.as_str()))
            .filter_map(|vol| {
                vol.persistent_volume_claim
                    .as_ref()
                    .map(|claim| format!("{}:{}", vol.name, claim.claim_name))
            })
            .collect();
        bindings.sort();
        bindings.join(",")
    }

    fn set_identity(&self, id: &str, pod: &mut Pod) {
        let volumes = pod.spec.get_or_insert_with(Default::default).volumes.get_or_insert_with(Default::default);
        for template in self.template_names() {
            let volume = Volume {
                name: template.into(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: claim_name(template, self.parent, id),
                    read_only: None,
                }),
                ..Default::default()
            };
            match volumes.iter_mut().find(|vol| vol.name == template) {
                Some(existing) => *existing = volume,
                None => volumes.push(volume),
            }
        }
    }
}
