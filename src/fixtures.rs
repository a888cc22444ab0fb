use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{Container, PersistentVolumeClaim, Pod, PodCondition, PodSpec, PodStatus, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, Time};
use maplit::btreemap;

use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::pet::client::{update_with_retry, PetClient, PodStore};
use crate::pet::health::ANNOTATION_PET_INITIALIZED;
use crate::pet::{PetControlBlock, PetEvent};

/// Build a StatefulSet with one volume claim template named `data`.
pub fn new_statefulset(name: &str, replicas: i32) -> StatefulSet {
    let labels = btreemap! { "app".to_string() => name.to_string() };
    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some("default".into()),
            uid: Some(format!("{}-uid", name)),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            service_name: format!("{}-svc", name),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "app".into(),
                        image: Some("nginx".into()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta { name: Some("data".into()), ..Default::default() },
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Build the desired control block of the given ordinal.
pub fn new_pet(parent: &Arc<StatefulSet>, id: u32) -> PetControlBlock {
    PetControlBlock::new(id.to_string(), parent.clone(), PetEvent::Sync).expect("error building pet control block")
}

/// Mark the given pod as running, ready & initialized.
pub fn make_healthy(mut pod: Pod) -> Pod {
    pod.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(ANNOTATION_PET_INITIALIZED.into(), "true".into());
    pod.status = Some(PodStatus {
        phase: Some("Running".into()),
        conditions: Some(vec![PodCondition {
            type_: "Ready".into(),
            status: "True".into(),
            ..Default::default()
        }]),
        ..Default::default()
    });
    pod
}

/// Set the phase of the given pod.
pub fn with_phase(mut pod: Pod, phase: &str) -> Pod {
    pod.status.get_or_insert_with(Default::default).phase = Some(phase.into());
    pod
}

/// Mark the given pod as being deleted.
pub fn make_dying(mut pod: Pod) -> Pod {
    pod.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
    pod
}

/// The recorded state of a `FakePetClient`.
#[derive(Debug, Default)]
pub struct FakeState {
    /// Stored pods by name.
    pub pods: BTreeMap<String, Pod>,
    /// Stored PVCs by name.
    pub pvcs: BTreeMap<String, PersistentVolumeClaim>,

    /// Names of pets for which create was called.
    pub creates: Vec<String>,
    /// Names of pets for which delete was called.
    pub deletes: Vec<String>,
    /// Names of PVCs for which create was called.
    pub pvc_creates: Vec<String>,
    /// Names of PVCs for which delete was called.
    pub pvc_deletes: Vec<String>,
    /// The number of pod update submissions.
    pub update_submissions: usize,
    /// The number of pod re-fetches made by the update loop.
    pub refetches: usize,

    /// The number of upcoming pod updates to reject as conflicts.
    pub reject_updates: usize,
    /// Reject all pod re-fetches.
    pub fail_refetch: bool,
    /// Reject all pet fetches.
    pub fail_get: bool,
    /// Reject all pet creates.
    pub fail_create: bool,
    /// PVC names whose creation is rejected.
    pub fail_pvcs: BTreeSet<String>,
    /// PVC names whose deletion is rejected.
    pub fail_pvc_deletes: BTreeSet<String>,
}

impl FakeState {
    /// The total number of mutating calls made against pets.
    pub fn pet_mutations(&self) -> usize {
        self.creates.len() + self.deletes.len() + self.update_submissions
    }
}

/// An in-memory pet client.
#[derive(Debug)]
pub struct FakePetClient {
    state: Mutex<FakeState>,
    config: Arc<Config>,
}

impl FakePetClient {
    /// Create a new instance holding the given pods.
    pub fn new(pods: Vec<Pod>) -> Self {
        let mut state = FakeState::default();
        for pod in pods {
            state.pods.insert(pod.metadata.name.clone().unwrap_or_default(), pod);
        }
        Self {
            state: Mutex::new(state),
            config: Arc::new(Config::new_test()),
        }
    }

    /// Access the state of this client.
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake client state poisoned")
    }
}

#[async_trait]
impl PodStore for FakePetClient {
    async fn get_pod(&self, _namespace: &str, name: &str) -> SyncResult<Option<Pod>> {
        let mut state = self.state();
        state.refetches += 1;
        if state.fail_refetch {
            return Err(anyhow::anyhow!("error fetching pod {}", name).into());
        }
        Ok(state.pods.get(name).cloned())
    }

    async fn update_pod(&self, pod: &Pod) -> SyncResult<Pod> {
        let mut state = self.state();
        state.update_submissions += 1;
        if state.reject_updates > 0 {
            state.reject_updates -= 1;
            return Err(anyhow::anyhow!("conflict {}: the object has been modified", state.update_submissions).into());
        }
        let name = pod.metadata.name.clone().unwrap_or_default();
        state.pods.insert(name, pod.clone());
        Ok(pod.clone())
    }
}

#[async_trait]
impl PetClient for FakePetClient {
    async fn get(&self, pet: &PetControlBlock) -> SyncResult<Option<PetControlBlock>> {
        let state = self.state();
        if state.fail_get {
            return Err(anyhow::anyhow!("error fetching pet {}", pet.name()).into());
        }
        Ok(state.pods.get(pet.name()).map(|pod| pet.with_pod(pod.clone())))
    }

    async fn create(&self, pet: &PetControlBlock) -> SyncResult<()> {
        let mut state = self.state();
        state.creates.push(pet.name().into());
        if state.fail_create {
            return Err(anyhow::anyhow!("error creating pet {}", pet.name()).into());
        }
        state.pods.insert(pet.name().into(), pet.pod.clone());
        Ok(())
    }

    async fn delete(&self, pet: &PetControlBlock) -> SyncResult<()> {
        let mut state = self.state();
        state.deletes.push(pet.name().into());
        state.pods.remove(pet.name());
        Ok(())
    }

    async fn update(&self, observed: &PetControlBlock, desired: &PetControlBlock) -> SyncResult<()> {
        update_with_retry(self, observed, desired, self.config.update_retries).await
    }

    async fn sync_pvcs(&self, pet: &PetControlBlock) -> SyncResult<()> {
        let mut state = self.state();
        let mut errors = vec![];
        for pvc in pet.pvcs.iter() {
            let name = pvc.metadata.name.clone().unwrap_or_default();
            if state.pvcs.contains_key(&name) {
                continue;
            }
            state.pvc_creates.push(name.clone());
            if state.fail_pvcs.contains(&name) {
                errors.push(format!("failed to create pvc {}.", name));
                continue;
            }
            state.pvcs.insert(name, pvc.clone());
        }
        if !errors.is_empty() {
            return Err(SyncError::AggregateClaim(errors));
        }
        Ok(())
    }

    async fn delete_pvcs(&self, pet: &PetControlBlock) -> SyncResult<()> {
        let mut state = self.state();
        let mut errors = vec![];
        for pvc in pet.pvcs.iter() {
            let name = pvc.metadata.name.clone().unwrap_or_default();
            state.pvc_deletes.push(name.clone());
            if state.fail_pvc_deletes.contains(&name) {
                errors.push(format!("failed to delete pvc {}.", name));
                continue;
            }
            state.pvcs.remove(&name);
        }
        if !errors.is_empty() {
            return Err(SyncError::AggregateClaim(errors));
        }
        Ok(())
    }
}
