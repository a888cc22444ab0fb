//! The boundary between the reconciliation engine and the remote store.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;

use crate::error::{SyncError, SyncResult};
use crate::pet::identity::reconcile_identity;
use crate::pet::PetControlBlock;

/// Event reason suffix for creates.
pub const EVENT_KIND_CREATE: &str = "Create";
/// Event reason suffix for updates.
pub const EVENT_KIND_UPDATE: &str = "Update";
/// Event reason suffix for deletes.
pub const EVENT_KIND_DELETE: &str = "Delete";

/// A client capable of reading & mutating pets in the remote store.
///
/// Not-found is never an error for `get` or `delete`.
#[async_trait]
pub trait PetClient: Send + Sync {
    /// Fetch the observed state of the given pet, `None` if it does not exist.
    async fn get(&self, pet: &PetControlBlock) -> SyncResult<Option<PetControlBlock>>;

    /// Create the given pet.
    async fn create(&self, pet: &PetControlBlock) -> SyncResult<()>;

    /// Delete the given pet.
    async fn delete(&self, pet: &PetControlBlock) -> SyncResult<()>;

    /// Converge the observed pet onto the identity of the desired pet.
    async fn update(&self, observed: &PetControlBlock, desired: &PetControlBlock) -> SyncResult<()>;

    /// Create any of the given pet's claims which do not yet exist. Claims are never deleted here.
    async fn sync_pvcs(&self, pet: &PetControlBlock) -> SyncResult<()>;

    /// Delete all of the given pet's claims.
    async fn delete_pvcs(&self, pet: &PetControlBlock) -> SyncResult<()>;
}

/// The narrow pod store used by the update loop.
#[async_trait]
pub trait PodStore: Send + Sync {
    /// Fetch the target pod, `None` if it does not exist.
    async fn get_pod(&self, namespace: &str, name: &str) -> SyncResult<Option<Pod>>;

    /// Submit the given pod as an update, returning the stored result.
    async fn update_pod(&self, pod: &Pod) -> SyncResult<Pod>;
}

/// A sink for outcome events, recorded against the owning StatefulSet.
///
/// Recording is fire-and-forget and must never block or fail the calling operation.
pub trait EventRecorder: Send + Sync {
    /// Record an outcome of the given kind, a failure if `err` is given.
    fn record(&self, parent: &StatefulSet, kind: &str, message: &str, err: Option<&SyncError>);
}

/// Converge `observed` onto the identity of `desired`, retrying rejected updates.
///
/// Each attempt runs the identity check against the current copy of the pod. If no mutation is
/// needed the call succeeds without writing. A rejected update is followed by a re-fetch of the
/// latest pod & another attempt, for at most `retries + 1` submissions in total. The outcome of
/// the final submission is returned as is. A failed re-fetch aborts immediately.
pub async fn update_with_retry<S>(store: &S, observed: &PetControlBlock, desired: &PetControlBlock, retries: u32) -> SyncResult<()>
where
    S: PodStore + ?Sized,
{
    let (namespace, name) = (observed.namespace(), observed.name());
    let mut pod = observed.pod.clone();
    let mut attempt = 0;
    loop {
        if !reconcile_identity(desired.parent(), desired.id(), &mut pod, &desired.pod)? {
            return Ok(());
        }
        let err = match store.update_pod(&pod).await {
            Ok(_) => return Ok(()),
            Err(err) if attempt >= retries => return Err(err),
            Err(err) => err,
        };
        attempt += 1;
        tracing::debug!(error = %err, pet = name, attempt, "pet update rejected, re-fetching");
        pod = match store.get_pod(namespace, name).await? {
            Some(pod) => pod,
            None => return Err(anyhow::anyhow!("pet {}/{} vanished while updating", namespace, name).into()),
        };
    }
}
