//! Pet health classification.

use k8s_openapi::api::core::v1::Pod;

/// The annotation a pet must carry, set to `true`, before it is considered initialized.
pub const ANNOTATION_PET_INITIALIZED: &str = "pod.alpha.kubernetes.io/initialized";

/// The pod phase of a running pod.
pub const POD_PHASE_RUNNING: &str = "Running";
/// The pod phase of a pod which has terminated in failure.
pub const POD_PHASE_FAILED: &str = "Failed";

/// Check if the given pet is healthy, meaning it is safe to build further ordinals on it.
pub fn is_healthy(pod: Option<&Pod>) -> bool {
    let pod = match pod {
        Some(pod) => pod,
        None => return false,
    };
    if phase(pod) != Some(POD_PHASE_RUNNING) {
        return false;
    }

    let name = pod.metadata.name.as_deref().unwrap_or_default();
    let initialized = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(ANNOTATION_PET_INITIALIZED));
    match initialized.map(|val| val.parse::<bool>()) {
        Some(Ok(true)) => (),
        Some(Ok(false)) | None => {
            tracing::debug!(pet = name, "pet waiting on {} annotation", ANNOTATION_PET_INITIALIZED);
            return false;
        }
        Some(Err(err)) => {
            tracing::info!(pet = name, error = %err, "failed to parse {} annotation", ANNOTATION_PET_INITIALIZED);
            return false;
        }
    }

    is_ready(pod)
}

/// Check if the given pet is dying, meaning its deletion is in progress.
pub fn is_dying(pod: Option<&Pod>) -> bool {
    pod.map(|pod| pod.metadata.deletion_timestamp.is_some()).unwrap_or(false)
}

/// Check if the given pod is in the failed phase.
pub fn is_failed(pod: &Pod) -> bool {
    phase(pod) == Some(POD_PHASE_FAILED)
}

fn phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|status| status.phase.as_deref())
}

fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .into_iter()
        .flatten()
        .any(|cond| cond.type_ == "Ready" && cond.status == "True")
}
