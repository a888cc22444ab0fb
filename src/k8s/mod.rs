//! Kubernetes backed pet client.
//!
//! All calls are made directly against the K8s API, each bounded by the configured API timeout.
//! Pods are updated with optimistic concurrency: an update carrying a stale resource version is
//! rejected by the API server, and the update loop re-fetches & retries.

mod events;

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::{Api, PostParams};
use kube::client::Client;
use tokio::time::timeout;

pub use events::K8sEventRecorder;

use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::pet::client::{update_with_retry, EventRecorder, PetClient, PodStore, EVENT_KIND_CREATE, EVENT_KIND_DELETE, EVENT_KIND_UPDATE};
use crate::pet::PetControlBlock;

/// A pet client talking to the K8s API.
pub struct K8sPetClient {
    /// K8s client.
    client: Client,
    /// Runtime config.
    config: Arc<Config>,
    /// The sink for outcome events.
    recorder: Arc<dyn EventRecorder>,
}

impl K8sPetClient {
    /// Create a new instance.
    pub fn new(client: Client, config: Arc<Config>, recorder: Arc<dyn EventRecorder>) -> Self {
        Self { client, config, recorder }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pvcs(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Fetch the target PVC, `None` if it does not exist.
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_pvc(&self, namespace: &str, name: &str) -> SyncResult<Option<PersistentVolumeClaim>> {
        let res = timeout(self.config.api_timeout(), self.pvcs(namespace).get(name))
            .await
            .context("timeout while fetching PVC")?;
        match res {
            Ok(pvc) => Ok(Some(pvc)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err).context("error fetching PVC").map_err(SyncError::from),
        }
    }

    /// Create the given PVC, treating an already existing PVC as success.
    #[tracing::instrument(level = "debug", skip(self, pvc))]
    async fn create_pvc(&self, namespace: &str, pvc: &PersistentVolumeClaim) -> SyncResult<()> {
        if let Some(name) = pvc.metadata.name.as_ref() {
            tracing::info!(%name, "creating PVC");
        }
        let res = timeout(self.config.api_timeout(), self.pvcs(namespace).create(&PostParams::default(), pvc))
            .await
            .context("timeout while creating PVC")?;
        match res {
            Ok(_) => Ok(()),
            Err(err) if is_already_exists(&err) => Ok(()),
            Err(err) => Err(err).context("error creating PVC").map_err(SyncError::from),
        }
    }

    /// Delete the target PVC, treating an absent PVC as success.
    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_pvc(&self, namespace: &str, name: &str) -> SyncResult<()> {
        tracing::info!(name, "deleting PVC");
        let res = timeout(self.config.api_timeout(), self.pvcs(namespace).delete(name, &Default::default()))
            .await
            .context("timeout while deleting PVC")?;
        match res {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(err).context("error deleting PVC").map_err(SyncError::from),
        }
    }

    /// Record the outcome of an operation against the pet's parent.
    fn event<T>(&self, pet: &PetControlBlock, kind: &str, message: String, res: &SyncResult<T>) {
        self.recorder.record(pet.parent(), kind, &message, res.as_ref().err());
    }
}

#[async_trait]
impl PodStore for K8sPetClient {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_pod(&self, namespace: &str, name: &str) -> SyncResult<Option<Pod>> {
        let res = timeout(self.config.api_timeout(), self.pods(namespace).get(name))
            .await
            .context("timeout while fetching pod")?;
        match res {
            Ok(pod) => Ok(Some(pod)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err).context("error fetching pod").map_err(SyncError::from),
        }
    }

    #[tracing::instrument(level = "debug", skip(self, pod))]
    async fn update_pod(&self, pod: &Pod) -> SyncResult<Pod> {
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        tracing::info!(name, "updating pod");
        timeout(self.config.api_timeout(), self.pods(namespace).replace(name, &PostParams::default(), pod))
            .await
            .context("timeout while updating pod")?
            .context("error updating pod")
            .map_err(SyncError::from)
    }
}

#[async_trait]
impl PetClient for K8sPetClient {
    async fn get(&self, pet: &PetControlBlock) -> SyncResult<Option<PetControlBlock>> {
        let pod = self.get_pod(pet.namespace(), pet.name()).await?;
        Ok(pod.map(|pod| pet.with_pod(pod)))
    }

    #[tracing::instrument(level = "debug", skip(self, pet), fields(pet = pet.name()))]
    async fn create(&self, pet: &PetControlBlock) -> SyncResult<()> {
        tracing::info!("creating pet");
        let res = timeout(self.config.api_timeout(), self.pods(pet.namespace()).create(&PostParams::default(), &pet.pod))
            .await
            .context("timeout while creating pod");
        let res = match res {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) if is_already_exists(&err) => {
                tracing::debug!("pet already exists");
                Ok(())
            }
            Ok(Err(err)) => Err(err).context("error creating pod").map_err(SyncError::from),
            Err(err) => Err(SyncError::from(err)),
        };
        self.event(pet, EVENT_KIND_CREATE, format!("pet: {}", pet.name()), &res);
        res
    }

    #[tracing::instrument(level = "debug", skip(self, pet), fields(pet = pet.name()))]
    async fn delete(&self, pet: &PetControlBlock) -> SyncResult<()> {
        tracing::info!("deleting pet");
        let res = timeout(self.config.api_timeout(), self.pods(pet.namespace()).delete(pet.name(), &Default::default()))
            .await
            .context("timeout while deleting pod");
        let res = match res {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) if is_not_found(&err) => Ok(()),
            Ok(Err(err)) => Err(err).context("error deleting pod").map_err(SyncError::from),
            Err(err) => Err(SyncError::from(err)),
        };
        self.event(pet, EVENT_KIND_DELETE, format!("pet: {}", pet.name()), &res);
        res
    }

    #[tracing::instrument(level = "debug", skip(self, observed, desired), fields(pet = observed.name()))]
    async fn update(&self, observed: &PetControlBlock, desired: &PetControlBlock) -> SyncResult<()> {
        let res = update_with_retry(self, observed, desired, self.config.update_retries).await;
        if res.is_err() {
            self.event(observed, EVENT_KIND_UPDATE, format!("pet: {}", observed.name()), &res);
        }
        res
    }

    #[tracing::instrument(level = "debug", skip(self, pet), fields(pet = pet.name()))]
    async fn sync_pvcs(&self, pet: &PetControlBlock) -> SyncResult<()> {
        let mut errors = vec![];
        for pvc in pet.pvcs.iter() {
            let name = pvc.metadata.name.as_deref().unwrap_or_default();
            match self.get_pvc(pet.namespace(), name).await {
                Ok(Some(_)) => continue,
                Ok(None) => (),
                Err(err) => {
                    errors.push(format!("error fetching pvc {}: {:#}.", name, err));
                    continue;
                }
            }
            let res = self.create_pvc(pet.namespace(), pvc).await;
            if let Err(err) = res.as_ref() {
                errors.push(format!("failed to create pvc {}: {:#}.", name, err));
            }
            self.event(pet, EVENT_KIND_CREATE, format!("pvc: {}", name), &res);
        }
        if !errors.is_empty() {
            return Err(SyncError::AggregateClaim(errors));
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, pet), fields(pet = pet.name()))]
    async fn delete_pvcs(&self, pet: &PetControlBlock) -> SyncResult<()> {
        let mut errors = vec![];
        for pvc in pet.pvcs.iter() {
            let name = pvc.metadata.name.as_deref().unwrap_or_default();
            let res = self.delete_pvc(pet.namespace(), name).await;
            if let Err(err) = res.as_ref() {
                errors.push(format!("failed to delete pvc {}: {:#}.", name, err));
            }
            self.event(pet, EVENT_KIND_DELETE, format!("pvc: {}", name), &res);
        }
        if !errors.is_empty() {
            return Err(SyncError::AggregateClaim(errors));
        }
        Ok(())
    }
}

/// Check if the given error is a K8s API `404 Not Found`.
fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(api_err) if api_err.code == http::StatusCode::NOT_FOUND)
}

/// Check if the given error is a K8s API `409 AlreadyExists`.
fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(api_err) if api_err.code == http::StatusCode::CONFLICT && api_err.reason == "AlreadyExists")
}
