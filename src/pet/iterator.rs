//! The ordered walk over a StatefulSet's pets, and the pass which drives a syncer with it.

use std::collections::VecDeque;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;

use crate::error::{SyncError, SyncResult};
use crate::pet::client::PetClient;
use crate::pet::health::{is_dying, is_healthy};
use crate::pet::identity::{desired_replicas, ordinal_of};
use crate::pet::syncer::PetSyncer;
use crate::pet::{PetControlBlock, PetEvent};

/// An iterator over the control blocks of one pass over a StatefulSet.
///
/// Yields `Sync` blocks for ordinals `0..replicas` in ascending order, followed by `Delete`
/// blocks for every observed pet at or above `replicas` in descending order. A control block
/// which can not be built is yielded as an error in its place.
pub struct PetSetIterator {
    parent: Arc<StatefulSet>,
    replicas: u32,
    next_ordinal: u32,
    deletions: VecDeque<(u32, Pod)>,
}

impl PetSetIterator {
    /// Create a new instance over the given parent & its observed pods.
    ///
    /// Pods which are not named as members of the parent are ignored.
    pub fn new(parent: Arc<StatefulSet>, pods: &[Pod]) -> Self {
        let replicas = desired_replicas(&parent).max(0) as u32;
        let mut deletions: Vec<_> = pods
            .iter()
            .filter_map(|pod| ordinal_of(&parent, pod).map(|ordinal| (ordinal, pod)))
            .filter(|(ordinal, _)| *ordinal >= replicas)
            .map(|(ordinal, pod)| (ordinal, pod.clone()))
            .collect();
        deletions.sort_by(|a, b| b.0.cmp(&a.0));
        deletions.dedup_by_key(|(ordinal, _)| *ordinal);
        Self {
            parent,
            replicas,
            next_ordinal: 0,
            deletions: deletions.into(),
        }
    }
}

impl Iterator for PetSetIterator {
    type Item = SyncResult<PetControlBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_ordinal < self.replicas {
            let id = self.next_ordinal.to_string();
            self.next_ordinal += 1;
            return Some(PetControlBlock::new(id, self.parent.clone(), PetEvent::Sync));
        }
        let (ordinal, pod) = self.deletions.pop_front()?;
        Some(PetControlBlock::observed(ordinal.to_string(), self.parent.clone(), PetEvent::Delete, pod))
    }
}

/// Find the lowest ordinal observed pet which is not healthy, or is dying.
///
/// Such a pet must resolve before any other ordinal of the set is created or deleted.
pub fn find_blocking_pet(parent: &Arc<StatefulSet>, pods: &[Pod]) -> SyncResult<Option<PetControlBlock>> {
    let replicas = desired_replicas(parent).max(0) as u32;
    let blocking = pods
        .iter()
        .filter_map(|pod| ordinal_of(parent, pod).map(|ordinal| (ordinal, pod)))
        .filter(|(_, pod)| !is_healthy(Some(*pod)) || is_dying(Some(*pod)))
        .min_by_key(|(ordinal, _)| *ordinal);
    let (ordinal, pod) = match blocking {
        Some(blocking) => blocking,
        None => return Ok(None),
    };
    let event = if ordinal < replicas { PetEvent::Sync } else { PetEvent::Delete };
    PetControlBlock::observed(ordinal.to_string(), parent.clone(), event, pod.clone()).map(Some)
}

/// The outcome of one pass over a StatefulSet.
#[derive(Debug, Default)]
pub struct PassOutcome {
    /// The number of pets which synced successfully during the pass.
    pub replicas: usize,
    /// The name of the pet blocking ordinal progress at the end of the pass, if any.
    pub blocking_pet: Option<String>,
    /// Whether any ordinal was refused because of the blocking pet.
    pub blocked: bool,
    /// All errors other than blocking encountered during the pass.
    pub errors: Vec<SyncError>,
}

impl PassOutcome {
    /// Check if the pass should be requeued.
    pub fn needs_requeue(&self) -> bool {
        self.blocked || !self.errors.is_empty()
    }
}

/// Run one pass over the given StatefulSet, syncing & deleting its pets in ordinal order.
///
/// Every ordinal is visited even after failures. The syncer starts out blocked on the lowest
/// observed pet which is unhealthy or dying. The syncer's blocking pet keeps later ordinals from
/// being created or deleted, while updates of existing pets still proceed.
#[tracing::instrument(level = "debug", skip(client, parent, pods), fields(statefulset = parent.metadata.name.as_deref().unwrap_or_default()))]
pub async fn sync_pet_set<C>(client: &C, parent: Arc<StatefulSet>, pods: &[Pod]) -> PassOutcome
where
    C: PetClient + ?Sized,
{
    tracing::debug!(pets = pods.len(), "syncing StatefulSet");
    let mut outcome = PassOutcome::default();
    let blocking_pet = match find_blocking_pet(&parent, pods) {
        Ok(blocking_pet) => blocking_pet,
        Err(err) => {
            tracing::error!(error = ?err, "error finding blocking pet");
            outcome.errors.push(err);
            None
        }
    };
    if let Some(blocking_pet) = blocking_pet.as_ref() {
        tracing::debug!(blocking_pet = blocking_pet.name(), "pass starts blocked on unhealthy pet");
    }
    let mut syncer = PetSyncer::with_blocking_pet(client, blocking_pet);
    for pet_res in PetSetIterator::new(parent, pods) {
        let pet = match pet_res {
            Ok(pet) => pet,
            Err(err) => {
                tracing::error!(error = ?err, "error building pet control block");
                outcome.errors.push(err);
                continue;
            }
        };
        let res = match pet.event() {
            PetEvent::Sync => syncer.sync(Some(&pet)).await.map(|_| outcome.replicas += 1),
            PetEvent::Delete => syncer.delete(Some(&pet)).await,
        };
        match res {
            Ok(()) => (),
            Err(err) if err.is_blocker() => outcome.blocked = true,
            Err(err) => {
                tracing::error!(error = ?err, pet = pet.name(), "error syncing pet");
                outcome.errors.push(err);
            }
        }
    }
    outcome.blocking_pet = syncer.into_blocking_pet().map(|pet| pet.name().to_string());
    if let Some(blocking_pet) = outcome.blocking_pet.as_deref() {
        tracing::info!(blocking_pet, "StatefulSet blocked from scaling on pet");
    }
    outcome
}
