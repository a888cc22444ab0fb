//! The pet syncer, which drives individual pets toward their desired state.
//!
//! ## Ordering
//! A syncer is built fresh for every pass over a set, and is handed each ordinal of the set in
//! turn. It tracks a single piece of state, the blocking pet: the most recent pet which is
//! unhealthy, or which was created or deleted during this pass. A pass seeds the syncer with the
//! lowest observed pet which is not yet healthy or is dying. Once a blocking pet is known, no
//! further ordinal of the set will be created or deleted during the pass. Updates of existing
//! pets are not blocked.
//!
//! The blocking pet is recorded before the outcome of the corresponding create or delete is
//! known. Creation is asynchronous, and a failed call may still have taken effect, so an
//! attempted create or delete is treated as in-flight until a later pass observes it healthy.

use crate::error::{SyncError, SyncResult};
use crate::pet::client::PetClient;
use crate::pet::health::{is_dying, is_failed, is_healthy};
use crate::pet::PetControlBlock;

/// A reconciler of individual pets, scoped to one pass over a set.
pub struct PetSyncer<'a, C: PetClient + ?Sized> {
    client: &'a C,
    /// The pet which must resolve before any further ordinal may be created or deleted.
    blocking_pet: Option<PetControlBlock>,
}

impl<'a, C: PetClient + ?Sized> PetSyncer<'a, C> {
    /// Create a new instance.
    pub fn new(client: &'a C) -> Self {
        Self { client, blocking_pet: None }
    }

    /// Create a new instance which starts out blocked on the given pet.
    pub fn with_blocking_pet(client: &'a C, blocking_pet: Option<PetControlBlock>) -> Self {
        Self { client, blocking_pet }
    }

    /// The pet currently blocking ordinal progress of this pass, if any.
    pub fn blocking_pet(&self) -> Option<&PetControlBlock> {
        self.blocking_pet.as_ref()
    }

    /// Consume this syncer, returning the pet blocking ordinal progress, if any.
    pub fn into_blocking_pet(self) -> Option<PetControlBlock> {
        self.blocking_pet
    }

    /// Sync the given pet, creating or updating it as needed.
    #[tracing::instrument(level = "debug", skip(self, pet), fields(pet = pet.map(|pet| pet.name()).unwrap_or_default()))]
    pub async fn sync(&mut self, pet: Option<&PetControlBlock>) -> SyncResult<()> {
        let pet = match pet {
            Some(pet) => pet,
            None => return Ok(()),
        };
        let real_pet = self.client.get(pet).await?;

        // Claims are created per pet so that a working set comes up as soon as possible, bounded
        // only by quota.
        self.client.sync_pvcs(pet).await?;

        if let Some(real_pet) = real_pet {
            // A failed pet is deleted so that it can be re-created under the same identity.
            if is_failed(&real_pet.pod) {
                tracing::info!(pet = real_pet.name(), namespace = real_pet.namespace(), "deleting failed pet");
                return self.client.delete(&real_pet).await;
            }
            if !is_healthy(Some(&real_pet.pod)) {
                tracing::info!(statefulset = pet.parent_name(), pet = real_pet.name(), "waiting on unhealthy pet");
            }
            return self.client.update(&real_pet, pet).await;
        }

        if let Some(blocking_pet) = self.blocking_pet.as_ref() {
            let msg = format!(
                "create of {} in StatefulSet {} blocked by unhealthy pet {}",
                pet.name(),
                pet.parent_name(),
                blocking_pet.name()
            );
            tracing::info!("{}", msg);
            return Err(SyncError::UnhealthyBlocker(msg));
        }

        // This counts as a create even if it fails. Ordinals are never skipped, as some pets may
        // assign a special role to earlier ordinals. An error here forces a requeue.
        self.blocking_pet = Some(pet.clone());
        self.client.create(pet).await
    }

    /// Delete the given pet, respecting ordinal ordering.
    #[tracing::instrument(level = "debug", skip(self, pet), fields(pet = pet.map(|pet| pet.name()).unwrap_or_default()))]
    pub async fn delete(&mut self, pet: Option<&PetControlBlock>) -> SyncResult<()> {
        let pet = match pet {
            Some(pet) => pet,
            None => return Ok(()),
        };
        let real_pet = match self.client.get(pet).await? {
            Some(real_pet) => real_pet,
            None => return Ok(()),
        };
        // A pet never blocks its own deletion.
        let blocked_by = self.blocking_pet.as_ref().filter(|blocking_pet| blocking_pet.name() != real_pet.name());
        if let Some(blocking_pet) = blocked_by {
            tracing::info!(
                statefulset = pet.parent_name(),
                pet = real_pet.name(),
                blocking_pet = blocking_pet.name(),
                "delete blocked by unhealthy pet"
            );
            return Ok(());
        }

        // This counts as a delete even if it fails. An error here forces a requeue.
        let dying = is_dying(Some(&real_pet.pod));
        self.blocking_pet = Some(real_pet);
        if dying {
            tracing::info!(statefulset = pet.parent_name(), pet = pet.name(), "waiting on pet to die");
            return Ok(());
        }
        tracing::info!(statefulset = pet.parent_name(), pet = pet.name(), namespace = pet.namespace(), "deleting pet");
        self.client.delete(pet).await
    }
}
