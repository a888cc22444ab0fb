//! The PetSet replica reconciliation engine.
//!
//! This crate drives the ordered, identity-bearing pets of a StatefulSet toward their desired
//! spec. It is consumed by a higher-level set controller which owns the watch loop & work queue,
//! and which runs one pass of `pet::iterator::sync_pet_set` per reconcile of a set.

pub mod config;
pub mod error;
pub mod k8s;
pub mod pet;

#[cfg(test)]
mod fixtures;

pub use crate::config::Config;
pub use crate::error::{SyncError, SyncResult};
