//! PetSet reconciliation error abstractions.

use thiserror::Error;

/// Reconciliation error variants.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A precondition of the call was violated. This is a bug in the caller and is never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// An earlier ordinal of the set is not yet safe to build past.
    ///
    /// This is not a failure. Callers should requeue the whole set without counting it as one.
    #[error("{0}")]
    UnhealthyBlocker(String),
    /// One or more storage claim operations failed.
    #[error("{}", .0.join(" "))]
    AggregateClaim(Vec<String>),
    /// A call against the remote store failed.
    #[error(transparent)]
    Remote(#[from] anyhow::Error),
}

impl SyncError {
    /// Check if this error only signals that progress is blocked on an earlier ordinal.
    pub fn is_blocker(&self) -> bool {
        matches!(self, Self::UnhealthyBlocker(_))
    }
}

/// A result type where the error is a `SyncError`.
pub type SyncResult<T> = ::std::result::Result<T, SyncError>;
