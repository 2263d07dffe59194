//! Error types for the sync engine.

use thiserror::Error;
use vaultkv_core::StoreError;
use vaultkv_remote::RemoteError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local ledger failure while applying or reading records.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A remote operation failed for one key.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Bulk sync completed but some keys failed to reconcile.
    #[error("replication finished with {failures} failed key(s)")]
    Replication {
        /// Number of keys whose sync failed.
        failures: usize,
    },

    /// Another sync pass is already running on this engine.
    #[error("already replicating")]
    AlreadyReplicating,
}

impl SyncError {
    /// Returns true when the error is the reentrancy guard.
    #[must_use]
    pub fn is_already_replicating(&self) -> bool {
        matches!(self, Self::AlreadyReplicating)
    }
}
