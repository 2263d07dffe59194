//! Conflict resolution.
//!
//! [`resolve`] is a pure decision function: given the local and remote
//! state of one key it decides whether to push, pull, record the remote
//! version, or do nothing. It performs no I/O; the engine executes the
//! returned action.
//!
//! The strategy is last-write-wins by timestamp. Data loss is possible in
//! principle, but a sync pass runs before local modifications in normal
//! operation and write concurrency is low, so the tie-break rule is kept
//! simple: the local side wins when its timestamp is greater than or equal
//! to the remote one.

use vaultkv_remote::{RemoteError, RemoteKeyState, RemoteStatus};

/// Local state of a key as the resolver sees it.
///
/// A locally missing key is represented as version 0 with epoch timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalState {
    /// Current local version (0 when the key does not exist locally).
    pub version: u64,
    /// Timestamp of the current local row.
    pub timestamp_ms: u64,
    /// Local tombstone marker.
    pub deleted: bool,
    /// Remote version recorded on the current local row.
    pub recorded_remote_version: u64,
}

/// The action the engine must take to reconcile one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Versions already match; nothing to do.
    AlreadyInSync,
    /// Both sides are tombstoned; just record the remote version locally.
    RecordRemoteVersion {
        /// The remote version to record.
        remote_version: u64,
    },
    /// Local is newer and live: push the local value.
    PushPut {
        /// The expected version to present to the remote put.
        use_version: u64,
    },
    /// Local is newer and deleted: delete the key remotely.
    PushDelete {
        /// The expected version to present to the remote delete.
        remote_version: u64,
    },
    /// Remote is newer and live: fetch and apply the remote value.
    PullGet {
        /// The remote version to fetch.
        remote_version: u64,
    },
    /// Remote is newer and deleted: tombstone the key locally.
    PullDelete {
        /// The remote version to record after the local delete.
        remote_version: u64,
    },
    /// The remote state cannot be reconciled.
    Fail(RemoteError),
}

/// Decides how to reconcile one key.
pub fn resolve(local: LocalState, remote: RemoteKeyState) -> SyncAction {
    // Fast path: the remote version recorded on the current local row
    // matches what the server just reported, so the key is reconciled.
    if remote.status != RemoteStatus::NotFound
        && remote.version > 0
        && local.recorded_remote_version == remote.version
    {
        return SyncAction::AlreadyInSync;
    }

    match remote.status {
        RemoteStatus::Ok | RemoteStatus::Tombstone | RemoteStatus::NotFound => {}
        RemoteStatus::Conflict => return SyncAction::Fail(RemoteError::Conflict),
        RemoteStatus::Unknown => return SyncAction::Fail(RemoteError::Unknown),
    }

    if local.deleted && remote.status == RemoteStatus::Tombstone {
        return SyncAction::RecordRemoteVersion {
            remote_version: remote.version,
        };
    }

    // A missing remote key has no meaningful timestamp; treat it as epoch
    // so the local side wins and the key gets pushed.
    let remote_ts = if remote.status == RemoteStatus::NotFound {
        0
    } else {
        remote.timestamp_ms
    };

    if local.timestamp_ms >= remote_ts {
        if local.deleted {
            SyncAction::PushDelete {
                remote_version: remote.version,
            }
        } else {
            // A remote version of 0 means the server does not have the key
            // yet; a remote version behind what we last recorded means the
            // server regressed. Either way present version 1 to force a
            // create.
            let use_version =
                if remote.version == 0 || remote.version < local.recorded_remote_version {
                    1
                } else {
                    remote.version
                };
            SyncAction::PushPut { use_version }
        }
    } else if remote.status == RemoteStatus::Tombstone {
        SyncAction::PullDelete {
            remote_version: remote.version,
        }
    } else {
        SyncAction::PullGet {
            remote_version: remote.version,
        }
    }
}
