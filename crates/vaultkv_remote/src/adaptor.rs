//! Remote adaptor contract.

use crate::error::{RemoteError, RemoteStatus};
use async_trait::async_trait;

/// Version and timestamp returned by remote mutations and reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteHead {
    /// The server's version for the key.
    pub version: u64,
    /// The server's last-modified time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

/// The state of one key as observed from a version check.
///
/// Unlike [`RemoteHead`], this carries a status: a tombstoned or missing
/// key still reports the version and timestamp the server knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteKeyState {
    /// The server's version for the key (0 when absent).
    pub version: u64,
    /// The server's last-modified time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// How the server reported the key.
    pub status: RemoteStatus,
}

impl RemoteKeyState {
    /// A state representing an uninterpretable response.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            version: 0,
            timestamp_ms: 0,
            status: RemoteStatus::Unknown,
        }
    }
}

/// One entry of the server's full key listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteKeyInfo {
    /// Key name.
    pub key: String,
    /// The server's version for the key.
    pub version: u64,
    /// The server's last-modified time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// `Ok` for live keys, `Tombstone` for deleted ones.
    pub status: RemoteStatus,
}

/// Contract for a remote key-value service using optimistic locking.
///
/// Every mutation presents the version the caller believes is current;
/// the server rejects stale writes with [`RemoteError::Conflict`]. All
/// operations are asynchronous, and implementations must be shareable
/// across concurrent per-key sync tasks.
#[async_trait]
pub trait RemoteAdaptor: Send + Sync {
    /// Fetches the version of a key without its data.
    ///
    /// Never fails: transport errors are reported as a state with
    /// [`RemoteStatus::Unknown`].
    async fn ver(&self, key: &str) -> RemoteKeyState;

    /// Saves a new version of a key.
    ///
    /// `expected_version` is the current remote version, or 1 to create
    /// the key on a server that does not have it yet.
    async fn put(
        &self,
        key: &str,
        value: &[u8],
        expected_version: u64,
    ) -> Result<RemoteHead, RemoteError>;

    /// Marks a key as deleted on the server.
    async fn del(&self, key: &str, expected_version: u64) -> Result<RemoteHead, RemoteError>;

    /// Fetches a key's data at the expected version (0 for the newest).
    async fn get(
        &self,
        key: &str,
        expected_version: u64,
    ) -> Result<(RemoteHead, Vec<u8>), RemoteError>;

    /// Fetches the full listing of keys on the server, tombstones included.
    async fn keys(&self) -> Result<Vec<RemoteKeyInfo>, RemoteError>;
}
