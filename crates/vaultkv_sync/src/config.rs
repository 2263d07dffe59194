//! Configuration for the sync engine.

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of concurrent remote round-trips during bulk sync.
    pub max_in_flight: usize,
    /// Encrypt payloads sent to (and decrypt payloads received from) the
    /// remote service. Default on; turn off only for tests that need to
    /// inspect replicated bytes.
    pub encrypted_replication: bool,
    /// Replicate a key right after `set`/`del` through the engine.
    ///
    /// Off by default: only one sync pass can run at a time, so rapid
    /// writes would mostly fail with `AlreadyReplicating`.
    pub sync_immediately: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 10,
            encrypted_replication: true,
            sync_immediately: false,
        }
    }
}

impl SyncConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bulk-sync concurrency bound.
    ///
    /// Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Sets replication payload encryption.
    #[must_use]
    pub fn with_encrypted_replication(mut self, encrypted: bool) -> Self {
        self.encrypted_replication = encrypted;
        self
    }

    /// Sets replicate-on-write behavior.
    #[must_use]
    pub fn with_sync_immediately(mut self, sync_immediately: bool) -> Self {
        self.sync_immediately = sync_immediately;
        self
    }
}
