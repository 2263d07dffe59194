//! The sync engine.
//!
//! Orchestrates per-key and bulk synchronization of a [`LocalLedger`]
//! against a [`RemoteAdaptor`]. The engine owns no protocol decisions:
//! [`resolve`](crate::resolve) chooses the action for each key and the
//! engine executes it, recording the reconciled remote version back into
//! the ledger.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::resolver::{resolve, LocalState, SyncAction};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use vaultkv_core::{check_key, CryptoBox, LocalLedger, VersionStamp};
use vaultkv_remote::{RemoteAdaptor, RemoteError, RemoteKeyState, RemoteStatus};

/// Result of a completed bulk sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    /// Number of keys reconciled.
    pub keys: usize,
    /// Wall-clock duration of the pass.
    pub duration: Duration,
}

struct EngineInner<R> {
    ledger: Arc<LocalLedger>,
    remote: Arc<R>,
    crypto: Arc<CryptoBox>,
    config: SyncConfig,
    sync_running: AtomicBool,
}

/// Clears the reentrancy flag on every exit path.
struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The sync engine.
///
/// Construct with explicit dependencies and share freely; internal state
/// lives behind an [`Arc`].
///
/// Only one sync pass may run per engine at a time: a second caller
/// immediately receives [`SyncError::AlreadyReplicating`] instead of
/// being queued. Within a bulk pass, per-key syncs run concurrently
/// behind a bounded semaphore; remote races across keys are safe because
/// every remote mutation is version-checked.
pub struct SyncEngine<R> {
    inner: Arc<EngineInner<R>>,
}

impl<R> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RemoteAdaptor + 'static> SyncEngine<R> {
    /// Creates a new engine over the given ledger, remote and crypto box.
    pub fn new(
        ledger: Arc<LocalLedger>,
        remote: Arc<R>,
        crypto: Arc<CryptoBox>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                ledger,
                remote,
                crypto,
                config,
                sync_running: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the ledger this engine replicates.
    #[must_use]
    pub fn ledger(&self) -> &Arc<LocalLedger> {
        &self.inner.ledger
    }

    /// Returns true while a sync pass is running.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.inner.sync_running.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> SyncResult<SyncGuard<'_>> {
        if self
            .inner
            .sync_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadyReplicating);
        }
        Ok(SyncGuard(&self.inner.sync_running))
    }

    /// Sets a value locally, then replicates the key when
    /// `sync_immediately` is configured.
    pub async fn set(
        &self,
        key: &str,
        value: &[u8],
        expected_version: u64,
    ) -> SyncResult<VersionStamp> {
        let stamp = self.inner.ledger.set(key, value, expected_version)?;
        if self.inner.config.sync_immediately {
            self.sync_key(key).await?;
        }
        Ok(stamp)
    }

    /// Deletes a key locally, then replicates the tombstone when
    /// `sync_immediately` is configured.
    pub async fn del(&self, key: &str, expected_version: u64) -> SyncResult<VersionStamp> {
        let stamp = self.inner.ledger.del(key, expected_version)?;
        if self.inner.config.sync_immediately {
            self.sync_key(key).await?;
        }
        Ok(stamp)
    }

    /// Synchronizes a single key.
    ///
    /// Fetches the remote version first, then runs the reconciliation
    /// kernel. Normally bulk sync is preferable; this is the entry point
    /// for replicate-on-write.
    pub async fn sync_key(&self, key: &str) -> SyncResult<()> {
        check_key(key).map_err(SyncError::Store)?;
        let _guard = self.acquire()?;

        let state = self.inner.remote.ver(key).await;
        Self::sync_key_inner(&self.inner, key, state).await
    }

    /// Synchronizes every key, local and remote.
    ///
    /// Fetches the full remote listing, unions it with the local key set
    /// (local-only keys are synthesized as missing remotely so they get
    /// pushed), and reconciles each key behind a bounded semaphore. The
    /// pass waits for all keys to finish; per-key failures are counted
    /// and reported as one [`SyncError::Replication`] without aborting
    /// sibling keys.
    pub async fn sync_all(&self) -> SyncResult<SyncSummary> {
        let _guard = self.acquire()?;
        let start = Instant::now();

        let remote_keys = match self.inner.remote.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "failed to fetch remote key listing");
                return Err(SyncError::Remote(e));
            }
        };
        let local_keys = self.inner.ledger.local_keys()?;

        let remote_names: HashSet<&str> = remote_keys.iter().map(|k| k.key.as_str()).collect();

        let mut work: Vec<(String, RemoteKeyState)> = remote_keys
            .iter()
            .map(|k| {
                (
                    k.key.clone(),
                    RemoteKeyState {
                        version: k.version,
                        timestamp_ms: k.timestamp_ms,
                        status: k.status,
                    },
                )
            })
            .collect();

        for local in &local_keys {
            if !remote_names.contains(local.key.as_str()) {
                // The server is missing a key we have; it will be pushed.
                work.push((
                    local.key.clone(),
                    RemoteKeyState {
                        version: 0,
                        timestamp_ms: 0,
                        status: RemoteStatus::NotFound,
                    },
                ));
            }
        }

        info!(keys = work.len(), "starting bulk sync");

        let semaphore = Arc::new(Semaphore::new(self.inner.config.max_in_flight));
        let mut tasks: JoinSet<bool> = JoinSet::new();

        for (key, state) in work {
            let inner = Arc::clone(&self.inner);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return false,
                };
                match Self::sync_key_inner(&inner, &key, state).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(key = %key, error = %e, "key sync failed");
                        false
                    }
                }
            });
        }

        let mut keys = 0usize;
        let mut failures = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => keys += 1,
                Ok(false) => failures += 1,
                Err(e) => {
                    warn!(error = %e, "key sync task panicked");
                    failures += 1;
                }
            }
        }

        let duration = start.elapsed();
        if failures > 0 {
            warn!(failures, ?duration, "bulk sync finished with failures");
            return Err(SyncError::Replication { failures });
        }

        info!(keys, ?duration, "bulk sync finished");
        Ok(SyncSummary { keys, duration })
    }

    /// The per-key reconciliation kernel.
    ///
    /// Split out so bulk sync can fan out over a pre-fetched key listing
    /// instead of issuing one version check per key.
    async fn sync_key_inner(
        inner: &EngineInner<R>,
        key: &str,
        remote_state: RemoteKeyState,
    ) -> SyncResult<()> {
        let recorded_remote_version = inner.ledger.remote_version(key)?;

        // A locally missing key participates as version 0 at the epoch.
        let (local_state, local_value) = match inner.ledger.get(key) {
            Ok(view) => (
                LocalState {
                    version: view.version,
                    timestamp_ms: view.timestamp_ms,
                    deleted: view.deleted,
                    recorded_remote_version,
                },
                view.value,
            ),
            Err(e) if e.is_not_found() => (
                LocalState {
                    version: 0,
                    timestamp_ms: 0,
                    deleted: false,
                    recorded_remote_version,
                },
                Vec::new(),
            ),
            Err(e) => return Err(e.into()),
        };

        match resolve(local_state, remote_state) {
            SyncAction::AlreadyInSync => {
                debug!(key, "remote version already recorded");
                Ok(())
            }

            SyncAction::RecordRemoteVersion { remote_version } => {
                debug!(key, remote_version, "both sides tombstoned");
                inner
                    .ledger
                    .set_remote_version(key, local_state.version, remote_version)?;
                Ok(())
            }

            SyncAction::PushDelete { remote_version } => {
                debug!(key, "local key deleted, removing remotely");
                match inner.remote.del(key, remote_version).await {
                    Ok(head) => {
                        inner
                            .ledger
                            .set_remote_version(key, local_state.version, head.version)?;
                        Ok(())
                    }
                    Err(RemoteError::NotFound) => {
                        // Already missing on the server; consistent.
                        debug!(key, "key already missing remotely");
                        Ok(())
                    }
                    Err(e) => {
                        warn!(key, error = %e, "remote delete failed");
                        Err(SyncError::Remote(e))
                    }
                }
            }

            SyncAction::PushPut { use_version } => {
                debug!(key, use_version, "local key newer, updating remotely");
                let payload = if inner.config.encrypted_replication {
                    inner.crypto.encrypt(&local_value)?
                } else {
                    local_value
                };
                let head = inner
                    .remote
                    .put(key, &payload, use_version)
                    .await
                    .map_err(|e| {
                        warn!(key, error = %e, "remote put failed");
                        SyncError::Remote(e)
                    })?;
                inner
                    .ledger
                    .set_remote_version(key, local_state.version, head.version)?;
                Ok(())
            }

            SyncAction::PullDelete { remote_version } => {
                debug!(key, "remote key deleted, removing locally");
                match inner.ledger.del(key, local_state.version) {
                    Ok(stamp) => {
                        inner
                            .ledger
                            .set_remote_version(key, stamp.version, remote_version)?;
                        Ok(())
                    }
                    Err(e) if e.is_not_found() => {
                        // Nothing to delete locally; consistent.
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }

            SyncAction::PullGet { remote_version } => {
                debug!(key, remote_version, "remote key newer, fetching");
                let (head, data) = inner
                    .remote
                    .get(key, remote_version)
                    .await
                    .map_err(|e| {
                        warn!(key, error = %e, "remote get failed");
                        SyncError::Remote(e)
                    })?;
                let value = if inner.config.encrypted_replication {
                    inner.crypto.decrypt(&data)?
                } else {
                    data
                };
                let stamp = inner.ledger.set(key, &value, local_state.version)?;
                inner
                    .ledger
                    .set_remote_version(key, stamp.version, head.version)?;
                Ok(())
            }

            SyncAction::Fail(e) => {
                warn!(key, error = %e, "unexpected remote state");
                Err(SyncError::Remote(e))
            }
        }
    }
}

impl<R> std::fmt::Debug for SyncEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("syncing", &self.inner.sync_running.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultkv_core::{LedgerConfig, SecretKey};
    use vaultkv_remote::MemoryRemote;

    fn engine_with(
        encrypted_replication: bool,
    ) -> (Arc<LocalLedger>, Arc<MemoryRemote>, SyncEngine<MemoryRemote>) {
        let crypto = Arc::new(CryptoBox::new(SecretKey::from_bytes(&[3u8; 32]).unwrap()));
        let ledger = Arc::new(
            LocalLedger::in_memory(
                Arc::clone(&crypto),
                LedgerConfig::default().with_encrypted(false),
            )
            .unwrap(),
        );
        let remote = Arc::new(MemoryRemote::new());
        let engine = SyncEngine::new(
            Arc::clone(&ledger),
            Arc::clone(&remote),
            crypto,
            SyncConfig::default().with_encrypted_replication(encrypted_replication),
        );
        (ledger, remote, engine)
    }

    #[tokio::test]
    async fn pushes_local_only_key_with_create_version() {
        let (ledger, remote, engine) = engine_with(false);
        ledger.set("bar", &[1, 2, 3], 0).unwrap();

        engine.sync_key("bar").await.unwrap();

        // Created on the server at version 1.
        let (version, value, deleted) = remote.entry("bar").unwrap();
        assert_eq!(version, 1);
        assert_eq!(value, vec![1, 2, 3]);
        assert!(!deleted);

        // A new local row records the remote version; payload unchanged.
        let view = ledger.get("bar").unwrap();
        assert_eq!(view.version, 2);
        assert_eq!(view.value, vec![1, 2, 3]);
        assert_eq!(ledger.remote_version("bar").unwrap(), 1);
    }

    #[tokio::test]
    async fn pulls_newer_remote_value() {
        let (ledger, remote, engine) = engine_with(false);
        remote.insert_raw("baz", 4, vec![9, 9], false);

        engine.sync_key("baz").await.unwrap();

        let view = ledger.get("baz").unwrap();
        assert_eq!(view.value, vec![9, 9]);
        assert!(!view.deleted);
        assert_eq!(ledger.remote_version("baz").unwrap(), 4);
    }

    #[tokio::test]
    async fn reconciled_key_is_a_remote_noop() {
        let (ledger, remote, engine) = engine_with(false);
        ledger.set("bar", &[1], 0).unwrap();
        engine.sync_key("bar").await.unwrap();

        let before = remote.op_counts();
        engine.sync_key("bar").await.unwrap();
        let after = remote.op_counts();

        // Only the version check ran; no put/get/del.
        assert_eq!(after.vers, before.vers + 1);
        assert_eq!(after.puts, before.puts);
        assert_eq!(after.gets, before.gets);
        assert_eq!(after.dels, before.dels);
    }

    #[tokio::test]
    async fn last_write_wins_pushes_exactly_one_put() {
        let (ledger, remote, engine) = engine_with(false);
        remote.insert_raw_at("doc", 2, 1_000, vec![0], false);

        // The local row is stamped with the current wall clock, far past
        // the remote timestamp above.
        ledger.set("doc", &[7], 0).unwrap();

        engine.sync_key("doc").await.unwrap();

        let counts = remote.op_counts();
        assert_eq!(counts.puts, 1);
        assert_eq!(counts.gets, 0);
        assert_eq!(counts.dels, 0);

        let (version, value, _) = remote.entry("doc").unwrap();
        assert_eq!(version, 3);
        assert_eq!(value, vec![7]);
        assert_eq!(ledger.remote_version("doc").unwrap(), 3);
    }

    #[tokio::test]
    async fn locally_deleted_key_deletes_remotely() {
        let (ledger, remote, engine) = engine_with(false);
        ledger.set("gone", &[1], 0).unwrap();
        engine.sync_key("gone").await.unwrap();

        ledger.del("gone", ledger.local_version("gone").unwrap().0).unwrap();
        engine.sync_key("gone").await.unwrap();

        let (_, _, deleted) = remote.entry("gone").unwrap();
        assert!(deleted);
    }

    #[tokio::test]
    async fn remote_tombstone_deletes_locally() {
        let (ledger, remote, engine) = engine_with(false);
        ledger.set("gone", &[1], 0).unwrap();
        engine.sync_key("gone").await.unwrap();

        // The server deletes the key with a newer timestamp.
        let (version, value, _) = remote.entry("gone").unwrap();
        remote.insert_raw_at(
            "gone",
            version + 1,
            vaultkv_core::now_ms() + 60_000,
            value,
            true,
        );

        engine.sync_key("gone").await.unwrap();
        assert!(ledger.get("gone").unwrap().deleted);
    }

    #[tokio::test]
    async fn sync_immediately_replicates_on_write() {
        let crypto = Arc::new(CryptoBox::new(SecretKey::from_bytes(&[3u8; 32]).unwrap()));
        let ledger = Arc::new(
            LocalLedger::in_memory(
                Arc::clone(&crypto),
                LedgerConfig::default().with_encrypted(false),
            )
            .unwrap(),
        );
        let remote = Arc::new(MemoryRemote::new());
        let engine = SyncEngine::new(
            Arc::clone(&ledger),
            Arc::clone(&remote),
            crypto,
            SyncConfig::default()
                .with_encrypted_replication(false)
                .with_sync_immediately(true),
        );

        engine.set("quick", &[5], 0).await.unwrap();
        assert_eq!(remote.entry("quick").unwrap().1, vec![5]);

        let version = ledger.local_version("quick").unwrap().0;
        engine.del("quick", version).await.unwrap();
        assert!(remote.entry("quick").unwrap().2);
    }

    #[tokio::test]
    async fn invalid_key_is_rejected_before_any_network_io() {
        let (_ledger, remote, engine) = engine_with(false);
        let err = engine.sync_key("_internal").await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Store(vaultkv_core::StoreError::InvalidKey { .. })
        ));
        assert_eq!(remote.op_counts().vers, 0);
    }

    #[tokio::test]
    async fn unknown_remote_state_fails_the_key() {
        let (ledger, remote, engine) = engine_with(false);
        ledger.set("bad", &[1], 0).unwrap();
        remote.fail_key("bad");

        let err = engine.sync_key("bad").await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(RemoteError::Unknown)));
    }
}
