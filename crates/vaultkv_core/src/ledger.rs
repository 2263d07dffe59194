//! The local ledger: a versioned, transactional, append-only record store.
//!
//! Every `set`/`del` appends a new row instead of mutating in place, so the
//! full version history of each key is retained. All operations for one
//! ledger instance are serialized behind a single mutex; each operation is
//! atomic — the in-memory index is only updated after the row has been
//! appended to the backend, and a failed append leaves the ledger unchanged.

use crate::crypto::CryptoBox;
use crate::dir::StoreDir;
use crate::error::{StoreError, StoreResult};
use crate::key::check_key;
use crate::record::{decode_frame_at, FrameDecode, LedgerRecord, RecordRow, LEDGER_FORMAT};
use crate::time::now_ms;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use vaultkv_storage::{FileBackend, InMemoryBackend, StorageBackend, StorageError};

/// Configuration for a ledger instance.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Encrypt payloads at rest. Default on; turn off only for tests that
    /// need to inspect stored bytes.
    pub encrypted: bool,
    /// Flush the backend after every append. Default on.
    pub sync_on_write: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            encrypted: true,
            sync_on_write: true,
        }
    }
}

impl LedgerConfig {
    /// Sets at-rest encryption.
    #[must_use]
    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    /// Sets flush-per-append behavior.
    #[must_use]
    pub fn with_sync_on_write(mut self, sync_on_write: bool) -> Self {
        self.sync_on_write = sync_on_write;
        self
    }
}

/// A record as seen by a reader: the resolved version plus plaintext value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordView {
    /// Local version of the row.
    pub version: u64,
    /// Row timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Tombstone marker.
    pub deleted: bool,
    /// Plaintext value (empty for tombstones).
    pub value: Vec<u8>,
}

/// Version and timestamp returned by mutating operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionStamp {
    /// The new local version.
    pub version: u64,
    /// The row timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

/// Latest-row summary for one key, used by bulk-sync enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalKeyInfo {
    /// Key name.
    pub key: String,
    /// Current local version.
    pub version: u64,
    /// Current row timestamp.
    pub timestamp_ms: u64,
    /// Remote version recorded on the current row.
    pub remote_version: u64,
    /// Tombstone marker.
    pub deleted: bool,
}

/// Per-row index entry: everything but the value, plus the frame offset.
#[derive(Debug, Clone, Copy)]
struct RowMeta {
    version: u64,
    remote_version: u64,
    timestamp_ms: u64,
    deleted: bool,
    offset: u64,
}

struct LedgerInner {
    backend: Box<dyn StorageBackend>,
    /// key -> row metadata, ascending by version.
    index: HashMap<String, Vec<RowMeta>>,
    dir: Option<StoreDir>,
    closed: bool,
}

/// The local ledger.
///
/// Construct with [`open`](Self::open) for a persistent store or
/// [`in_memory`](Self::in_memory) for tests, and share via [`Arc`].
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use vaultkv_core::{CryptoBox, LedgerConfig, LocalLedger, SecretKey};
///
/// let cryptobox = Arc::new(CryptoBox::new(SecretKey::generate()));
/// let ledger = LocalLedger::in_memory(cryptobox, LedgerConfig::default()).unwrap();
///
/// let stamp = ledger.set("greeting", b"hello", 0).unwrap();
/// assert_eq!(stamp.version, 1);
///
/// let view = ledger.get("greeting").unwrap();
/// assert_eq!(view.value, b"hello");
/// ```
pub struct LocalLedger {
    inner: Mutex<LedgerInner>,
    crypto: Arc<CryptoBox>,
    config: LedgerConfig,
}

impl LocalLedger {
    /// Opens or creates a persistent ledger in the given directory.
    ///
    /// Acquires an exclusive directory lock and replays the row log into
    /// the in-memory index. A torn tail frame (crash during append) is
    /// discarded; an empty log is bootstrapped with a format header.
    pub fn open(path: &Path, crypto: Arc<CryptoBox>, config: LedgerConfig) -> StoreResult<Self> {
        let dir = StoreDir::open(path)?;
        let backend = FileBackend::open(&dir.ledger_path())?;
        Self::from_backend(Box::new(backend), Some(dir), crypto, config)
    }

    /// Creates an ephemeral in-memory ledger.
    pub fn in_memory(crypto: Arc<CryptoBox>, config: LedgerConfig) -> StoreResult<Self> {
        Self::from_backend(Box::new(InMemoryBackend::new()), None, crypto, config)
    }

    fn from_backend(
        mut backend: Box<dyn StorageBackend>,
        dir: Option<StoreDir>,
        crypto: Arc<CryptoBox>,
        config: LedgerConfig,
    ) -> StoreResult<Self> {
        let index = Self::replay(&mut backend)?;
        Ok(Self {
            inner: Mutex::new(LedgerInner {
                backend,
                index,
                dir,
                closed: false,
            }),
            crypto,
            config,
        })
    }

    /// Replays the log, rebuilding the index and handling recovery.
    fn replay(
        backend: &mut Box<dyn StorageBackend>,
    ) -> StoreResult<HashMap<String, Vec<RowMeta>>> {
        let mut index: HashMap<String, Vec<RowMeta>> = HashMap::new();

        if backend.size()? == 0 {
            let frame = LedgerRecord::Header {
                format: LEDGER_FORMAT,
            }
            .encode_frame()?;
            backend.append(&frame)?;
            backend.flush()?;
            return Ok(index);
        }

        let mut offset = 0u64;
        loop {
            match decode_frame_at(backend.as_ref(), offset) {
                Ok(None) => break,
                Ok(Some(FrameDecode { record, frame_len })) => {
                    match record {
                        LedgerRecord::Header { format } => {
                            if format > LEDGER_FORMAT {
                                return Err(StoreError::InvalidFormat {
                                    found: format,
                                    supported: LEDGER_FORMAT,
                                });
                            }
                        }
                        LedgerRecord::Row(row) => {
                            index.entry(row.key.clone()).or_default().push(RowMeta {
                                version: row.version,
                                remote_version: row.remote_version,
                                timestamp_ms: row.timestamp_ms,
                                deleted: row.deleted,
                                offset,
                            });
                        }
                    }
                    offset += frame_len;
                }
                Err(e @ StoreError::InvalidFormat { .. }) => return Err(e),
                Err(e) => {
                    if offset == 0 {
                        // Not a torn tail: the file never held a valid frame.
                        return Err(e);
                    }
                    warn!(offset, error = %e, "discarding torn ledger tail");
                    backend.truncate(offset)?;
                    backend.flush()?;
                    break;
                }
            }
        }

        Ok(index)
    }

    fn ensure_open(inner: &LedgerInner) -> StoreResult<()> {
        if inner.closed {
            return Err(StorageError::Closed.into());
        }
        Ok(())
    }

    fn read_row(inner: &LedgerInner, offset: u64) -> StoreResult<RecordRow> {
        match decode_frame_at(inner.backend.as_ref(), offset)? {
            Some(FrameDecode {
                record: LedgerRecord::Row(row),
                ..
            }) => Ok(row),
            _ => Err(StoreError::malformed("expected row frame")),
        }
    }

    fn append_row(&self, inner: &mut LedgerInner, row: RecordRow) -> StoreResult<u64> {
        let frame = LedgerRecord::Row(row).encode_frame()?;
        let offset = inner.backend.append(&frame)?;
        if self.config.sync_on_write {
            inner.backend.flush()?;
        }
        Ok(offset)
    }

    fn latest(inner: &LedgerInner, key: &str) -> Option<RowMeta> {
        inner.index.get(key).and_then(|rows| rows.last()).copied()
    }

    /// Returns the latest version of a key.
    ///
    /// Fails with [`StoreError::NotFound`] if the key has never been set.
    /// The value is decrypted when at-rest encryption is enabled;
    /// tombstones carry an empty value.
    pub fn get(&self, key: &str) -> StoreResult<RecordView> {
        self.get_at(key, 0)
    }

    /// Returns a specific version of a key, or the latest when `version`
    /// is 0.
    pub fn get_at(&self, key: &str, version: u64) -> StoreResult<RecordView> {
        check_key(key)?;
        let inner = self.inner.lock();
        Self::ensure_open(&inner)?;

        let rows = inner
            .index
            .get(key)
            .ok_or_else(|| StoreError::not_found(key))?;
        let meta = if version == 0 {
            rows.last()
        } else {
            rows.iter().find(|m| m.version == version)
        }
        .ok_or_else(|| StoreError::not_found(key))?;

        debug!(key, version = meta.version, "get");
        let row = Self::read_row(&inner, meta.offset)?;

        let value = if row.value.is_empty() {
            Vec::new()
        } else if self.config.encrypted {
            self.crypto.decrypt(&row.value)?
        } else {
            row.value
        };

        Ok(RecordView {
            version: meta.version,
            timestamp_ms: meta.timestamp_ms,
            deleted: meta.deleted,
            value,
        })
    }

    /// Sets the value of a key.
    ///
    /// `expected_version` must equal the current version (0 to create).
    /// On success a new row with version `current + 1` is appended.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] if `expected_version` is stale; the ledger
    /// is unchanged in that case.
    pub fn set(&self, key: &str, value: &[u8], expected_version: u64) -> StoreResult<VersionStamp> {
        check_key(key)?;
        let mut inner = self.inner.lock();
        Self::ensure_open(&inner)?;

        let current = Self::latest(&inner, key).map_or(0, |m| m.version);
        if current != expected_version {
            debug!(key, expected_version, current, "set conflict");
            return Err(StoreError::conflict(key, expected_version, current));
        }

        let version = current + 1;
        let timestamp_ms = now_ms();
        let stored = if self.config.encrypted {
            self.crypto.encrypt(value)?
        } else {
            value.to_vec()
        };

        debug!(key, version, "set");
        let offset = self.append_row(
            &mut inner,
            RecordRow {
                key: key.to_owned(),
                version,
                remote_version: 0,
                timestamp_ms,
                deleted: false,
                value: stored,
            },
        )?;

        inner.index.entry(key.to_owned()).or_default().push(RowMeta {
            version,
            remote_version: 0,
            timestamp_ms,
            deleted: false,
            offset,
        });

        Ok(VersionStamp {
            version,
            timestamp_ms,
        })
    }

    /// Marks a key as deleted by appending a tombstone row.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when `expected_version` is 0 (a delete can
    /// never create), [`StoreError::Conflict`] on version mismatch.
    pub fn del(&self, key: &str, expected_version: u64) -> StoreResult<VersionStamp> {
        check_key(key)?;
        if expected_version == 0 {
            return Err(StoreError::not_found(key));
        }

        let mut inner = self.inner.lock();
        Self::ensure_open(&inner)?;

        let current = Self::latest(&inner, key).map_or(0, |m| m.version);
        if current != expected_version {
            debug!(key, expected_version, current, "del conflict");
            return Err(StoreError::conflict(key, expected_version, current));
        }

        let version = current + 1;
        let timestamp_ms = now_ms();

        debug!(key, version, "del");
        let offset = self.append_row(
            &mut inner,
            RecordRow {
                key: key.to_owned(),
                version,
                remote_version: 0,
                timestamp_ms,
                deleted: true,
                value: Vec::new(),
            },
        )?;

        inner.index.entry(key.to_owned()).or_default().push(RowMeta {
            version,
            remote_version: 0,
            timestamp_ms,
            deleted: true,
            offset,
        });

        Ok(VersionStamp {
            version,
            timestamp_ms,
        })
    }

    /// Returns the current local version and timestamp of a key, or
    /// `(0, 0)` if the key has never been set.
    pub fn local_version(&self, key: &str) -> StoreResult<(u64, u64)> {
        check_key(key)?;
        let inner = self.inner.lock();
        Self::ensure_open(&inner)?;
        Ok(Self::latest(&inner, key).map_or((0, 0), |m| (m.version, m.timestamp_ms)))
    }

    /// Returns the remote version recorded on the current row, or 0 if the
    /// key is absent or was never reconciled.
    pub fn remote_version(&self, key: &str) -> StoreResult<u64> {
        check_key(key)?;
        let inner = self.inner.lock();
        Self::ensure_open(&inner)?;
        Ok(Self::latest(&inner, key).map_or(0, |m| m.remote_version))
    }

    /// Records a successful reconciliation by appending a new row that
    /// copies the current value and tombstone flag, stamped with
    /// `remote_version`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] if `expected_local_version` is 0 (cannot
    /// record a reconciliation for a key that does not exist locally) or
    /// does not match the current version.
    pub fn set_remote_version(
        &self,
        key: &str,
        expected_local_version: u64,
        remote_version: u64,
    ) -> StoreResult<VersionStamp> {
        check_key(key)?;
        let mut inner = self.inner.lock();
        Self::ensure_open(&inner)?;

        let current = Self::latest(&inner, key).map_or(0, |m| m.version);
        if expected_local_version < 1 || current != expected_local_version {
            debug!(
                key,
                expected_local_version, current, "set_remote_version conflict"
            );
            return Err(StoreError::conflict(key, expected_local_version, current));
        }

        let meta = Self::latest(&inner, key).ok_or_else(|| StoreError::not_found(key))?;
        let row = Self::read_row(&inner, meta.offset)?;

        let version = current + 1;
        let timestamp_ms = now_ms();

        debug!(key, version, remote_version, "set_remote_version");
        let offset = self.append_row(
            &mut inner,
            RecordRow {
                key: key.to_owned(),
                version,
                remote_version,
                timestamp_ms,
                deleted: row.deleted,
                value: row.value,
            },
        )?;

        inner.index.entry(key.to_owned()).or_default().push(RowMeta {
            version,
            remote_version,
            timestamp_ms,
            deleted: meta.deleted,
            offset,
        });

        Ok(VersionStamp {
            version,
            timestamp_ms,
        })
    }

    /// Returns the latest row per key, for bulk-sync enumeration.
    pub fn local_keys(&self) -> StoreResult<Vec<LocalKeyInfo>> {
        let inner = self.inner.lock();
        Self::ensure_open(&inner)?;

        let mut keys = Vec::with_capacity(inner.index.len());
        for (key, rows) in &inner.index {
            if let Some(meta) = rows.last() {
                keys.push(LocalKeyInfo {
                    key: key.clone(),
                    version: meta.version,
                    timestamp_ms: meta.timestamp_ms,
                    remote_version: meta.remote_version,
                    deleted: meta.deleted,
                });
            }
        }
        Ok(keys)
    }

    /// Closes the ledger and deletes the entire persisted store.
    ///
    /// Every subsequent operation on this instance fails; open a new
    /// ledger to start over.
    pub fn remove_store(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        Self::ensure_open(&inner)?;

        inner.closed = true;
        // Drop the file handle before deleting the directory.
        inner.backend = Box::new(InMemoryBackend::new());
        if let Some(dir) = inner.dir.take() {
            dir.remove()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for LocalLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LocalLedger")
            .field("keys", &inner.index.len())
            .field("closed", &inner.closed)
            .finish()
    }
}
