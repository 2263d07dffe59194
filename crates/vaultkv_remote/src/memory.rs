//! In-memory remote adaptor with full server semantics.
//!
//! Implements the optimistic-locking contract of a conforming remote
//! service: version checks on every mutation, tombstones on delete, and
//! the create-at-version-1 rule for keys the server does not have yet.
//! Used as the server side of integration tests; operation counters and
//! fault injection support exercising partial-failure paths.

use crate::adaptor::{RemoteAdaptor, RemoteHead, RemoteKeyInfo, RemoteKeyState};
use crate::error::{RemoteError, RemoteStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone)]
struct StoredEntry {
    version: u64,
    timestamp_ms: u64,
    value: Vec<u8>,
    deleted: bool,
}

/// Counts of remote operations performed, for assertions in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    /// Number of `ver` calls.
    pub vers: u64,
    /// Number of `put` calls.
    pub puts: u64,
    /// Number of `del` calls.
    pub dels: u64,
    /// Number of `get` calls.
    pub gets: u64,
    /// Number of `keys` calls.
    pub keys: u64,
}

/// An in-memory [`RemoteAdaptor`] with conforming server semantics.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    db: Mutex<HashMap<String, StoredEntry>>,
    failing_keys: Mutex<HashSet<String>>,
    fail_all: AtomicBool,
    vers: AtomicU64,
    puts: AtomicU64,
    dels: AtomicU64,
    gets: AtomicU64,
    keys_calls: AtomicU64,
}

impl MemoryRemote {
    /// Creates an empty remote.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an entry directly, bypassing version checks.
    pub fn insert_raw(&self, key: &str, version: u64, value: Vec<u8>, deleted: bool) {
        self.db.lock().insert(
            key.to_owned(),
            StoredEntry {
                version,
                timestamp_ms: now_ms(),
                value,
                deleted,
            },
        );
    }

    /// Overwrites an entry with an explicit timestamp (for tie-break tests).
    pub fn insert_raw_at(
        &self,
        key: &str,
        version: u64,
        timestamp_ms: u64,
        value: Vec<u8>,
        deleted: bool,
    ) {
        self.db.lock().insert(
            key.to_owned(),
            StoredEntry {
                version,
                timestamp_ms,
                value,
                deleted,
            },
        );
    }

    /// Returns `(version, value, deleted)` for a key, if present.
    #[must_use]
    pub fn entry(&self, key: &str) -> Option<(u64, Vec<u8>, bool)> {
        self.db
            .lock()
            .get(key)
            .map(|e| (e.version, e.value.clone(), e.deleted))
    }

    /// Number of entries, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.db.lock().len()
    }

    /// Returns true when the remote holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.db.lock().is_empty()
    }

    /// Makes every subsequent operation fail with `Unknown`.
    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Makes `put`/`del`/`get` fail with `Unknown` for one key.
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.lock().insert(key.to_owned());
    }

    /// Returns the operation counters.
    #[must_use]
    pub fn op_counts(&self) -> OpCounts {
        OpCounts {
            vers: self.vers.load(Ordering::SeqCst),
            puts: self.puts.load(Ordering::SeqCst),
            dels: self.dels.load(Ordering::SeqCst),
            gets: self.gets.load(Ordering::SeqCst),
            keys: self.keys_calls.load(Ordering::SeqCst),
        }
    }

    fn failing(&self, key: &str) -> bool {
        self.fail_all.load(Ordering::SeqCst) || self.failing_keys.lock().contains(key)
    }
}

#[async_trait]
impl RemoteAdaptor for MemoryRemote {
    async fn ver(&self, key: &str) -> RemoteKeyState {
        self.vers.fetch_add(1, Ordering::SeqCst);
        if self.failing(key) {
            return RemoteKeyState::unknown();
        }

        match self.db.lock().get(key) {
            None => RemoteKeyState {
                version: 0,
                timestamp_ms: now_ms(),
                status: RemoteStatus::NotFound,
            },
            Some(entry) => RemoteKeyState {
                version: entry.version,
                timestamp_ms: entry.timestamp_ms,
                status: if entry.deleted {
                    RemoteStatus::Tombstone
                } else {
                    RemoteStatus::Ok
                },
            },
        }
    }

    async fn put(
        &self,
        key: &str,
        value: &[u8],
        expected_version: u64,
    ) -> Result<RemoteHead, RemoteError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.failing(key) {
            return Err(RemoteError::Unknown);
        }

        let mut db = self.db.lock();
        match db.get(key) {
            None => {
                // Creates must present version 1.
                if expected_version != 1 {
                    return Err(RemoteError::NotFound);
                }
                let entry = StoredEntry {
                    version: 1,
                    timestamp_ms: now_ms(),
                    value: value.to_vec(),
                    deleted: false,
                };
                let head = RemoteHead {
                    version: entry.version,
                    timestamp_ms: entry.timestamp_ms,
                };
                db.insert(key.to_owned(), entry);
                Ok(head)
            }
            Some(existing) => {
                if expected_version != existing.version {
                    return Err(RemoteError::Conflict);
                }
                let entry = StoredEntry {
                    version: existing.version + 1,
                    timestamp_ms: now_ms(),
                    value: value.to_vec(),
                    deleted: false,
                };
                let head = RemoteHead {
                    version: entry.version,
                    timestamp_ms: entry.timestamp_ms,
                };
                db.insert(key.to_owned(), entry);
                Ok(head)
            }
        }
    }

    async fn del(&self, key: &str, expected_version: u64) -> Result<RemoteHead, RemoteError> {
        self.dels.fetch_add(1, Ordering::SeqCst);
        if self.failing(key) {
            return Err(RemoteError::Unknown);
        }

        let mut db = self.db.lock();
        match db.get(key) {
            None => Err(RemoteError::NotFound),
            Some(existing) => {
                if expected_version != existing.version {
                    return Err(RemoteError::Conflict);
                }
                let entry = StoredEntry {
                    version: existing.version + 1,
                    timestamp_ms: now_ms(),
                    value: existing.value.clone(),
                    deleted: true,
                };
                let head = RemoteHead {
                    version: entry.version,
                    timestamp_ms: entry.timestamp_ms,
                };
                db.insert(key.to_owned(), entry);
                Ok(head)
            }
        }
    }

    async fn get(
        &self,
        key: &str,
        expected_version: u64,
    ) -> Result<(RemoteHead, Vec<u8>), RemoteError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.failing(key) {
            return Err(RemoteError::Unknown);
        }

        let db = self.db.lock();
        match db.get(key) {
            None => Err(RemoteError::NotFound),
            Some(entry) => {
                if expected_version != 0 && expected_version != entry.version {
                    return Err(RemoteError::Conflict);
                }
                if entry.deleted {
                    return Err(RemoteError::Tombstone);
                }
                Ok((
                    RemoteHead {
                        version: entry.version,
                        timestamp_ms: entry.timestamp_ms,
                    },
                    entry.value.clone(),
                ))
            }
        }
    }

    async fn keys(&self) -> Result<Vec<RemoteKeyInfo>, RemoteError> {
        self.keys_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(RemoteError::Unknown);
        }

        let db = self.db.lock();
        Ok(db
            .iter()
            .map(|(key, entry)| RemoteKeyInfo {
                key: key.clone(),
                version: entry.version,
                timestamp_ms: entry.timestamp_ms,
                status: if entry.deleted {
                    RemoteStatus::Tombstone
                } else {
                    RemoteStatus::Ok
                },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_requires_version_one() {
        let remote = MemoryRemote::new();
        assert_eq!(
            remote.put("hello", &[1], 0).await.unwrap_err(),
            RemoteError::NotFound
        );

        let head = remote.put("hello", &[1], 1).await.unwrap();
        assert_eq!(head.version, 1);
    }

    #[tokio::test]
    async fn stale_put_conflicts() {
        let remote = MemoryRemote::new();
        remote.put("hello", &[1], 1).await.unwrap();
        assert_eq!(
            remote.put("hello", &[2], 5).await.unwrap_err(),
            RemoteError::Conflict
        );

        let head = remote.put("hello", &[2], 1).await.unwrap();
        assert_eq!(head.version, 2);
    }

    #[tokio::test]
    async fn delete_marks_tombstone() {
        let remote = MemoryRemote::new();
        remote.put("hello", &[1], 1).await.unwrap();
        let head = remote.del("hello", 1).await.unwrap();
        assert_eq!(head.version, 2);

        let state = remote.ver("hello").await;
        assert_eq!(state.status, RemoteStatus::Tombstone);
        assert_eq!(state.version, 2);

        assert_eq!(
            remote.get("hello", 2).await.unwrap_err(),
            RemoteError::Tombstone
        );
    }

    #[tokio::test]
    async fn ver_of_missing_key() {
        let remote = MemoryRemote::new();
        let state = remote.ver("absent").await;
        assert_eq!(state.version, 0);
        assert_eq!(state.status, RemoteStatus::NotFound);
    }

    #[tokio::test]
    async fn get_honors_expected_version() {
        let remote = MemoryRemote::new();
        remote.put("hello", &[1], 1).await.unwrap();

        assert!(remote.get("hello", 1).await.is_ok());
        assert!(remote.get("hello", 0).await.is_ok());
        assert_eq!(
            remote.get("hello", 9).await.unwrap_err(),
            RemoteError::Conflict
        );
    }

    #[tokio::test]
    async fn listing_includes_tombstones() {
        let remote = MemoryRemote::new();
        remote.insert_raw("live", 1, vec![1], false);
        remote.insert_raw("gone", 2, vec![], true);

        let mut listing = remote.keys().await.unwrap();
        listing.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].key, "gone");
        assert_eq!(listing[0].status, RemoteStatus::Tombstone);
        assert_eq!(listing[1].key, "live");
        assert_eq!(listing[1].status, RemoteStatus::Ok);
    }

    #[tokio::test]
    async fn fault_injection() {
        let remote = MemoryRemote::new();
        remote.insert_raw("hello", 1, vec![1], false);

        remote.fail_key("hello");
        assert_eq!(
            remote.put("hello", &[2], 1).await.unwrap_err(),
            RemoteError::Unknown
        );

        remote.set_fail_all(true);
        assert_eq!(remote.keys().await.unwrap_err(), RemoteError::Unknown);
        assert_eq!(remote.ver("other").await.status, RemoteStatus::Unknown);
    }

    #[tokio::test]
    async fn op_counters_track_calls() {
        let remote = MemoryRemote::new();
        remote.put("hello", &[1], 1).await.unwrap();
        remote.ver("hello").await;
        remote.get("hello", 1).await.unwrap();
        remote.keys().await.unwrap();

        let counts = remote.op_counts();
        assert_eq!(counts.puts, 1);
        assert_eq!(counts.vers, 1);
        assert_eq!(counts.gets, 1);
        assert_eq!(counts.keys, 1);
        assert_eq!(counts.dels, 0);
    }
}
