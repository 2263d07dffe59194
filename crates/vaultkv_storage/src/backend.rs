//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level storage backend for the VaultKV ledger.
///
/// Backends are append-only byte stores. The ledger writes framed records
/// through [`append`](Self::append) and replays them with
/// [`read_at`](Self::read_at) on open; backends never interpret the bytes.
///
/// # Invariants
///
/// - `append` returns the offset the data was written at
/// - `read_at` returns exactly the bytes previously written at that offset
/// - after `flush` returns, all appended data survives process termination
/// - backends must be `Send + Sync` so a ledger can be shared across threads
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`](crate::StorageError::ReadPastEnd)
    /// if the range extends beyond the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data at the end of the storage and returns the write offset.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes all pending writes to durable storage.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes (the offset of the next append).
    fn size(&self) -> StorageResult<u64>;

    /// Syncs data and metadata to durable storage.
    ///
    /// A stronger guarantee than `flush`: file metadata (size, timestamps)
    /// is durable too.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the storage to `new_size` bytes.
    ///
    /// The ledger uses this to discard a torn tail frame detected during
    /// replay.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` exceeds the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
