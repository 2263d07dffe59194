//! Error types for the VaultKV core.

use thiserror::Error;

/// Result type for ledger operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in ledger and crypto operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying persistence failure. Fatal; never retried automatically.
    #[error("storage error: {0}")]
    Storage(#[from] vaultkv_storage::StorageError),

    /// I/O error outside the storage backend (store directory handling).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Expected-version mismatch. The caller must re-read and retry.
    #[error("version conflict on key {key:?}: expected {expected}, current {current}")]
    Conflict {
        /// The key the operation targeted.
        key: String,
        /// The version the caller presented.
        expected: u64,
        /// The version actually stored.
        current: u64,
    },

    /// No such key, or no such (key, version) pair.
    #[error("key not found: {key:?}")]
    NotFound {
        /// The key that was looked up.
        key: String,
    },

    /// Key naming validation failed.
    #[error("invalid key: {key:?}")]
    InvalidKey {
        /// The rejected key.
        key: String,
    },

    /// Stored or received bytes fail structural validation.
    #[error("malformed data: {message}")]
    MalformedData {
        /// Description of the problem.
        message: String,
    },

    /// The ledger log was written by an unsupported format version.
    #[error("unsupported ledger format {found} (supported up to {supported})")]
    InvalidFormat {
        /// The format version found in the log header.
        found: u16,
        /// The newest format this build understands.
        supported: u16,
    },

    /// Another process holds the store directory lock.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// Payload codec failure.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// Decryption or other opaque failure.
    #[error("unknown error: {message}")]
    Unknown {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates a not-found error for the given key.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates an invalid-key error.
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
    }

    /// Creates a conflict error.
    pub fn conflict(key: impl Into<String>, expected: u64, current: u64) -> Self {
        Self::Conflict {
            key: key.into(),
            expected,
            current,
        }
    }

    /// Creates a malformed-data error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedData {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an unknown error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    /// Returns true for expected-version mismatches.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true for missing keys or versions.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
