//! # VaultKV Core
//!
//! Versioned, encrypted local ledger for VaultKV.
//!
//! This crate provides:
//! - [`LocalLedger`] - append-only, versioned, transactional record store
//! - [`CryptoBox`] - AES-256-GCM payload encryption with HKDF key derivation
//! - Framed row log codec with CRC validation and torn-tail recovery
//! - Key name validation (underscore-prefixed names are reserved)
//! - [`KvObject`] / [`Payload`] - typed record wrapper for collaborators
//!
//! ## Versioning Model
//!
//! Every key carries a strictly increasing local version starting at 1;
//! version 0 means "does not exist". Writers present the version they
//! believe is current and are rejected with a conflict when it is stale
//! (optimistic locking). Deletions append tombstone rows so they can be
//! replicated; the sync layer records the reconciled remote version
//! through [`LocalLedger::set_remote_version`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod crypto;
mod dir;
mod error;
mod key;
mod ledger;
mod object;
mod record;
mod time;

pub use crypto::{CryptoBox, SecretKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use error::{StoreError, StoreResult};
pub use key::check_key;
pub use ledger::{LedgerConfig, LocalKeyInfo, LocalLedger, RecordView, VersionStamp};
pub use object::{from_cbor, to_cbor, KvObject, Payload};
pub use record::{compute_crc32, LedgerRecord, LedgerRecordType, RecordRow, LEDGER_FORMAT};
pub use time::now_ms;
