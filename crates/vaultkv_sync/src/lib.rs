//! # VaultKV Sync
//!
//! Last-write-wins sync engine for VaultKV.
//!
//! This crate provides:
//! - [`resolve`] - the pure per-key conflict decision (push / pull /
//!   record / no-op), tie-broken by timestamp with tombstone handling
//! - [`SyncEngine`] - per-key and bulk synchronization of a local ledger
//!   against a remote adaptor, with bounded concurrency and a reentrancy
//!   guard
//! - [`SyncConfig`] - concurrency bound, replication encryption and
//!   replicate-on-write knobs
//!
//! ## Key Invariants
//!
//! - Only one sync pass runs per engine; overlapping callers fail fast
//!   with `AlreadyReplicating`
//! - Bulk sync waits for every key before reporting; per-key failures are
//!   counted, never cascaded
//! - Every remote mutation is version-checked, so concurrent syncs from
//!   other devices degrade to failed keys rather than corruption

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod resolver;

pub use config::SyncConfig;
pub use engine::{SyncEngine, SyncSummary};
pub use error::{SyncError, SyncResult};
pub use resolver::{resolve, LocalState, SyncAction};
