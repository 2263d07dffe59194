//! # VaultKV Remote
//!
//! Remote key-value adaptor contract and HTTP wire mapping for VaultKV.
//!
//! This crate provides:
//! - [`RemoteAdaptor`] - the async contract the sync engine replicates
//!   against (version-check, put, delete, get, list-all-keys)
//! - [`RemoteError`] / [`RemoteStatus`] - the wire error taxonomy
//! - [`HttpRemote`] - the HTTP mapping (`ETag` carries the version,
//!   `If-None-Match` the optimistic lock, 404/409/410 the error states)
//!   over an abstract [`HttpClient`]
//! - [`keylist`] - the binary codec for the `_all_keys` bulk listing
//! - [`MemoryRemote`] - an in-memory adaptor with conforming server
//!   semantics, used as the server side of tests

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adaptor;
mod error;
mod http;
pub mod keylist;
mod memory;

pub use adaptor::{RemoteAdaptor, RemoteHead, RemoteKeyInfo, RemoteKeyState};
pub use error::{RemoteError, RemoteStatus};
pub use http::{
    format_rfc1123_ms, parse_rfc1123_ms, HttpClient, HttpRemote, HttpRequest, HttpResponse,
};
pub use memory::{MemoryRemote, OpCounts};
