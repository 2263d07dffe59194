//! Typed record wrapper over the ledger.
//!
//! Collaborating subsystems store structured payloads under well-known
//! keys. Instead of a subclass per payload type, a single generic
//! [`KvObject`] carries the versioning envelope and a [`Payload`] codec
//! trait handles the bytes; payload types are plain structs implementing
//! `Payload` (usually via the CBOR helpers below).

use crate::error::{StoreError, StoreResult};
use crate::ledger::LocalLedger;
use serde::{de::DeserializeOwned, Serialize};

/// Codec contract for typed payloads.
pub trait Payload: Sized {
    /// Encodes the payload to bytes.
    fn encode(&self) -> StoreResult<Vec<u8>>;

    /// Decodes a payload from bytes.
    fn decode(bytes: &[u8]) -> StoreResult<Self>;
}

/// Encodes a serde value as canonical CBOR.
///
/// Convenience for `Payload` implementations.
pub fn to_cbor<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| StoreError::codec(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a serde value from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::codec(e.to_string()))
}

/// A versioned record with its raw payload bytes.
///
/// Mirrors one ledger row: the version and timestamp fields are updated in
/// place by [`LocalLedger::set_object`] and [`LocalLedger::del_object`], so
/// an object can be mutated and saved repeatedly without re-fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvObject {
    /// Key the record is stored under.
    pub key: String,
    /// Current local version (0 before the first save).
    pub version: u64,
    /// Timestamp of the current row in milliseconds since the Unix epoch.
    pub last_modified_ms: u64,
    /// Tombstone marker.
    pub deleted: bool,
    /// Raw payload bytes.
    pub data: Vec<u8>,
}

impl KvObject {
    /// Creates a fresh, never-saved object for the given key.
    pub fn new(key: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            version: 0,
            last_modified_ms: 0,
            deleted: false,
            data,
        }
    }

    /// Creates a fresh object from a typed payload.
    pub fn from_payload<T: Payload>(key: impl Into<String>, payload: &T) -> StoreResult<Self> {
        Ok(Self::new(key, payload.encode()?))
    }

    /// Decodes the payload bytes into a typed value.
    pub fn payload<T: Payload>(&self) -> StoreResult<T> {
        T::decode(&self.data)
    }
}

impl LocalLedger {
    /// Fetches the latest version of a key as a [`KvObject`].
    pub fn get_object(&self, key: &str) -> StoreResult<KvObject> {
        let view = self.get(key)?;
        Ok(KvObject {
            key: key.to_owned(),
            version: view.version,
            last_modified_ms: view.timestamp_ms,
            deleted: view.deleted,
            data: view.value,
        })
    }

    /// Saves an object, updating its version and timestamp in place.
    ///
    /// The object's `version` is used as the expected version, so a stale
    /// object fails with [`StoreError::Conflict`].
    pub fn set_object(&self, object: &mut KvObject) -> StoreResult<()> {
        let stamp = self.set(&object.key, &object.data, object.version)?;
        object.version = stamp.version;
        object.last_modified_ms = stamp.timestamp_ms;
        object.deleted = false;
        Ok(())
    }

    /// Deletes an object, updating its version, timestamp and tombstone
    /// flag in place.
    pub fn del_object(&self, object: &mut KvObject) -> StoreResult<()> {
        let stamp = self.del(&object.key, object.version)?;
        object.version = stamp.version;
        object.last_modified_ms = stamp.timestamp_ms;
        object.deleted = true;
        Ok(())
    }
}
