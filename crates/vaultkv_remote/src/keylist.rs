//! Binary codec for the server's full key listing.
//!
//! The `GET /kv/_all_keys` response body is a compact little-endian
//! listing:
//!
//! ```text
//! count (u32)
//! count * ( key_len (u32) | key utf8 | version (u64) | timestamp_ms (u64) | deleted (u8) )
//! ```

use crate::adaptor::RemoteKeyInfo;
use crate::error::RemoteStatus;
use thiserror::Error;

/// Errors produced while decoding a key listing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyListError {
    /// The buffer ended before the announced entries were read.
    #[error("truncated key listing at byte {offset}")]
    Truncated {
        /// Offset at which the listing ran out of bytes.
        offset: usize,
    },

    /// A key was not valid UTF-8.
    #[error("key listing entry {index} is not valid UTF-8")]
    InvalidKey {
        /// Index of the bad entry.
        index: u32,
    },

    /// The listing carried bytes past the announced entries.
    #[error("trailing bytes after key listing")]
    TrailingBytes,

    /// A key exceeds the encodable length.
    #[error("key too long for listing encoding")]
    KeyTooLong,
}

/// Encodes a key listing into the wire format.
pub fn encode_key_list(entries: &[RemoteKeyInfo]) -> Result<Vec<u8>, KeyListError> {
    let mut buf = Vec::with_capacity(4 + entries.len() * 32);
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());

    for entry in entries {
        let key_len =
            u32::try_from(entry.key.len()).map_err(|_| KeyListError::KeyTooLong)?;
        buf.extend_from_slice(&key_len.to_le_bytes());
        buf.extend_from_slice(entry.key.as_bytes());
        buf.extend_from_slice(&entry.version.to_le_bytes());
        buf.extend_from_slice(&entry.timestamp_ms.to_le_bytes());
        buf.push(u8::from(entry.status == RemoteStatus::Tombstone));
    }

    Ok(buf)
}

/// Decodes a key listing from the wire format.
pub fn decode_key_list(data: &[u8]) -> Result<Vec<RemoteKeyInfo>, KeyListError> {
    let mut offset = 0usize;

    let read_u32 = |offset: &mut usize| -> Result<u32, KeyListError> {
        let end = *offset + 4;
        let bytes: [u8; 4] = data
            .get(*offset..end)
            .and_then(|s| s.try_into().ok())
            .ok_or(KeyListError::Truncated { offset: *offset })?;
        *offset = end;
        Ok(u32::from_le_bytes(bytes))
    };

    let read_u64 = |offset: &mut usize| -> Result<u64, KeyListError> {
        let end = *offset + 8;
        let bytes: [u8; 8] = data
            .get(*offset..end)
            .and_then(|s| s.try_into().ok())
            .ok_or(KeyListError::Truncated { offset: *offset })?;
        *offset = end;
        Ok(u64::from_le_bytes(bytes))
    };

    let count = read_u32(&mut offset)?;
    let mut entries = Vec::with_capacity(count.min(1024) as usize);

    for index in 0..count {
        let key_len = read_u32(&mut offset)? as usize;
        let key_bytes = data
            .get(offset..offset + key_len)
            .ok_or(KeyListError::Truncated { offset })?;
        let key = std::str::from_utf8(key_bytes)
            .map_err(|_| KeyListError::InvalidKey { index })?
            .to_owned();
        offset += key_len;

        let version = read_u64(&mut offset)?;
        let timestamp_ms = read_u64(&mut offset)?;

        let deleted = *data.get(offset).ok_or(KeyListError::Truncated { offset })? != 0;
        offset += 1;

        entries.push(RemoteKeyInfo {
            key,
            version,
            timestamp_ms,
            status: if deleted {
                RemoteStatus::Tombstone
            } else {
                RemoteStatus::Ok
            },
        });
    }

    if offset != data.len() {
        return Err(KeyListError::TrailingBytes);
    }

    Ok(entries)
}
