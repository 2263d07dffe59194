//! Ledger record framing and serialization.
//!
//! The ledger log is a sequence of framed records over a storage backend:
//!
//! ```text
//! magic (4) | format (2) | type (1) | payload_len (4) | payload | crc32 (4)
//! ```
//!
//! All integers are little-endian. The CRC covers everything before it.
//! A frame that fails structural validation ends replay; the ledger
//! truncates the log back to the last valid frame (torn-tail recovery).

use crate::error::{StoreError, StoreResult};
use vaultkv_storage::{StorageBackend, StorageError};

/// Magic bytes identifying a ledger frame.
pub const LEDGER_MAGIC: [u8; 4] = *b"VKVL";

/// Current ledger format version.
pub const LEDGER_FORMAT: u16 = 1;

/// Envelope size before the payload.
/// magic (4) + format (2) + type (1) + length (4) = 11 bytes
pub(crate) const FRAME_HEADER_SIZE: usize = 11;

/// CRC trailer size.
pub(crate) const CRC_SIZE: usize = 4;

/// Type of ledger record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LedgerRecordType {
    /// Format bootstrap record, first record of a new log.
    Header = 1,
    /// A versioned key-value row.
    Row = 2,
}

impl LedgerRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Header),
            2 => Some(Self::Row),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One versioned row of the ledger.
///
/// The current value for a key is the row with the highest `version`.
/// Rows are never rewritten; `set`/`del`/`set_remote_version` each append
/// a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRow {
    /// Key name.
    pub key: String,
    /// Local version, strictly increasing from 1 per key.
    pub version: u64,
    /// Remote version this row was last reconciled against (0 = never).
    pub remote_version: u64,
    /// Wall-clock timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Tombstone marker.
    pub deleted: bool,
    /// Value bytes. Ciphertext when at-rest encryption is enabled;
    /// empty for tombstones.
    pub value: Vec<u8>,
}

/// A ledger record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerRecord {
    /// Format bootstrap record.
    Header {
        /// Ledger format version the log was created with.
        format: u16,
    },
    /// A versioned key-value row.
    Row(RecordRow),
}

impl LedgerRecord {
    /// Maximum value size in a row. The frame length field is 4 bytes.
    pub const MAX_VALUE_SIZE: usize = u32::MAX as usize;

    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> LedgerRecordType {
        match self {
            Self::Header { .. } => LedgerRecordType::Header,
            Self::Row(_) => LedgerRecordType::Row,
        }
    }

    /// Serializes the record payload (without envelope).
    pub fn encode_payload(&self) -> StoreResult<Vec<u8>> {
        let mut buf = Vec::new();

        match self {
            Self::Header { format } => {
                buf.extend_from_slice(&format.to_le_bytes());
            }

            Self::Row(row) => {
                if row.key.len() > u16::MAX as usize {
                    return Err(StoreError::malformed("key too long for row encoding"));
                }
                if row.value.len() > Self::MAX_VALUE_SIZE {
                    return Err(StoreError::malformed(format!(
                        "value too large: {} bytes",
                        row.value.len()
                    )));
                }

                buf.extend_from_slice(&(row.key.len() as u16).to_le_bytes());
                buf.extend_from_slice(row.key.as_bytes());
                buf.extend_from_slice(&row.version.to_le_bytes());
                buf.extend_from_slice(&row.remote_version.to_le_bytes());
                buf.extend_from_slice(&row.timestamp_ms.to_le_bytes());
                buf.push(u8::from(row.deleted));
                buf.extend_from_slice(&(row.value.len() as u32).to_le_bytes());
                buf.extend_from_slice(&row.value);
            }
        }

        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    pub fn decode_payload(record_type: LedgerRecordType, payload: &[u8]) -> StoreResult<Self> {
        let mut cursor = 0usize;

        let read_u16 = |cursor: &mut usize| -> StoreResult<u16> {
            let end = *cursor + 2;
            if end > payload.len() {
                return Err(StoreError::malformed("unexpected end of payload"));
            }
            let bytes: [u8; 2] = payload[*cursor..end]
                .try_into()
                .map_err(|_| StoreError::malformed("invalid u16"))?;
            *cursor = end;
            Ok(u16::from_le_bytes(bytes))
        };

        let read_u32 = |cursor: &mut usize| -> StoreResult<u32> {
            let end = *cursor + 4;
            if end > payload.len() {
                return Err(StoreError::malformed("unexpected end of payload"));
            }
            let bytes: [u8; 4] = payload[*cursor..end]
                .try_into()
                .map_err(|_| StoreError::malformed("invalid u32"))?;
            *cursor = end;
            Ok(u32::from_le_bytes(bytes))
        };

        let read_u64 = |cursor: &mut usize| -> StoreResult<u64> {
            let end = *cursor + 8;
            if end > payload.len() {
                return Err(StoreError::malformed("unexpected end of payload"));
            }
            let bytes: [u8; 8] = payload[*cursor..end]
                .try_into()
                .map_err(|_| StoreError::malformed("invalid u64"))?;
            *cursor = end;
            Ok(u64::from_le_bytes(bytes))
        };

        match record_type {
            LedgerRecordType::Header => {
                let format = read_u16(&mut cursor)?;
                if cursor != payload.len() {
                    return Err(StoreError::malformed("trailing bytes in header record"));
                }
                Ok(Self::Header { format })
            }

            LedgerRecordType::Row => {
                let key_len = read_u16(&mut cursor)? as usize;
                if cursor + key_len > payload.len() {
                    return Err(StoreError::malformed("unexpected end of key"));
                }
                let key = std::str::from_utf8(&payload[cursor..cursor + key_len])
                    .map_err(|_| StoreError::malformed("key is not valid UTF-8"))?
                    .to_owned();
                cursor += key_len;

                let version = read_u64(&mut cursor)?;
                let remote_version = read_u64(&mut cursor)?;
                let timestamp_ms = read_u64(&mut cursor)?;

                if cursor >= payload.len() {
                    return Err(StoreError::malformed("unexpected end of payload"));
                }
                let deleted = payload[cursor] != 0;
                cursor += 1;

                let value_len = read_u32(&mut cursor)? as usize;
                if cursor + value_len > payload.len() {
                    return Err(StoreError::malformed("unexpected end of value"));
                }
                let value = payload[cursor..cursor + value_len].to_vec();
                cursor += value_len;

                if cursor != payload.len() {
                    return Err(StoreError::malformed("trailing bytes in row record"));
                }

                Ok(Self::Row(RecordRow {
                    key,
                    version,
                    remote_version,
                    timestamp_ms,
                    deleted,
                    value,
                }))
            }
        }
    }

    /// Serializes the record with its full frame envelope and CRC trailer.
    pub fn encode_frame(&self) -> StoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;

        let mut data = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&LEDGER_MAGIC);
        data.extend_from_slice(&LEDGER_FORMAT.to_le_bytes());
        data.push(self.record_type().as_byte());

        let len = u32::try_from(payload.len())
            .map_err(|_| StoreError::malformed("record payload too large"))?;
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());

        Ok(data)
    }
}

/// Result of decoding one frame during replay.
#[derive(Debug)]
pub(crate) struct FrameDecode {
    /// The decoded record.
    pub record: LedgerRecord,
    /// Total frame length in bytes (envelope + payload + CRC).
    pub frame_len: u64,
}

/// Decodes the frame starting at `offset`, or `None` at clean end-of-log.
///
/// Any structural failure (short frame, bad magic, unsupported format,
/// CRC mismatch) is an error; the caller decides whether to truncate.
pub(crate) fn decode_frame_at(
    backend: &dyn StorageBackend,
    offset: u64,
) -> StoreResult<Option<FrameDecode>> {
    let size = backend.size()?;
    if offset == size {
        return Ok(None);
    }

    let header = match backend.read_at(offset, FRAME_HEADER_SIZE) {
        Ok(bytes) => bytes,
        Err(StorageError::ReadPastEnd { .. }) => {
            return Err(StoreError::malformed("torn frame header"));
        }
        Err(e) => return Err(e.into()),
    };

    if header[..4] != LEDGER_MAGIC {
        return Err(StoreError::malformed("bad frame magic"));
    }

    let format = u16::from_le_bytes([header[4], header[5]]);
    if format > LEDGER_FORMAT {
        return Err(StoreError::InvalidFormat {
            found: format,
            supported: LEDGER_FORMAT,
        });
    }

    let record_type = LedgerRecordType::from_byte(header[6])
        .ok_or_else(|| StoreError::malformed("unknown record type"))?;

    let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

    let body = match backend.read_at(
        offset + FRAME_HEADER_SIZE as u64,
        payload_len + CRC_SIZE,
    ) {
        Ok(bytes) => bytes,
        Err(StorageError::ReadPastEnd { .. }) => {
            return Err(StoreError::malformed("torn frame body"));
        }
        Err(e) => return Err(e.into()),
    };

    let (payload, crc_bytes) = body.split_at(payload_len);

    let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let mut crc_input = header;
    crc_input.extend_from_slice(payload);
    let computed = compute_crc32(&crc_input);
    if computed != stored_crc {
        return Err(StoreError::malformed(format!(
            "frame CRC mismatch: stored {stored_crc:08x}, computed {computed:08x}"
        )));
    }

    let record = LedgerRecord::decode_payload(record_type, payload)?;
    let frame_len = (FRAME_HEADER_SIZE + payload_len + CRC_SIZE) as u64;

    Ok(Some(FrameDecode { record, frame_len }))
}

/// Computes a CRC32 checksum (IEEE polynomial).
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
