//! Log record framing for the file store.
//!
//! Every mutation of a [`crate::FileStore`] is appended as one record:
//!
//! ```text
//! | magic (4) | version (2) | type (1) | key_len (4) | value_len (4) | key | value | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The CRC covers the header, key and value.

use crate::error::{StorageError, StorageResult};

/// Magic bytes identifying a log record.
pub const LOG_MAGIC: [u8; 4] = *b"LSKV";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

/// Size of the fixed record header.
pub(crate) const HEADER_SIZE: usize = 15;

/// Size of the trailing checksum.
pub(crate) const CRC_SIZE: usize = 4;

/// Type of log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// Key was written.
    Put = 1,
    /// Key was removed.
    Delete = 2,
}

impl LogRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Put),
            2 => Some(Self::Delete),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One entry of the store log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Whether the key was written or removed.
    pub record_type: LogRecordType,
    /// The affected key.
    pub key: String,
    /// The new value (empty for deletes).
    pub value: Vec<u8>,
}

impl LogRecord {
    /// Creates a put record.
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            record_type: LogRecordType::Put,
            key: key.into(),
            value: value.into(),
        }
    }

    /// Creates a delete record.
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            record_type: LogRecordType::Delete,
            key: key.into(),
            value: Vec::new(),
        }
    }

    /// Returns the encoded length of this record.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.key.len() + self.value.len() + CRC_SIZE
    }

    /// Encodes the record into its on-disk frame.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&LOG_MAGIC);
        buf.extend_from_slice(&LOG_VERSION.to_le_bytes());
        buf.push(self.record_type.as_byte());
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.key.as_bytes());
        buf.extend_from_slice(&self.value);
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes one record from the start of `buf`.
    ///
    /// `offset` is the position of `buf` within the log and is only used in
    /// error messages. Returns `Ok(None)` if `buf` ends before the record does
    /// (a torn write at the tail of the log).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupted`] on bad magic, an unknown version or
    /// type, a checksum mismatch, or a key that is not UTF-8.
    pub fn decode(buf: &[u8], offset: u64) -> StorageResult<Option<(Self, usize)>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        if buf[0..4] != LOG_MAGIC {
            return Err(StorageError::corrupted(offset, "invalid magic"));
        }

        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version > LOG_VERSION {
            return Err(StorageError::corrupted(
                offset,
                format!("unsupported version {version}"),
            ));
        }

        let record_type = LogRecordType::from_byte(buf[6]).ok_or_else(|| {
            StorageError::corrupted(offset, format!("unknown record type {}", buf[6]))
        })?;

        let key_len = u32::from_le_bytes([buf[7], buf[8], buf[9], buf[10]]) as usize;
        let value_len = u32::from_le_bytes([buf[11], buf[12], buf[13], buf[14]]) as usize;
        let body_end = HEADER_SIZE + key_len + value_len;
        let total_len = body_end + CRC_SIZE;

        if buf.len() < total_len {
            return Ok(None);
        }

        let stored_crc = u32::from_le_bytes([
            buf[body_end],
            buf[body_end + 1],
            buf[body_end + 2],
            buf[body_end + 3],
        ]);
        let computed_crc = compute_crc32(&buf[..body_end]);
        if stored_crc != computed_crc {
            return Err(StorageError::corrupted(
                offset,
                format!("checksum mismatch: expected {stored_crc:08x}, got {computed_crc:08x}"),
            ));
        }

        let key = std::str::from_utf8(&buf[HEADER_SIZE..HEADER_SIZE + key_len])
            .map_err(|_| StorageError::corrupted(offset, "key is not valid UTF-8"))?
            .to_string();
        let value = buf[HEADER_SIZE + key_len..body_end].to_vec();

        if record_type == LogRecordType::Delete && !value.is_empty() {
            return Err(StorageError::corrupted(offset, "delete record carries a value"));
        }

        Ok(Some((
            Self {
                record_type,
                key,
                value,
            },
            total_len,
        )))
    }
}

/// Returns true if `tail`, which failed to decode as a complete record, can
/// only be the remains of an interrupted final append.
///
/// The bytes present must be a prefix of a record header and no later record
/// may start inside them. A length field damaged in the middle of the log
/// fails the second check, because the records after it are still there.
pub(crate) fn is_torn_tail(tail: &[u8]) -> bool {
    let magic_len = tail.len().min(LOG_MAGIC.len());
    if tail[..magic_len] != LOG_MAGIC[..magic_len] {
        return false;
    }
    !tail
        .windows(LOG_MAGIC.len())
        .skip(1)
        .any(|window| window == LOG_MAGIC)
}

/// Computes CRC32 checksum for data.
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, table built at compile time
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
