//! The header block at the start of every records file.
//!
//! ```text
//! offset  size  field
//! 0       4     magic "FSRS"
//! 4       2     header layout version
//! 6       1     storage kind tag
//! 7       1     record size in 8-byte words
//! 8       4     format version (caller's implementation version)
//! 12      4     connection status tag
//! 16      8     creation timestamp (epoch millis)
//! 24      4     CRC32 of bytes 0..24
//! 28      4     global modification count
//! 32      4     records count
//! 36      28    reserved
//! ```
//!
//! The checksum covers the identity of the store (kind, record size,
//! version, status, creation time). The two counters change on every allocation or write
//! and are validated against the file size instead.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::kind::StorageKind;
use crate::layout::RecordLayout;
use crc32fast::Hasher;
use std::fmt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Magic bytes identifying a records file.
pub const HEADER_MAGIC: [u8; 4] = *b"FSRS";

/// Current header layout version.
pub const HEADER_LAYOUT_VERSION: u16 = 1;

/// Size of the header block in bytes.
pub const HEADER_SIZE: usize = 64;

const CHECKSUMMED_LEN: usize = 24;

const CONNECTED_MAGIC: u32 = 0x12AD_34E0;
const SAFELY_CLOSED_MAGIC: u32 = 0x1F34_D2E1;
const CORRUPTED_MAGIC: u32 = 0xABCF_7F7A;

/// Connection status recorded in the header.
///
/// Tags are sparse 32-bit values so a zeroed or torn header never reads as
/// a valid status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// A connection is (or was, if the process died) open.
    Connected,
    /// The last connection was closed cleanly.
    SafelyClosed,
    /// A rebuild was explicitly requested.
    Corrupted,
    /// Any other value found on disk.
    Unknown(u32),
}

impl ConnectionStatus {
    /// Converts a raw on-disk tag to a status.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            CONNECTED_MAGIC => Self::Connected,
            SAFELY_CLOSED_MAGIC => Self::SafelyClosed,
            CORRUPTED_MAGIC => Self::Corrupted,
            other => Self::Unknown(other),
        }
    }

    /// Returns the raw on-disk tag.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        match self {
            Self::Connected => CONNECTED_MAGIC,
            Self::SafelyClosed => SAFELY_CLOSED_MAGIC,
            Self::Corrupted => CORRUPTED_MAGIC,
            Self::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => f.write_str("CONNECTED"),
            Self::SafelyClosed => f.write_str("SAFELY_CLOSED"),
            Self::Corrupted => f.write_str("CORRUPTED"),
            Self::Unknown(raw) => write!(f, "UNKNOWN({raw:#010x})"),
        }
    }
}

/// Decoded header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Backend that wrote the file.
    pub kind: StorageKind,
    /// Width of one record in bytes.
    pub record_size: usize,
    /// Caller-supplied implementation version.
    pub format_version: u32,
    /// Connection status.
    pub status: ConnectionStatus,
    /// Creation timestamp in epoch milliseconds.
    pub created_at: i64,
    /// Incremented on every record mutation.
    pub global_mod_count: u32,
    /// Highest allocated record id.
    pub records_count: u32,
}

impl Header {
    /// Header of a freshly created store: version 0, safely closed,
    /// created now.
    #[must_use]
    pub fn new(kind: StorageKind, layout: RecordLayout) -> Self {
        Self {
            kind,
            record_size: layout.record_size(),
            format_version: 0,
            status: ConnectionStatus::SafelyClosed,
            created_at: current_time_millis(),
            global_mod_count: 0,
            records_count: 0,
        }
    }

    /// Encodes the header to its on-disk form.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&HEADER_MAGIC);
        buf[4..6].copy_from_slice(&HEADER_LAYOUT_VERSION.to_le_bytes());
        buf[6] = self.kind.tag();
        buf[7] = (self.record_size / 8) as u8;
        buf[8..12].copy_from_slice(&self.format_version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.status.as_raw().to_le_bytes());
        buf[16..24].copy_from_slice(&self.created_at.to_le_bytes());
        let crc = compute_checksum(&buf[..CHECKSUMMED_LEN]);
        buf[24..28].copy_from_slice(&crc.to_le_bytes());
        buf[28..32].copy_from_slice(&self.global_mod_count.to_le_bytes());
        buf[32..36].copy_from_slice(&self.records_count.to_le_bytes());
        buf
    }

    /// Decodes and validates a header.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupted`] if the buffer is short, the magic,
    /// layout version or kind tag are unknown, or the checksum does not match.
    pub fn decode(data: &[u8]) -> StorageResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(StorageError::corrupted(format!(
                "header too short: {} bytes",
                data.len()
            )));
        }
        if data[0..4] != HEADER_MAGIC {
            return Err(StorageError::corrupted(format!(
                "invalid header magic: {:?}",
                &data[0..4]
            )));
        }

        let layout_version = u16::from_le_bytes([data[4], data[5]]);
        if layout_version != HEADER_LAYOUT_VERSION {
            return Err(StorageError::corrupted(format!(
                "unsupported header layout version: {layout_version}"
            )));
        }

        let stored_crc = read_u32(data, 24);
        let computed_crc = compute_checksum(&data[..CHECKSUMMED_LEN]);
        if stored_crc != computed_crc {
            return Err(StorageError::corrupted(format!(
                "header checksum mismatch: stored {stored_crc:08x}, computed {computed_crc:08x}"
            )));
        }

        let kind = StorageKind::from_tag(data[6])
            .ok_or_else(|| StorageError::corrupted(format!("unknown storage kind tag {}", data[6])))?;
        let record_size = usize::from(data[7]) * 8;
        if RecordLayout::new(record_size).is_err() {
            return Err(StorageError::corrupted(format!(
                "invalid record size {record_size} in header"
            )));
        }

        Ok(Self {
            kind,
            record_size,
            format_version: read_u32(data, 8),
            status: ConnectionStatus::from_raw(read_u32(data, 12)),
            created_at: read_i64(data, 16),
            global_mod_count: read_u32(data, 28),
            records_count: read_u32(data, 32),
        })
    }

    /// Reads the header of a records file without opening a backend.
    ///
    /// Used to probe a store before deciding whether it can be opened.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file is missing, or
    /// [`StorageError::Corrupted`] if it is too short or invalid.
    pub fn read_from(path: &Path) -> StorageResult<Self> {
        let backend = FileBackend::open_read_only(path)?;
        let size = backend.size()?;
        if size < HEADER_SIZE as u64 {
            return Err(StorageError::corrupted(format!(
                "records file {} is {size} bytes, shorter than the header",
                path.display()
            )));
        }
        Self::decode(&backend.read_at(0, HEADER_SIZE)?)
    }

    /// Checks that the header was written by the `expected` backend.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::KindMismatch`] otherwise.
    pub fn ensure_kind(&self, expected: StorageKind) -> StorageResult<()> {
        if self.kind != expected {
            return Err(StorageError::KindMismatch {
                expected,
                found: self.kind,
            });
        }
        Ok(())
    }

    /// Checks that records in the file are `expected` wide.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LayoutMismatch`] otherwise.
    pub fn ensure_layout(&self, expected: RecordLayout) -> StorageResult<()> {
        if self.record_size != expected.record_size() {
            return Err(StorageError::LayoutMismatch {
                expected: expected.record_size(),
                found: self.record_size,
            });
        }
        Ok(())
    }
}

/// Computes the CRC32 (IEEE) checksum used by every fsrecords file format.
#[must_use]
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn current_time_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn read_i64(data: &[u8], offset: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    i64::from_le_bytes(bytes)
}
