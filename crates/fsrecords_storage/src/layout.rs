//! Record layout: field offsets and record addressing.

use crate::error::{StorageError, StorageResult};
use crate::header::HEADER_SIZE;

/// Identifier of a record: 1-based index into the record array.
pub type RecordId = u32;

/// The null record reference. Never allocated.
pub const NULL_ID: RecordId = 0;

/// Width of the default record layout in bytes.
pub const DEFAULT_RECORD_SIZE: usize = 40;

/// Widest record the header can describe (one byte of 8-byte words).
pub const MAX_RECORD_SIZE: usize = 255 * 8;

/// Width of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldWidth {
    /// A 4-byte signed integer.
    Int,
    /// An 8-byte signed integer.
    Long,
}

impl FieldWidth {
    /// Returns the width in bytes.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Int => 4,
            Self::Long => 8,
        }
    }
}

/// A field of a record.
///
/// Every field is naturally aligned within the record, and records are
/// 8-byte multiples placed after an 8-byte aligned header, so no field
/// straddles an 8-byte word (and therefore never a page boundary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordField {
    /// Parent record reference.
    Parent,
    /// Reference into the names table.
    Name,
    /// Bookkeeping flags.
    Flags,
    /// Reference into the attributes store.
    Attributes,
    /// Reference into the content store.
    Content,
    /// Per-record modification counter.
    ModCount,
    /// Last-modified timestamp.
    Timestamp,
    /// Content length.
    Length,
}

impl RecordField {
    /// All fields, in layout order.
    pub const ALL: [RecordField; 8] = [
        Self::Parent,
        Self::Name,
        Self::Flags,
        Self::Attributes,
        Self::Content,
        Self::ModCount,
        Self::Timestamp,
        Self::Length,
    ];

    /// Byte offset of the field within a record.
    #[must_use]
    pub const fn offset(self) -> usize {
        match self {
            Self::Parent => 0,
            Self::Name => 4,
            Self::Flags => 8,
            Self::Attributes => 12,
            Self::Content => 16,
            Self::ModCount => 20,
            Self::Timestamp => 24,
            Self::Length => 32,
        }
    }

    /// Width of the field.
    #[must_use]
    pub const fn width(self) -> FieldWidth {
        match self {
            Self::Timestamp | Self::Length => FieldWidth::Long,
            _ => FieldWidth::Int,
        }
    }
}

/// Physical layout of the record array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    record_size: usize,
}

impl Default for RecordLayout {
    fn default() -> Self {
        Self {
            record_size: DEFAULT_RECORD_SIZE,
        }
    }
}

impl RecordLayout {
    /// Creates a layout with the given record width.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidLayout`] if the width is smaller than
    /// [`DEFAULT_RECORD_SIZE`], larger than [`MAX_RECORD_SIZE`] or not a
    /// multiple of 8.
    pub fn new(record_size: usize) -> StorageResult<Self> {
        if record_size < DEFAULT_RECORD_SIZE {
            return Err(StorageError::InvalidLayout(format!(
                "record size {record_size} is smaller than the {DEFAULT_RECORD_SIZE} bytes of fields"
            )));
        }
        if record_size > MAX_RECORD_SIZE {
            return Err(StorageError::InvalidLayout(format!(
                "record size {record_size} exceeds {MAX_RECORD_SIZE} bytes"
            )));
        }
        if record_size % 8 != 0 {
            return Err(StorageError::InvalidLayout(format!(
                "record size {record_size} is not a multiple of 8"
            )));
        }
        Ok(Self { record_size })
    }

    /// Width of one record in bytes.
    #[must_use]
    pub const fn record_size(&self) -> usize {
        self.record_size
    }

    /// Absolute file offset of the first byte of record `id`.
    ///
    /// `id` must be non-null; callers check bounds first.
    #[must_use]
    pub const fn record_offset(&self, id: RecordId) -> u64 {
        HEADER_SIZE as u64 + (id as u64 - 1) * self.record_size as u64
    }

    /// Absolute file offset of `field` of record `id`.
    #[must_use]
    pub const fn field_offset(&self, id: RecordId, field: RecordField) -> u64 {
        self.record_offset(id) + field.offset() as u64
    }

    /// Minimal file size holding the header and `records_count` records.
    #[must_use]
    pub const fn data_size(&self, records_count: u32) -> u64 {
        HEADER_SIZE as u64 + records_count as u64 * self.record_size as u64
    }
}
