//! The records storage contract shared by every backend.

use crate::error::{StorageError, StorageResult};
use crate::header::{ConnectionStatus, Header, HEADER_SIZE};
use crate::kind::StorageKind;
use crate::layout::{RecordField, RecordId, RecordLayout, NULL_ID};
use std::io;
use std::path::Path;

/// A fixed-width record array with a versioned header.
///
/// Records are addressed by 1-based ids handed out by
/// [`allocate_record`](Self::allocate_record); ids are never reused while
/// the storage is open. Every method takes `&self`: backends synchronize
/// internally so one storage can be shared between threads.
///
/// # Invariants
///
/// - Accessing id `0` or an id above [`records_count`](Self::records_count)
///   fails with [`StorageError::IndexOutOfRange`] and leaves the storage intact.
/// - After [`force`](Self::force) returns, every write that returned before
///   it began is durable.
/// - After [`close`](Self::close), every operation fails with
///   [`StorageError::Closed`]; closing twice is a no-op.
/// - Read-only storages reject every mutation with [`StorageError::ReadOnly`].
///
/// # Implementors
///
/// - [`super::PagedFileRecords`]
/// - [`super::LockFreeCacheRecords`]
/// - [`super::MappedFileRecords`]
pub trait RecordsStorage: Send + Sync {
    /// Backend kind of this storage.
    fn kind(&self) -> StorageKind;

    /// Layout of the record array.
    fn layout(&self) -> RecordLayout;

    /// Allocates a new zeroed record and returns its id.
    ///
    /// # Errors
    ///
    /// Fails if the storage is closed, read-only, or cannot grow.
    fn allocate_record(&self) -> StorageResult<RecordId>;

    /// Zeroes every field of an allocated record.
    ///
    /// # Errors
    ///
    /// Fails on out-of-range ids or if the storage is closed or read-only.
    fn clean_record(&self, id: RecordId) -> StorageResult<()>;

    /// Reads a 4-byte field.
    ///
    /// # Errors
    ///
    /// Fails on out-of-range ids, 8-byte fields, or a closed storage.
    fn get_int(&self, id: RecordId, field: RecordField) -> StorageResult<i32>;

    /// Writes a 4-byte field.
    ///
    /// # Errors
    ///
    /// Fails on out-of-range ids, 8-byte fields, or a closed/read-only storage.
    fn set_int(&self, id: RecordId, field: RecordField, value: i32) -> StorageResult<()>;

    /// Reads an 8-byte field.
    ///
    /// # Errors
    ///
    /// Fails on out-of-range ids, 4-byte fields, or a closed storage.
    fn get_long(&self, id: RecordId, field: RecordField) -> StorageResult<i64>;

    /// Writes an 8-byte field.
    ///
    /// # Errors
    ///
    /// Fails on out-of-range ids, 4-byte fields, or a closed/read-only storage.
    fn set_long(&self, id: RecordId, field: RecordField, value: i64) -> StorageResult<()>;

    /// Highest allocated record id (0 for an empty storage).
    fn records_count(&self) -> u32;

    /// Snapshot of the header as it would be written now.
    fn header(&self) -> Header;

    /// Sets the format version.
    ///
    /// # Errors
    ///
    /// Fails if the storage is closed or read-only.
    fn set_version(&self, version: u32) -> StorageResult<()>;

    /// Sets the creation timestamp.
    ///
    /// # Errors
    ///
    /// Fails if the storage is closed or read-only.
    fn set_timestamp(&self, timestamp: i64) -> StorageResult<()>;

    /// Sets the connection status.
    ///
    /// # Errors
    ///
    /// Fails if the storage is closed or read-only.
    fn set_connection_status(&self, status: ConnectionStatus) -> StorageResult<()>;

    /// Returns true if there are writes not yet forced to disk.
    fn is_dirty(&self) -> bool;

    /// Returns true if the storage rejects mutations.
    fn is_read_only(&self) -> bool;

    /// Flushes records and header to durable storage.
    ///
    /// # Errors
    ///
    /// Surfaces any I/O failure.
    fn force(&self) -> StorageResult<()>;

    /// Forces and releases the storage. Idempotent.
    ///
    /// # Errors
    ///
    /// Surfaces any I/O failure of the final force; resources are released
    /// regardless.
    fn close(&self) -> StorageResult<()>;

    /// Returns true once [`close`](Self::close) has been called.
    fn is_closed(&self) -> bool;

    /// Format version stored in the header.
    fn version(&self) -> u32 {
        self.header().format_version
    }

    /// Creation timestamp stored in the header.
    fn timestamp(&self) -> i64 {
        self.header().created_at
    }

    /// Connection status stored in the header.
    fn connection_status(&self) -> ConnectionStatus {
        self.header().status
    }

    /// Global modification counter.
    fn global_mod_count(&self) -> u32 {
        self.header().global_mod_count
    }

    /// Parent reference of a record.
    ///
    /// # Errors
    ///
    /// See [`get_int`](Self::get_int).
    fn parent(&self, id: RecordId) -> StorageResult<RecordId> {
        self.get_int(id, RecordField::Parent).map(|v| v as u32)
    }

    /// Sets the parent reference of a record.
    ///
    /// # Errors
    ///
    /// See [`set_int`](Self::set_int).
    fn set_parent(&self, id: RecordId, parent: RecordId) -> StorageResult<()> {
        self.set_int(id, RecordField::Parent, parent as i32)
    }

    /// Name reference of a record.
    ///
    /// # Errors
    ///
    /// See [`get_int`](Self::get_int).
    fn name_ref(&self, id: RecordId) -> StorageResult<u32> {
        self.get_int(id, RecordField::Name).map(|v| v as u32)
    }

    /// Sets the name reference of a record.
    ///
    /// # Errors
    ///
    /// See [`set_int`](Self::set_int).
    fn set_name_ref(&self, id: RecordId, name: u32) -> StorageResult<()> {
        self.set_int(id, RecordField::Name, name as i32)
    }

    /// Flags of a record.
    ///
    /// # Errors
    ///
    /// See [`get_int`](Self::get_int).
    fn flags(&self, id: RecordId) -> StorageResult<i32> {
        self.get_int(id, RecordField::Flags)
    }

    /// Sets the flags of a record.
    ///
    /// # Errors
    ///
    /// See [`set_int`](Self::set_int).
    fn set_flags(&self, id: RecordId, flags: i32) -> StorageResult<()> {
        self.set_int(id, RecordField::Flags, flags)
    }

    /// Attribute reference of a record.
    ///
    /// # Errors
    ///
    /// See [`get_int`](Self::get_int).
    fn attribute_ref(&self, id: RecordId) -> StorageResult<u32> {
        self.get_int(id, RecordField::Attributes).map(|v| v as u32)
    }

    /// Sets the attribute reference of a record.
    ///
    /// # Errors
    ///
    /// See [`set_int`](Self::set_int).
    fn set_attribute_ref(&self, id: RecordId, attribute: u32) -> StorageResult<()> {
        self.set_int(id, RecordField::Attributes, attribute as i32)
    }

    /// Content reference of a record.
    ///
    /// # Errors
    ///
    /// See [`get_int`](Self::get_int).
    fn content_ref(&self, id: RecordId) -> StorageResult<u32> {
        self.get_int(id, RecordField::Content).map(|v| v as u32)
    }

    /// Sets the content reference of a record.
    ///
    /// # Errors
    ///
    /// See [`set_int`](Self::set_int).
    fn set_content_ref(&self, id: RecordId, content: u32) -> StorageResult<()> {
        self.set_int(id, RecordField::Content, content as i32)
    }

    /// Per-record modification counter.
    ///
    /// # Errors
    ///
    /// See [`get_int`](Self::get_int).
    fn mod_count(&self, id: RecordId) -> StorageResult<i32> {
        self.get_int(id, RecordField::ModCount)
    }

    /// Record timestamp.
    ///
    /// # Errors
    ///
    /// See [`get_long`](Self::get_long).
    fn record_timestamp(&self, id: RecordId) -> StorageResult<i64> {
        self.get_long(id, RecordField::Timestamp)
    }

    /// Sets the record timestamp.
    ///
    /// # Errors
    ///
    /// See [`set_long`](Self::set_long).
    fn set_record_timestamp(&self, id: RecordId, timestamp: i64) -> StorageResult<()> {
        self.set_long(id, RecordField::Timestamp, timestamp)
    }

    /// Content length of a record.
    ///
    /// # Errors
    ///
    /// See [`get_long`](Self::get_long).
    fn length(&self, id: RecordId) -> StorageResult<i64> {
        self.get_long(id, RecordField::Length)
    }

    /// Sets the content length of a record.
    ///
    /// # Errors
    ///
    /// See [`set_long`](Self::set_long).
    fn set_length(&self, id: RecordId, length: i64) -> StorageResult<()> {
        self.set_long(id, RecordField::Length, length)
    }
}

/// Bounds check shared by the backends.
pub(crate) fn check_id(id: RecordId, records_count: u32) -> StorageResult<()> {
    if id == NULL_ID || id > records_count {
        return Err(StorageError::IndexOutOfRange { id, records_count });
    }
    Ok(())
}

/// Rejects accessing an 8-byte field through the 4-byte accessors and
/// vice versa.
pub(crate) fn check_width(field: RecordField, expected: crate::layout::FieldWidth) -> StorageResult<()> {
    if field.width() != expected {
        return Err(StorageError::InvalidLayout(format!(
            "field {field:?} is {:?}, accessed as {expected:?}",
            field.width()
        )));
    }
    Ok(())
}

/// How the length of a records file relates to the records it holds.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FileExtent {
    /// Exactly the header plus the records.
    Exact,
    /// Rounded up to a multiple of the given number of bytes.
    Granular(u64),
}

/// Fails unless a file of `len` bytes can hold a header.
pub(crate) fn ensure_header_fits(len: u64) -> StorageResult<()> {
    if len < HEADER_SIZE as u64 {
        return Err(StorageError::corrupted(format!(
            "records file is {len} bytes, shorter than the header"
        )));
    }
    Ok(())
}

/// Decodes the header of an existing records file of `len` bytes and
/// checks it against the backend opening it.
pub(crate) fn validate_header(
    bytes: &[u8],
    len: u64,
    kind: StorageKind,
    layout: RecordLayout,
    extent: FileExtent,
) -> StorageResult<Header> {
    let header = Header::decode(bytes)?;
    header.ensure_kind(kind)?;
    header.ensure_layout(layout)?;

    let needed = layout.data_size(header.records_count);
    let fits = match extent {
        FileExtent::Exact => len == needed,
        FileExtent::Granular(granule) => len % granule == 0 && len >= needed,
    };
    if !fits {
        return Err(StorageError::corrupted(format!(
            "records file is {len} bytes, {} records of {} bytes need {needed}",
            header.records_count,
            layout.record_size()
        )));
    }
    Ok(header)
}

/// Error for a read-only open of a records file that does not exist.
pub(crate) fn missing_records_file(path: &Path) -> StorageError {
    StorageError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("records file {} does not exist", path.display()),
    ))
}

/// Id following `records_count`.
pub(crate) fn next_record_id(records_count: u32) -> StorageResult<RecordId> {
    records_count
        .checked_add(1)
        .ok_or_else(|| StorageError::corrupted("record id space exhausted"))
}
