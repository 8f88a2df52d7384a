//! Auxiliary stores owned by a connection next to the records storage.

use crate::error::{CoreError, CoreResult};
use fsrecords_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::fmt;
use std::path::Path;

/// How a connection opens its stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// The store is being created from scratch; files do not exist yet.
    Create,
    /// The store exists and must be validated.
    Open,
}

/// A store that joins a connection's lifecycle: it is opened with the
/// connection, forced by it, and closed with it.
pub trait AuxiliaryStore: Send + Sync + fmt::Debug {
    /// Name of the store, unique within a connection.
    fn name(&self) -> &str;

    /// Flushes pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Surfaces any I/O failure.
    fn force(&self) -> CoreResult<()>;

    /// Forces and releases the store. Idempotent.
    ///
    /// # Errors
    ///
    /// Surfaces any I/O failure of the final force.
    fn close(&self) -> CoreResult<()>;

    /// Returns true if there are writes not yet forced.
    fn is_dirty(&self) -> bool;
}

/// Opens a caller-supplied auxiliary store inside a store directory.
///
/// Stores returned by an opener are owned by the connection: they are
/// closed on every failed open and on disconnect, and their files are
/// deleted with the rest of the directory on rebuild.
pub trait AuxiliaryStoreOpener: Send + Sync {
    /// Name of the store the opener produces.
    fn name(&self) -> &str;

    /// Opens or creates the store in `dir`.
    ///
    /// # Errors
    ///
    /// Should return [`CoreError::Corrupted`] when existing files fail
    /// validation, so the connector can rebuild the store.
    fn open(&self, dir: &Path, mode: OpenMode, read_only: bool) -> CoreResult<Box<dyn AuxiliaryStore>>;
}

/// Byte backend of an auxiliary file, and whether it starts out empty.
pub(crate) struct AuxFile {
    pub(crate) backend: Box<dyn StorageBackend>,
    pub(crate) fresh: bool,
}

/// Opens the byte backend of an auxiliary file.
///
/// `Create` starts from an empty file. `Open` requires the file to exist
/// unless `create_if_missing` is set; a read-only store whose file is
/// missing gets an empty in-memory backend.
pub(crate) fn open_backend(
    path: &Path,
    mode: OpenMode,
    read_only: bool,
    create_if_missing: bool,
) -> CoreResult<AuxFile> {
    let exists = path.is_file();
    let (backend, fresh): (Box<dyn StorageBackend>, bool) = match (mode, exists, read_only) {
        (OpenMode::Open, true, true) => (Box::new(FileBackend::open_read_only(path)?), false),
        (OpenMode::Open, true, false) => (Box::new(FileBackend::open(path)?), false),
        (OpenMode::Open, false, _) if !create_if_missing => {
            return Err(CoreError::corrupted(format!(
                "store file {} is missing",
                path.display()
            )));
        }
        (_, false, true) => (Box::new(InMemoryBackend::new()), true),
        (OpenMode::Create, true, true) => (Box::new(FileBackend::open_read_only(path)?), false),
        (_, _, false) => {
            let mut backend = FileBackend::open_with_create_dirs(path)?;
            if mode == OpenMode::Create {
                backend.set_len(0)?;
            }
            (Box::new(backend), mode == OpenMode::Create || !exists)
        }
    };
    Ok(AuxFile { backend, fresh })
}

/// Writes the 8-byte header shared by the auxiliary file formats into a
/// fresh file, or validates it in an existing one.
pub(crate) fn init_file_header(
    file: &mut AuxFile,
    magic: [u8; 4],
    version: u16,
    read_only: bool,
    label: &str,
) -> CoreResult<()> {
    let backend = file.backend.as_mut();
    if file.fresh {
        if !read_only {
            let mut header = [0u8; AUX_HEADER_SIZE];
            header[0..4].copy_from_slice(&magic);
            header[4..6].copy_from_slice(&version.to_le_bytes());
            backend.write_at(0, &header)?;
        }
        return Ok(());
    }
    let size = backend.size()?;
    if size < AUX_HEADER_SIZE as u64 {
        return Err(CoreError::corrupted(format!(
            "{label}: file is {size} bytes, shorter than its header"
        )));
    }
    let header = backend.read_at(0, AUX_HEADER_SIZE)?;
    if header[0..4] != magic {
        return Err(CoreError::corrupted(format!(
            "{label}: invalid magic {:?}",
            &header[0..4]
        )));
    }
    let found = u16::from_le_bytes([header[4], header[5]]);
    if found != version {
        return Err(CoreError::corrupted(format!(
            "{label}: unsupported format version {found}"
        )));
    }
    Ok(())
}

/// Size of the auxiliary file header.
pub(crate) const AUX_HEADER_SIZE: usize = 8;

pub(crate) fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
