//! Append-only checksummed blob store.
//!
//! ```text
//! [magic][version u16][reserved u16]
//! [len u32][crc32 u32][bytes] ...
//! ```
//!
//! Used for attribute payloads (`FSBA`) and file contents (`FSBC`). Blob
//! ids are 1-based in append order.

use crate::aux::{init_file_header, open_backend, read_u32_le, AuxFile, AuxiliaryStore, OpenMode, AUX_HEADER_SIZE};
use crate::error::{CoreError, CoreResult};
use fsrecords_storage::{compute_checksum, StorageBackend, StorageError};
use parking_lot::Mutex;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Magic of the attribute blob file.
pub const ATTRIBUTES_MAGIC: [u8; 4] = *b"FSBA";
/// Magic of the content blob file.
pub const CONTENT_MAGIC: [u8; 4] = *b"FSBC";

const BLOBS_VERSION: u16 = 1;
const ENTRY_HEADER_SIZE: u64 = 8;

/// Identifier of a stored blob.
pub type BlobId = u32;

/// Append-only blob store backed by a single file.
pub struct BlobStore {
    label: String,
    read_only: bool,
    inner: Mutex<BlobsInner>,
}

struct BlobsInner {
    /// `None` once closed.
    backend: Option<Box<dyn StorageBackend>>,
    /// Offset of each entry header, indexed by `id - 1`.
    offsets: Vec<u64>,
    dirty: bool,
}

impl fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BlobStore")
            .field("label", &self.label)
            .field("read_only", &self.read_only)
            .field("len", &inner.offsets.len())
            .field("closed", &inner.backend.is_none())
            .finish()
    }
}

impl BlobStore {
    /// Opens the blob file at `path`. Every entry's checksum is verified.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Corrupted`] if the file is missing in
    /// [`OpenMode::Open`], has a bad header, or holds a truncated entry or
    /// one whose checksum does not match.
    pub fn open(
        path: &Path,
        label: impl Into<String>,
        magic: [u8; 4],
        mode: OpenMode,
        read_only: bool,
    ) -> CoreResult<Self> {
        let label = label.into();
        let mut file = open_backend(path, mode, read_only, false)?;
        init_file_header(&mut file, magic, BLOBS_VERSION, read_only, &label)?;
        let AuxFile { backend, fresh } = file;

        let offsets = if fresh {
            Vec::new()
        } else {
            scan_blobs(backend.as_ref(), &label)?
        };
        debug!(store = %label, blobs = offsets.len(), "opened blob store");

        Ok(Self {
            label,
            read_only,
            inner: Mutex::new(BlobsInner {
                backend: Some(backend),
                offsets,
                dirty: fresh && !read_only,
            }),
        })
    }

    /// Appends a blob and returns its id.
    ///
    /// # Errors
    ///
    /// Fails if the store is closed or read-only, or on I/O errors.
    pub fn store(&self, data: &[u8]) -> CoreResult<BlobId> {
        if self.read_only {
            return Err(StorageError::ReadOnly.into());
        }
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let backend = inner.backend.as_mut().ok_or(CoreError::ConnectionClosed)?;

        let len = u32::try_from(data.len())
            .map_err(|_| CoreError::invalid_operation("blob larger than 4 GiB"))?;
        let mut entry = Vec::with_capacity(ENTRY_HEADER_SIZE as usize + data.len());
        entry.extend_from_slice(&len.to_le_bytes());
        entry.extend_from_slice(&compute_checksum(data).to_le_bytes());
        entry.extend_from_slice(data);
        let offset = backend.append(&entry)?;

        inner.offsets.push(offset);
        inner.dirty = true;
        Ok(inner.offsets.len() as BlobId)
    }

    /// Reads a blob, verifying its checksum.
    ///
    /// # Errors
    ///
    /// Fails on unknown ids, a closed store, or a checksum mismatch.
    pub fn read(&self, id: BlobId) -> CoreResult<Vec<u8>> {
        let inner = self.inner.lock();
        let backend = inner.backend.as_ref().ok_or(CoreError::ConnectionClosed)?;
        let offset = id
            .checked_sub(1)
            .and_then(|i| inner.offsets.get(i as usize))
            .copied()
            .ok_or_else(|| {
                CoreError::invalid_operation(format!("{}: unknown blob id {id}", self.label))
            })?;
        let (data, _) = read_entry(backend.as_ref(), offset, &self.label)?;
        Ok(data)
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().offsets.len()
    }

    /// Returns true if no blob is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads and verifies the entry at `offset`; returns its payload and the
/// offset of the next entry.
fn read_entry(backend: &dyn StorageBackend, offset: u64, label: &str) -> CoreResult<(Vec<u8>, u64)> {
    let size = backend.size()?;
    if size - offset < ENTRY_HEADER_SIZE {
        return Err(CoreError::corrupted(format!(
            "{label}: truncated entry header at offset {offset}"
        )));
    }
    let header = backend.read_at(offset, ENTRY_HEADER_SIZE as usize)?;
    let len = u64::from(read_u32_le(&header[0..4]));
    let stored = read_u32_le(&header[4..8]);
    if size - offset - ENTRY_HEADER_SIZE < len {
        return Err(CoreError::corrupted(format!(
            "{label}: entry at offset {offset} claims {len} bytes past end of file"
        )));
    }
    let data = backend.read_at(offset + ENTRY_HEADER_SIZE, len as usize)?;
    let computed = compute_checksum(&data);
    if stored != computed {
        return Err(CoreError::corrupted(format!(
            "{label}: checksum mismatch at offset {offset}: stored {stored:08x}, computed {computed:08x}"
        )));
    }
    Ok((data, offset + ENTRY_HEADER_SIZE + len))
}

fn scan_blobs(backend: &dyn StorageBackend, label: &str) -> CoreResult<Vec<u64>> {
    let size = backend.size()?;
    let mut offsets = Vec::new();
    let mut offset = AUX_HEADER_SIZE as u64;
    while offset < size {
        let (_, next) = read_entry(backend, offset, label)?;
        offsets.push(offset);
        offset = next;
    }
    Ok(offsets)
}

impl AuxiliaryStore for BlobStore {
    fn name(&self) -> &str {
        &self.label
    }

    fn force(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        let backend = inner.backend.as_mut().ok_or(CoreError::ConnectionClosed)?;
        if self.read_only {
            return Ok(());
        }
        backend.flush()?;
        backend.sync()?;
        inner.dirty = false;
        Ok(())
    }

    fn close(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        let Some(mut backend) = inner.backend.take() else {
            return Ok(());
        };
        if self.read_only {
            return Ok(());
        }
        backend.flush()?;
        backend.sync()?;
        inner.dirty = false;
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(path: &Path, mode: OpenMode) -> CoreResult<BlobStore> {
        BlobStore::open(path, "content", CONTENT_MAGIC, mode, false)
    }

    #[test]
    fn store_and_read() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("content.dat");
        {
            let blobs = open(&path, OpenMode::Create).unwrap();
            assert_eq!(blobs.store(b"hello").unwrap(), 1);
            assert_eq!(blobs.store(b"").unwrap(), 2);
            assert_eq!(blobs.store(&[7u8; 5000]).unwrap(), 3);
            assert_eq!(blobs.read(1).unwrap(), b"hello");
            blobs.close().unwrap();
        }

        let blobs = open(&path, OpenMode::Open).unwrap();
        assert_eq!(blobs.len(), 3);
        assert!(blobs.read(2).unwrap().is_empty());
        assert_eq!(blobs.read(3).unwrap(), vec![7u8; 5000]);
        assert!(blobs.read(0).is_err());
        assert!(blobs.read(4).is_err());
    }

    #[test]
    fn flipped_payload_byte_is_corrupted() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("content.dat");
        {
            let blobs = open(&path, OpenMode::Create).unwrap();
            blobs.store(b"payload").unwrap();
            blobs.close().unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let err = open(&path, OpenMode::Open).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn attribute_file_is_not_content_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("attributes.dat");
        BlobStore::open(&path, "attributes", ATTRIBUTES_MAGIC, OpenMode::Create, false)
            .unwrap()
            .close()
            .unwrap();
        assert!(matches!(
            open(&path, OpenMode::Open),
            Err(CoreError::Corrupted { .. })
        ));
    }

    #[test]
    fn read_only_rejects_store() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("content.dat");
        open(&path, OpenMode::Create).unwrap().close().unwrap();
        let blobs = BlobStore::open(&path, "content", CONTENT_MAGIC, OpenMode::Open, true).unwrap();
        assert!(matches!(
            blobs.store(b"x"),
            Err(CoreError::Storage(StorageError::ReadOnly))
        ));
    }
}
