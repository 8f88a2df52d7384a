//! Fully memory-mapped records backend.
//!
//! The records file is mapped in full with `memmap2` and grown in
//! [`MAP_CHUNK`] steps. Readers share the mapping through an `RwLock`;
//! writers and remapping take it exclusively, so a grow can never leave a
//! reader holding a dangling slice.
//!
//! Record bytes are written straight into the mapping; the header is kept
//! in memory and copied into the mapping on force, so the on-disk status
//! only changes when the caller asks for it.

use crate::error::{StorageError, StorageResult};
use crate::factory::StorageOptions;
use crate::header::{ConnectionStatus, Header, HEADER_SIZE};
use crate::kind::StorageKind;
use crate::layout::{FieldWidth, RecordField, RecordId, RecordLayout};
use crate::records::{
    check_id, check_width, ensure_header_fits, missing_records_file, next_record_id,
    validate_header, FileExtent, RecordsStorage,
};
use memmap2::{MmapMut, MmapOptions};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Granularity of the mapped file size.
pub(crate) const MAP_CHUNK: u64 = 64 * 1024;

/// Records storage over a memory-mapped file.
#[derive(Debug)]
pub struct MappedFileRecords {
    path: PathBuf,
    layout: RecordLayout,
    read_only: bool,
    inner: RwLock<MappedInner>,
}

#[derive(Debug)]
struct MappedInner {
    /// `None` once closed.
    region: Option<MappedRegion>,
    header: Header,
    header_dirty: bool,
    data_dirty: bool,
}

#[derive(Debug)]
struct MappedRegion {
    file: File,
    map: MmapMut,
}

impl MappedRegion {
    fn grow_to(&mut self, needed: u64, path: &Path) -> StorageResult<()> {
        if needed <= self.map.len() as u64 {
            return Ok(());
        }
        let new_len = needed.div_ceil(MAP_CHUNK) * MAP_CHUNK;
        self.map.flush()?;
        self.file.set_len(new_len)?;
        self.map = map_file(&self.file, false)?;
        debug!(path = %path.display(), len = new_len, "remapped records file");
        Ok(())
    }
}

impl MappedFileRecords {
    /// Opens the records file at `path`, creating it if it does not exist
    /// and the storage is writable.
    ///
    /// Read-only storages use a private copy-on-write mapping, so the file
    /// only needs read permission.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::KindMismatch`] if another backend wrote the
    /// file, [`StorageError::LayoutMismatch`] if it holds records of another
    /// width, [`StorageError::Corrupted`] if the header or file size is
    /// invalid, or an I/O error (including a failed `mmap`).
    pub fn open(path: &Path, layout: RecordLayout, options: StorageOptions) -> StorageResult<Self> {
        let (region, header) = if path.exists() {
            let file = OpenOptions::new()
                .read(true)
                .write(!options.read_only)
                .open(path)?;
            let len = file.metadata()?.len();
            ensure_header_fits(len)?;
            let map = map_file(&file, options.read_only)?;
            let header = validate_header(
                &map[..HEADER_SIZE],
                len,
                StorageKind::MappedFile,
                layout,
                FileExtent::Granular(MAP_CHUNK),
            )?;
            (MappedRegion { file, map }, header)
        } else {
            if options.read_only {
                return Err(missing_records_file(path));
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            file.set_len(MAP_CHUNK)?;
            let mut map = map_file(&file, false)?;
            let header = Header::new(StorageKind::MappedFile, layout);
            map[..HEADER_SIZE].copy_from_slice(&header.encode());
            map.flush()?;
            (MappedRegion { file, map }, header)
        };

        debug!(
            path = %path.display(),
            records = header.records_count,
            len = region.map.len(),
            "opened mapped records storage"
        );

        Ok(Self {
            path: path.to_path_buf(),
            layout,
            read_only: options.read_only,
            inner: RwLock::new(MappedInner {
                region: Some(region),
                header,
                header_dirty: false,
                data_dirty: false,
            }),
        })
    }

    /// Returns the path to the records file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_writable(&self) -> StorageResult<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        Ok(())
    }

    fn read_field(&self, id: RecordId, field: RecordField) -> StorageResult<[u8; 8]> {
        let inner = self.inner.read();
        let region = inner.region.as_ref().ok_or(StorageError::Closed)?;
        check_id(id, inner.header.records_count)?;
        let at = self.layout.field_offset(id, field) as usize;
        let width = field.width().bytes();
        let mut out = [0u8; 8];
        out[..width].copy_from_slice(&region.map[at..at + width]);
        Ok(out)
    }

    fn write_field(&self, id: RecordId, field: RecordField, bytes: &[u8]) -> StorageResult<()> {
        self.ensure_writable()?;
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let region = inner.region.as_mut().ok_or(StorageError::Closed)?;
        check_id(id, inner.header.records_count)?;

        let at = self.layout.field_offset(id, field) as usize;
        region.map[at..at + bytes.len()].copy_from_slice(bytes);
        if field != RecordField::ModCount {
            inner.header.global_mod_count = inner.header.global_mod_count.wrapping_add(1);
            let at = self.layout.field_offset(id, RecordField::ModCount) as usize;
            region.map[at..at + 4].copy_from_slice(&inner.header.global_mod_count.to_le_bytes());
        }
        inner.data_dirty = true;
        inner.header_dirty = true;
        Ok(())
    }

    fn update_header(&self, update: impl FnOnce(&mut Header)) -> StorageResult<()> {
        self.ensure_writable()?;
        let mut inner = self.inner.write();
        if inner.region.is_none() {
            return Err(StorageError::Closed);
        }
        update(&mut inner.header);
        inner.header_dirty = true;
        Ok(())
    }
}

impl MappedInner {
    fn flush(&mut self) -> StorageResult<()> {
        let region = self.region.as_mut().ok_or(StorageError::Closed)?;
        region.map[..HEADER_SIZE].copy_from_slice(&self.header.encode());
        region.map.flush()?;
        self.header_dirty = false;
        self.data_dirty = false;
        Ok(())
    }
}

impl RecordsStorage for MappedFileRecords {
    fn kind(&self) -> StorageKind {
        StorageKind::MappedFile
    }

    fn layout(&self) -> RecordLayout {
        self.layout
    }

    fn allocate_record(&self) -> StorageResult<RecordId> {
        self.ensure_writable()?;
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let region = inner.region.as_mut().ok_or(StorageError::Closed)?;

        let id = next_record_id(inner.header.records_count)?;
        region.grow_to(self.layout.data_size(id), &self.path)?;

        let start = self.layout.record_offset(id) as usize;
        region.map[start..start + self.layout.record_size()].fill(0);
        inner.header.records_count = id;
        inner.header_dirty = true;
        inner.data_dirty = true;
        Ok(id)
    }

    fn clean_record(&self, id: RecordId) -> StorageResult<()> {
        self.ensure_writable()?;
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let region = inner.region.as_mut().ok_or(StorageError::Closed)?;
        check_id(id, inner.header.records_count)?;

        let start = self.layout.record_offset(id) as usize;
        region.map[start..start + self.layout.record_size()].fill(0);
        inner.header.global_mod_count = inner.header.global_mod_count.wrapping_add(1);
        inner.header_dirty = true;
        inner.data_dirty = true;
        Ok(())
    }

    fn get_int(&self, id: RecordId, field: RecordField) -> StorageResult<i32> {
        check_width(field, FieldWidth::Int)?;
        let bytes = self.read_field(id, field)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn set_int(&self, id: RecordId, field: RecordField, value: i32) -> StorageResult<()> {
        check_width(field, FieldWidth::Int)?;
        self.write_field(id, field, &value.to_le_bytes())
    }

    fn get_long(&self, id: RecordId, field: RecordField) -> StorageResult<i64> {
        check_width(field, FieldWidth::Long)?;
        Ok(i64::from_le_bytes(self.read_field(id, field)?))
    }

    fn set_long(&self, id: RecordId, field: RecordField, value: i64) -> StorageResult<()> {
        check_width(field, FieldWidth::Long)?;
        self.write_field(id, field, &value.to_le_bytes())
    }

    fn records_count(&self) -> u32 {
        self.inner.read().header.records_count
    }

    fn header(&self) -> Header {
        self.inner.read().header
    }

    fn set_version(&self, version: u32) -> StorageResult<()> {
        self.update_header(|h| h.format_version = version)
    }

    fn set_timestamp(&self, timestamp: i64) -> StorageResult<()> {
        self.update_header(|h| h.created_at = timestamp)
    }

    fn set_connection_status(&self, status: ConnectionStatus) -> StorageResult<()> {
        self.update_header(|h| h.status = status)
    }

    fn is_dirty(&self) -> bool {
        let inner = self.inner.read();
        inner.header_dirty || inner.data_dirty
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn force(&self) -> StorageResult<()> {
        let mut inner = self.inner.write();
        if inner.region.is_none() {
            return Err(StorageError::Closed);
        }
        if self.read_only {
            return Ok(());
        }
        inner.flush()
    }

    fn close(&self) -> StorageResult<()> {
        let mut inner = self.inner.write();
        if inner.region.is_none() {
            return Ok(());
        }
        let result = if self.read_only {
            Ok(())
        } else {
            inner.flush()
        };
        // Dropping the region unmaps before the file handle closes.
        inner.region = None;
        debug!(path = %self.path.display(), "closed mapped records storage");
        result
    }

    fn is_closed(&self) -> bool {
        self.inner.read().region.is_none()
    }
}

#[allow(unsafe_code)]
fn map_file(file: &File, read_only: bool) -> io::Result<MmapMut> {
    // SAFETY: mapping a file is unsafe because another process may modify
    // or truncate it underneath the mapping. Records files are private to
    // the single connection that owns the directory, the mapping is owned
    // by `MappedRegion` together with its file handle, and every slice into
    // it is taken under the `RwLock` that also guards remapping.
    unsafe {
        if read_only {
            MmapOptions::new().map_copy(file)
        } else {
            MmapOptions::new().map_mut(file)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(path: &Path) -> MappedFileRecords {
        MappedFileRecords::open(path, RecordLayout::default(), StorageOptions::default()).unwrap()
    }

    #[test]
    fn grows_past_first_chunk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.dat");
        let records = open(&path);

        let count = (MAP_CHUNK as usize / RecordLayout::default().record_size()) * 2 + 3;
        for i in 0..count {
            let id = records.allocate_record().unwrap();
            records.set_length(id, i as i64).unwrap();
        }
        records.close().unwrap();

        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len % MAP_CHUNK, 0);
        assert!(len >= RecordLayout::default().data_size(count as u32));

        let reopened = open(&path);
        assert_eq!(reopened.records_count(), count as u32);
        assert_eq!(reopened.length(count as u32).unwrap(), count as i64 - 1);
    }

    #[test]
    fn read_only_mapping_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.dat");
        {
            let records = open(&path);
            let id = records.allocate_record().unwrap();
            records.set_flags(id, 9).unwrap();
            records.close().unwrap();
        }

        let options = StorageOptions { read_only: true };
        let records = MappedFileRecords::open(&path, RecordLayout::default(), options).unwrap();
        assert_eq!(records.flags(1).unwrap(), 9);
        assert!(matches!(records.set_flags(1, 1), Err(StorageError::ReadOnly)));
        assert!(matches!(records.allocate_record(), Err(StorageError::ReadOnly)));
        records.close().unwrap();
    }

    #[test]
    fn header_reaches_disk_only_on_force() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.dat");
        let records = open(&path);
        records.set_version(5).unwrap();
        assert_eq!(Header::read_from(&path).unwrap().format_version, 0);

        records.force().unwrap();
        assert_eq!(Header::read_from(&path).unwrap().format_version, 5);
        records.close().unwrap();
    }
}
