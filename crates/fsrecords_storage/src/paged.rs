//! Paged-file records backend.
//!
//! The records file is read and written in 4 KiB pages through a
//! [`FileBackend`]. Pages are cached in memory and written back on
//! [`RecordsStorage::force`]; every access is serialized through one mutex.
//!
//! The file length is always exactly `HEADER_SIZE + records_count * record_size`
//! after a force, which is what the open-time size check relies on.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::factory::StorageOptions;
use crate::file::FileBackend;
use crate::header::{ConnectionStatus, Header, HEADER_SIZE};
use crate::kind::StorageKind;
use crate::layout::{FieldWidth, RecordField, RecordId, RecordLayout};
use crate::records::{
    check_id, check_width, ensure_header_fits, missing_records_file, next_record_id,
    validate_header, FileExtent, RecordsStorage,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Size of a cached page.
pub(crate) const PAGE_SIZE: usize = 4096;

/// Number of pages kept before the cache is written back and dropped.
const MAX_CACHED_PAGES: usize = 1024;

/// Records storage over a regular file with an in-process page cache.
#[derive(Debug)]
pub struct PagedFileRecords {
    path: PathBuf,
    layout: RecordLayout,
    read_only: bool,
    inner: Mutex<PagedInner>,
}

#[derive(Debug)]
struct PagedInner {
    /// `None` once closed.
    file: Option<FileBackend>,
    header: Header,
    header_dirty: bool,
    pages: HashMap<u64, Page>,
}

#[derive(Debug)]
struct Page {
    data: Box<[u8]>,
    dirty: bool,
}

impl PagedFileRecords {
    /// Opens the records file at `path`, creating it if it does not exist
    /// and the storage is writable.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::KindMismatch`] if another backend wrote the
    /// file, [`StorageError::LayoutMismatch`] if it holds records of another
    /// width, [`StorageError::Corrupted`] if the header or file size is
    /// invalid, or an I/O error.
    pub fn open(path: &Path, layout: RecordLayout, options: StorageOptions) -> StorageResult<Self> {
        let (file, header) = if path.exists() {
            let file = if options.read_only {
                FileBackend::open_read_only(path)?
            } else {
                FileBackend::open(path)?
            };
            let len = file.size()?;
            ensure_header_fits(len)?;
            let bytes = file.read_at(0, HEADER_SIZE)?;
            let header =
                validate_header(&bytes, len, StorageKind::PagedFile, layout, FileExtent::Exact)?;
            (file, header)
        } else {
            if options.read_only {
                return Err(missing_records_file(path));
            }
            let mut file = FileBackend::open_with_create_dirs(path)?;
            let header = Header::new(StorageKind::PagedFile, layout);
            file.write_at(0, &header.encode())?;
            file.sync()?;
            (file, header)
        };

        debug!(
            path = %path.display(),
            records = header.records_count,
            "opened paged records storage"
        );

        Ok(Self {
            path: path.to_path_buf(),
            layout,
            read_only: options.read_only,
            inner: Mutex::new(PagedInner {
                file: Some(file),
                header,
                header_dirty: false,
                pages: HashMap::new(),
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
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        check_id(id, inner.header.records_count)?;
        let offset = self.layout.field_offset(id, field);
        let width = field.width().bytes();
        // Records are 8-byte aligned, so a field never crosses a page.
        let (page, at) = inner.page(offset, self.layout)?;
        let mut out = [0u8; 8];
        out[..width].copy_from_slice(&page.data[at..at + width]);
        Ok(out)
    }

    fn write_field(&self, id: RecordId, field: RecordField, bytes: &[u8]) -> StorageResult<()> {
        self.ensure_writable()?;
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        check_id(id, inner.header.records_count)?;

        inner.write_bytes(self.layout.field_offset(id, field), bytes, self.layout)?;
        if field != RecordField::ModCount {
            inner.header.global_mod_count = inner.header.global_mod_count.wrapping_add(1);
            let mod_count = inner.header.global_mod_count.to_le_bytes();
            inner.write_bytes(
                self.layout.field_offset(id, RecordField::ModCount),
                &mod_count,
                self.layout,
            )?;
        }
        inner.header_dirty = true;
        Ok(())
    }

    fn update_header(&self, update: impl FnOnce(&mut Header)) -> StorageResult<()> {
        self.ensure_writable()?;
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        update(&mut inner.header);
        inner.header_dirty = true;
        Ok(())
    }
}

impl PagedInner {
    fn ensure_open(&self) -> StorageResult<()> {
        if self.file.is_none() {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    /// Returns the cached page holding `offset` and the position of `offset`
    /// inside it, loading the page if needed.
    fn page(&mut self, offset: u64, layout: RecordLayout) -> StorageResult<(&mut Page, usize)> {
        let page_no = offset / PAGE_SIZE as u64;
        if !self.pages.contains_key(&page_no) {
            if self.pages.len() >= MAX_CACHED_PAGES {
                self.write_back(layout)?;
                self.pages.clear();
            }
            let file = self.file.as_ref().ok_or(StorageError::Closed)?;
            let page_start = page_no * PAGE_SIZE as u64;
            let available = file.size()?.saturating_sub(page_start).min(PAGE_SIZE as u64);
            let mut data = vec![0u8; PAGE_SIZE].into_boxed_slice();
            if available > 0 {
                let bytes = file.read_at(page_start, available as usize)?;
                data[..bytes.len()].copy_from_slice(&bytes);
            }
            self.pages.insert(page_no, Page { data, dirty: false });
        }
        let page = self
            .pages
            .get_mut(&page_no)
            .ok_or_else(|| StorageError::corrupted("page vanished from cache"))?;
        Ok((page, (offset % PAGE_SIZE as u64) as usize))
    }

    /// Copies `bytes` to `offset`, spilling into following pages when the
    /// range crosses a page boundary.
    fn write_bytes(&mut self, offset: u64, bytes: &[u8], layout: RecordLayout) -> StorageResult<()> {
        let mut written = 0;
        while written < bytes.len() {
            let (page, at) = self.page(offset + written as u64, layout)?;
            let n = (PAGE_SIZE - at).min(bytes.len() - written);
            page.data[at..at + n].copy_from_slice(&bytes[written..written + n]);
            page.dirty = true;
            written += n;
        }
        Ok(())
    }

    /// Writes dirty pages and the header, then fixes the file length.
    /// Does not sync.
    fn write_back(&mut self, layout: RecordLayout) -> StorageResult<()> {
        let logical_end = layout.data_size(self.header.records_count);
        let header_bytes = self.header.encode();
        let file = self.file.as_mut().ok_or(StorageError::Closed)?;

        let mut dirty: Vec<u64> = self
            .pages
            .iter()
            .filter(|(_, page)| page.dirty)
            .map(|(no, _)| *no)
            .collect();
        dirty.sort_unstable();

        for page_no in dirty {
            let Some(page) = self.pages.get_mut(&page_no) else {
                continue;
            };
            let page_start = page_no * PAGE_SIZE as u64;
            // The header is owned by `self.header`, never by page 0's bytes.
            let skip = if page_no == 0 { HEADER_SIZE as u64 } else { 0 };
            let from = page_start + skip;
            let to = (page_start + PAGE_SIZE as u64).min(logical_end);
            if to > from {
                let lo = (from - page_start) as usize;
                let hi = (to - page_start) as usize;
                file.write_at(from, &page.data[lo..hi])?;
            }
            page.dirty = false;
        }

        if self.header_dirty || file.size()? != logical_end {
            file.write_at(0, &header_bytes)?;
            if file.size()? != logical_end {
                file.set_len(logical_end)?;
            }
            self.header_dirty = false;
        }
        Ok(())
    }
}

impl RecordsStorage for PagedFileRecords {
    fn kind(&self) -> StorageKind {
        StorageKind::PagedFile
    }

    fn layout(&self) -> RecordLayout {
        self.layout
    }

    fn allocate_record(&self) -> StorageResult<RecordId> {
        self.ensure_writable()?;
        let mut inner = self.inner.lock();
        inner.ensure_open()?;

        let id = next_record_id(inner.header.records_count)?;
        inner.header.records_count = id;
        inner.header_dirty = true;

        // A slot past the end of the file is read as zeros, but a slot in a
        // cached page may hold bytes of a record truncated earlier.
        let zeros = vec![0u8; self.layout.record_size()];
        inner.write_bytes(self.layout.record_offset(id), &zeros, self.layout)?;
        Ok(id)
    }

    fn clean_record(&self, id: RecordId) -> StorageResult<()> {
        self.ensure_writable()?;
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        check_id(id, inner.header.records_count)?;

        let zeros = vec![0u8; self.layout.record_size()];
        inner.write_bytes(self.layout.record_offset(id), &zeros, self.layout)?;
        inner.header.global_mod_count = inner.header.global_mod_count.wrapping_add(1);
        inner.header_dirty = true;
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
        self.inner.lock().header.records_count
    }

    fn header(&self) -> Header {
        self.inner.lock().header
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
        let inner = self.inner.lock();
        inner.header_dirty || inner.pages.values().any(|page| page.dirty)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn force(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        if self.read_only {
            return Ok(());
        }
        inner.write_back(self.layout)?;
        if let Some(file) = inner.file.as_mut() {
            file.sync()?;
        }
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        if inner.file.is_none() {
            return Ok(());
        }
        let result = if self.read_only {
            Ok(())
        } else {
            inner.write_back(self.layout).and_then(|()| match inner.file.as_mut() {
                Some(file) => file.sync(),
                None => Ok(()),
            })
        };
        inner.pages.clear();
        inner.file = None;
        debug!(path = %self.path.display(), "closed paged records storage");
        result
    }

    fn is_closed(&self) -> bool {
        self.inner.lock().file.is_none()
    }
}
