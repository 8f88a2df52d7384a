//! Lock-free mapped-cache records backend.
//!
//! The whole records file is cached as pages of [`AtomicU64`] words. Every
//! field lives inside a single word, so reads are one atomic load and
//! writes one atomic store (or a compare-and-swap for 4-byte fields sharing
//! a word). The page table is behind an `RwLock` that is only write-locked
//! when the cache grows; field access never waits on another field access.
//!
//! Pages are written back to the file on [`RecordsStorage::force`]. The
//! file is page-granular, so it may be longer than the records it holds.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::factory::StorageOptions;
use crate::file::FileBackend;
use crate::header::{ConnectionStatus, Header, HEADER_SIZE};
use crate::kind::StorageKind;
use crate::layout::{FieldWidth, RecordField, RecordId, RecordLayout};
use crate::paged::PAGE_SIZE;
use crate::records::{
    check_id, check_width, ensure_header_fits, missing_records_file, next_record_id,
    validate_header, FileExtent, RecordsStorage,
};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

const WORDS_PER_PAGE: usize = PAGE_SIZE / 8;

/// Records storage over a lock-free cache of the whole file.
#[derive(Debug)]
pub struct LockFreeCacheRecords {
    path: PathBuf,
    layout: RecordLayout,
    read_only: bool,
    pages: RwLock<Vec<Arc<CachedPage>>>,
    /// `None` once closed.
    file: Mutex<Option<FileBackend>>,
    /// Kind, version, status and creation time; the counters live in atomics.
    header: Mutex<Header>,
    header_dirty: AtomicBool,
    records_count: AtomicU32,
    global_mod_count: AtomicU32,
    closed: AtomicBool,
}

#[derive(Debug)]
struct CachedPage {
    words: Box<[AtomicU64]>,
    dirty: AtomicBool,
}

impl CachedPage {
    fn zeroed(dirty: bool) -> Self {
        Self {
            words: (0..WORDS_PER_PAGE).map(|_| AtomicU64::new(0)).collect(),
            dirty: AtomicBool::new(dirty),
        }
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let page = Self::zeroed(false);
        for (word, chunk) in page.words.iter().zip(bytes.chunks(8)) {
            let mut buf = [0u8; 8];
            buf[..chunk.len()].copy_from_slice(chunk);
            word.store(u64::from_le_bytes(buf), Ordering::Relaxed);
        }
        page
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PAGE_SIZE);
        for word in self.words.iter() {
            bytes.extend_from_slice(&word.load(Ordering::Acquire).to_le_bytes());
        }
        bytes
    }
}

impl LockFreeCacheRecords {
    /// Opens the records file at `path`, creating it if it does not exist
    /// and the storage is writable. The whole file is loaded into the cache.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::KindMismatch`] if another backend wrote the
    /// file, [`StorageError::LayoutMismatch`] if it holds records of another
    /// width, [`StorageError::Corrupted`] if the header or file size is
    /// invalid, or an I/O error.
    pub fn open(path: &Path, layout: RecordLayout, options: StorageOptions) -> StorageResult<Self> {
        let (file, header, pages) = if path.exists() {
            let file = if options.read_only {
                FileBackend::open_read_only(path)?
            } else {
                FileBackend::open(path)?
            };
            let size = file.size()?;
            ensure_header_fits(size)?;
            let header = validate_header(
                &file.read_at(0, HEADER_SIZE)?,
                size,
                StorageKind::LockFreeCache,
                layout,
                FileExtent::Granular(PAGE_SIZE as u64),
            )?;

            let mut pages = Vec::with_capacity((size / PAGE_SIZE as u64) as usize);
            let mut offset = 0;
            while offset < size {
                let bytes = file.read_at(offset, PAGE_SIZE)?;
                pages.push(Arc::new(CachedPage::from_bytes(&bytes)));
                offset += PAGE_SIZE as u64;
            }
            (file, header, pages)
        } else {
            if options.read_only {
                return Err(missing_records_file(path));
            }
            let mut file = FileBackend::open_with_create_dirs(path)?;
            let header = Header::new(StorageKind::LockFreeCache, layout);
            let mut first_page = vec![0u8; PAGE_SIZE];
            first_page[..HEADER_SIZE].copy_from_slice(&header.encode());
            file.write_at(0, &first_page)?;
            file.sync()?;
            (file, header, vec![Arc::new(CachedPage::zeroed(false))])
        };

        debug!(
            path = %path.display(),
            records = header.records_count,
            pages = pages.len(),
            "opened lock-free cache records storage"
        );

        Ok(Self {
            path: path.to_path_buf(),
            layout,
            read_only: options.read_only,
            pages: RwLock::new(pages),
            file: Mutex::new(Some(file)),
            records_count: AtomicU32::new(header.records_count),
            global_mod_count: AtomicU32::new(header.global_mod_count),
            header: Mutex::new(header),
            header_dirty: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the path to the records file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> StorageResult<()> {
        self.ensure_open()?;
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        Ok(())
    }

    /// Page and word index holding the 8-byte word at `offset`.
    fn word_at(&self, offset: u64) -> StorageResult<(Arc<CachedPage>, usize)> {
        let page_no = (offset / PAGE_SIZE as u64) as usize;
        let word = ((offset % PAGE_SIZE as u64) / 8) as usize;
        let pages = self.pages.read();
        let page = pages.get(page_no).cloned().ok_or(StorageError::ReadPastEnd {
            offset,
            len: 8,
            size: (pages.len() * PAGE_SIZE) as u64,
        })?;
        Ok((page, word))
    }

    fn ensure_capacity(&self, records_count: u32) -> StorageResult<()> {
        let needed_bytes = self.layout.data_size(records_count);
        let needed_pages = needed_bytes.div_ceil(PAGE_SIZE as u64) as usize;
        if self.pages.read().len() >= needed_pages {
            return Ok(());
        }
        let mut pages = self.pages.write();
        while pages.len() < needed_pages {
            pages.push(Arc::new(CachedPage::zeroed(true)));
        }
        debug!(pages = pages.len(), "grew lock-free records cache");
        Ok(())
    }

    fn load_word(&self, id: RecordId, field: RecordField) -> StorageResult<u64> {
        self.ensure_open()?;
        check_id(id, self.records_count.load(Ordering::Acquire))?;
        let (page, word) = self.word_at(self.layout.field_offset(id, field))?;
        Ok(page.words[word].load(Ordering::Acquire))
    }

    fn store_field(&self, id: RecordId, field: RecordField, value: u64) -> StorageResult<()> {
        let offset = self.layout.field_offset(id, field);
        let (page, word) = self.word_at(offset)?;
        match field.width() {
            FieldWidth::Long => page.words[word].store(value, Ordering::Release),
            FieldWidth::Int => {
                let shift = (offset % 8) * 8;
                let mask = 0xFFFF_FFFFu64 << shift;
                let bits = (value & 0xFFFF_FFFF) << shift;
                // The closure always returns Some, so this cannot fail.
                let _ = page.words[word].fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                    Some((w & !mask) | bits)
                });
            }
        }
        page.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn write_field(&self, id: RecordId, field: RecordField, value: u64) -> StorageResult<()> {
        self.ensure_writable()?;
        check_id(id, self.records_count.load(Ordering::Acquire))?;
        self.store_field(id, field, value)?;
        if field != RecordField::ModCount {
            let mod_count = self.global_mod_count.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
            self.store_field(id, RecordField::ModCount, u64::from(mod_count))?;
        }
        self.header_dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn update_header(&self, update: impl FnOnce(&mut Header)) -> StorageResult<()> {
        self.ensure_writable()?;
        update(&mut *self.header.lock());
        self.header_dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Writes dirty pages then the header and syncs.
    fn write_back(&self, file: &mut FileBackend) -> StorageResult<()> {
        let pages: Vec<Arc<CachedPage>> = self.pages.read().clone();
        for (page_no, page) in pages.iter().enumerate() {
            if !page.dirty.swap(false, Ordering::AcqRel) {
                continue;
            }
            let bytes = page.to_bytes();
            let page_start = (page_no * PAGE_SIZE) as u64;
            // The header is owned by `self.header`, never by page 0's words.
            let result = if page_no == 0 {
                file.write_at(page_start + HEADER_SIZE as u64, &bytes[HEADER_SIZE..])
            } else {
                file.write_at(page_start, &bytes)
            };
            if let Err(e) = result {
                page.dirty.store(true, Ordering::Release);
                return Err(e);
            }
        }

        self.header_dirty.store(false, Ordering::Release);
        file.write_at(0, &self.header().encode())?;
        file.sync()
    }
}

impl RecordsStorage for LockFreeCacheRecords {
    fn kind(&self) -> StorageKind {
        StorageKind::LockFreeCache
    }

    fn layout(&self) -> RecordLayout {
        self.layout
    }

    fn allocate_record(&self) -> StorageResult<RecordId> {
        self.ensure_writable()?;
        loop {
            let current = self.records_count.load(Ordering::Acquire);
            let id = next_record_id(current)?;
            // Grow before publishing the id, so a visible id always has a page.
            self.ensure_capacity(id)?;
            if self
                .records_count
                .compare_exchange(current, id, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.header_dirty.store(true, Ordering::Release);
                return Ok(id);
            }
        }
    }

    fn clean_record(&self, id: RecordId) -> StorageResult<()> {
        self.ensure_writable()?;
        check_id(id, self.records_count.load(Ordering::Acquire))?;
        let start = self.layout.record_offset(id);
        for word_offset in (0..self.layout.record_size() as u64).step_by(8) {
            let (page, word) = self.word_at(start + word_offset)?;
            page.words[word].store(0, Ordering::Release);
            page.dirty.store(true, Ordering::Release);
        }
        self.global_mod_count.fetch_add(1, Ordering::AcqRel);
        self.header_dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn get_int(&self, id: RecordId, field: RecordField) -> StorageResult<i32> {
        check_width(field, FieldWidth::Int)?;
        let word = self.load_word(id, field)?;
        let shift = (self.layout.field_offset(id, field) % 8) * 8;
        Ok((word >> shift) as u32 as i32)
    }

    fn set_int(&self, id: RecordId, field: RecordField, value: i32) -> StorageResult<()> {
        check_width(field, FieldWidth::Int)?;
        self.write_field(id, field, u64::from(value as u32))
    }

    fn get_long(&self, id: RecordId, field: RecordField) -> StorageResult<i64> {
        check_width(field, FieldWidth::Long)?;
        Ok(self.load_word(id, field)? as i64)
    }

    fn set_long(&self, id: RecordId, field: RecordField, value: i64) -> StorageResult<()> {
        check_width(field, FieldWidth::Long)?;
        self.write_field(id, field, value as u64)
    }

    fn records_count(&self) -> u32 {
        self.records_count.load(Ordering::Acquire)
    }

    fn header(&self) -> Header {
        let mut header = *self.header.lock();
        header.records_count = self.records_count.load(Ordering::Acquire);
        header.global_mod_count = self.global_mod_count.load(Ordering::Acquire);
        header
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
        self.header_dirty.load(Ordering::Acquire)
            || self
                .pages
                .read()
                .iter()
                .any(|page| page.dirty.load(Ordering::Acquire))
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn force(&self) -> StorageResult<()> {
        self.ensure_open()?;
        if self.read_only {
            return Ok(());
        }
        let mut file = self.file.lock();
        let file = file.as_mut().ok_or(StorageError::Closed)?;
        self.write_back(file)
    }

    fn close(&self) -> StorageResult<()> {
        let mut file = self.file.lock();
        let Some(mut backend) = file.take() else {
            return Ok(());
        };
        self.closed.store(true, Ordering::Release);
        let result = if self.read_only {
            Ok(())
        } else {
            self.write_back(&mut backend)
        };
        self.pages.write().clear();
        debug!(path = %self.path.display(), "closed lock-free cache records storage");
        result
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
