//! [`StorageBackend`] over an OS file.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct OpenFile {
    file: File,
    /// Logical length; tracks every write so `size()` never hits the OS.
    len: u64,
}

impl OpenFile {
    fn seek_to(&mut self, offset: u64) -> StorageResult<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }
}

/// A store file on disk.
///
/// The paged and lock-free records backends and every auxiliary store do
/// their I/O through this type. Seeks and transfers happen under one
/// mutex, so a shared reference may be read from several threads.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<OpenFile>,
    read_only: bool,
}

impl FileBackend {
    /// Opens `path` for reading and writing, creating an empty file if
    /// there is none. Existing contents are kept.
    ///
    /// # Errors
    ///
    /// Any error from the OS open.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::with_file(path, file, false)
    }

    /// Opens an existing file for reading only; every mutation fails with
    /// [`StorageError::ReadOnly`] and `flush`/`sync` are no-ops.
    ///
    /// # Errors
    ///
    /// `NotFound` if the file is missing, or any other OS error.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = File::open(path)?;
        Self::with_file(path, file, true)
    }

    /// Like [`open`](Self::open), creating missing parent directories first.
    ///
    /// # Errors
    ///
    /// Any error creating the directories or opening the file.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)?,
            _ => {}
        }
        Self::open(path)
    }

    fn with_file(path: &Path, file: File, read_only: bool) -> StorageResult<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(OpenFile { file, len }),
            read_only,
        })
    }

    /// Path the file was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if the file was opened with [`open_read_only`](Self::open_read_only).
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn writable(&mut self) -> StorageResult<&mut OpenFile> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        Ok(self.inner.get_mut())
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        let size = inner.len;
        if offset.checked_add(len as u64).map_or(true, |end| end > size) {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        let mut buf = vec![0u8; len];
        if len > 0 {
            inner.seek_to(offset)?;
            inner.file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let inner = self.writable()?;
        if data.is_empty() {
            return Ok(());
        }
        inner.seek_to(offset)?;
        inner.file.write_all(data)?;
        inner.len = inner.len.max(offset + data.len() as u64);
        Ok(())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let inner = self.writable()?;
        let offset = inner.len;
        if !data.is_empty() {
            inner.seek_to(offset)?;
            inner.file.write_all(data)?;
            inner.len += data.len() as u64;
        }
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if !self.read_only {
            self.inner.get_mut().file.flush()?;
        }
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        if !self.read_only {
            self.inner.get_mut().file.sync_all()?;
        }
        Ok(())
    }

    fn set_len(&mut self, len: u64) -> StorageResult<()> {
        let inner = self.writable()?;
        inner.file.set_len(len)?;
        inner.len = len;
        Ok(())
    }
}
