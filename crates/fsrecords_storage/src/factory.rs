//! Construction of records storages by kind.

use crate::error::StorageResult;
use crate::kind::StorageKind;
use crate::layout::RecordLayout;
use crate::lockfree::LockFreeCacheRecords;
use crate::mapped::MappedFileRecords;
use crate::paged::PagedFileRecords;
use crate::records::RecordsStorage;
use std::path::Path;
use tracing::{debug, warn};

/// Options shared by every records backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageOptions {
    /// Open without write access. Missing files are an error instead of
    /// being created, and every mutation fails with
    /// [`StorageError::ReadOnly`](crate::StorageError::ReadOnly).
    pub read_only: bool,
}

impl StorageOptions {
    /// Options for a read-only open.
    #[must_use]
    pub const fn read_only() -> Self {
        Self { read_only: true }
    }
}

/// Opens (or creates) the records file at `path` with the backend selected
/// by `kind`.
///
/// If the file did not exist before the call and the backend fails to
/// initialize, the partially written file is removed so a later attempt
/// starts from scratch.
///
/// # Errors
///
/// Surfaces the backend's open error: I/O failures, a kind mismatch, or
/// a corrupted header.
pub fn open_records_storage(
    kind: StorageKind,
    path: &Path,
    layout: RecordLayout,
    options: StorageOptions,
) -> StorageResult<Box<dyn RecordsStorage>> {
    let existed = path.exists();
    let result: StorageResult<Box<dyn RecordsStorage>> = match kind {
        StorageKind::PagedFile => {
            PagedFileRecords::open(path, layout, options).map(|s| Box::new(s) as Box<_>)
        }
        StorageKind::LockFreeCache => {
            LockFreeCacheRecords::open(path, layout, options).map(|s| Box::new(s) as Box<_>)
        }
        StorageKind::MappedFile => {
            MappedFileRecords::open(path, layout, options).map(|s| Box::new(s) as Box<_>)
        }
    };

    match result {
        Ok(storage) => {
            debug!(%kind, path = %path.display(), created = !existed, "records storage ready");
            Ok(storage)
        }
        Err(e) => {
            if !existed && !options.read_only && path.exists() {
                if let Err(remove_err) = std::fs::remove_file(path) {
                    warn!(
                        path = %path.display(),
                        error = %remove_err,
                        "failed to remove partially created records file"
                    );
                }
            }
            Err(e)
        }
    }
}
