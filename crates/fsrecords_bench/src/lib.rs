//! Benchmark utilities.

use fsrecords_storage::{
    open_records_storage, RecordLayout, RecordsStorage, StorageKind, StorageOptions,
};
use std::path::Path;

/// Opens a writable records storage of `kind` at `path`.
///
/// # Panics
///
/// Panics if the storage cannot be opened.
pub fn open_storage(kind: StorageKind, path: &Path) -> Box<dyn RecordsStorage> {
    open_records_storage(kind, path, RecordLayout::default(), StorageOptions::default())
        .unwrap_or_else(|e| panic!("failed to open {kind} storage: {e}"))
}

/// Opens a storage of `kind` at `path` and allocates `count` records.
///
/// # Panics
///
/// Panics on any storage error.
pub fn populated_storage(kind: StorageKind, path: &Path, count: u32) -> Box<dyn RecordsStorage> {
    let storage = open_storage(kind, path);
    for _ in 0..count {
        storage
            .allocate_record()
            .unwrap_or_else(|e| panic!("failed to allocate record: {e}"));
    }
    storage
}
