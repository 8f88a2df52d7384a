//! # fsrecords Storage
//!
//! Fixed-width records storage for the fsrecords virtual file-system index.
//!
//! This crate provides the two lowest layers of fsrecords:
//!
//! - **Byte backends** ([`StorageBackend`]): opaque positional byte stores
//!   used for file I/O by the paged records backend and by the auxiliary
//!   stores in `fsrecords_core`.
//! - **Records storages** ([`RecordsStorage`]): a [`Header`] followed by an
//!   array of fixed-width records addressed by 1-based [`RecordId`]s.
//!
//! ## Records Backends
//!
//! | [`StorageKind`]               | Implementation             | I/O strategy                  |
//! |-------------------------------|----------------------------|-------------------------------|
//! | [`StorageKind::PagedFile`]    | [`PagedFileRecords`]       | page cache behind a mutex     |
//! | [`StorageKind::LockFreeCache`]| [`LockFreeCacheRecords`]   | atomic words, lock-free fields|
//! | [`StorageKind::MappedFile`]   | [`MappedFileRecords`]      | `memmap2` over the whole file |
//!
//! All backends satisfy the same observable contract and are chosen at
//! construction time through [`open_records_storage`].
//!
//! ## Example
//!
//! ```no_run
//! use fsrecords_storage::{
//!     open_records_storage, RecordLayout, RecordsStorage, StorageKind, StorageOptions,
//! };
//! use std::path::Path;
//!
//! let records = open_records_storage(
//!     StorageKind::PagedFile,
//!     Path::new("records.dat"),
//!     RecordLayout::default(),
//!     StorageOptions::default(),
//! )
//! .unwrap();
//! let id = records.allocate_record().unwrap();
//! records.set_parent(id, 0).unwrap();
//! records.close().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod factory;
mod file;
mod header;
mod kind;
mod layout;
mod lockfree;
mod mapped;
mod memory;
mod paged;
mod records;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use factory::{open_records_storage, StorageOptions};
pub use file::FileBackend;
pub use header::{
    compute_checksum, current_time_millis, ConnectionStatus, Header, HEADER_LAYOUT_VERSION,
    HEADER_MAGIC, HEADER_SIZE,
};
pub use kind::{StorageKind, STORAGE_KIND_ENV};
pub use layout::{
    FieldWidth, RecordField, RecordId, RecordLayout, DEFAULT_RECORD_SIZE, MAX_RECORD_SIZE, NULL_ID,
};
pub use lockfree::LockFreeCacheRecords;
pub use mapped::MappedFileRecords;
pub use memory::InMemoryBackend;
pub use paged::PagedFileRecords;
pub use records::RecordsStorage;
