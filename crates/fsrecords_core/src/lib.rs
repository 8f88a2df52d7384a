//! # fsrecords Core
//!
//! Connection lifecycle and rebuild detection for the fsrecords virtual
//! file-system index.
//!
//! This crate provides:
//! - [`Connector`]: validates a store directory and decides whether to
//!   open it, create it, or wipe and rebuild it
//! - [`Connection`]: the records storage plus the names, attribute,
//!   attribute-enumerator and content stores, opened and closed as a unit
//! - [`CorruptionMarker`]: the side channel through which a rebuild is
//!   requested for the next start
//! - [`DiagnosticsSink`]: receives errors that trigger a rebuild or are
//!   swallowed during cleanup
//!
//! ## Example
//!
//! ```no_run
//! use fsrecords_core::{Config, Connector, LoggingSink};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let result = Connector::connect(
//!     Path::new("caches/vfs"),
//!     Config::new().version(3),
//!     Arc::new(LoggingSink),
//!     &[],
//! )?;
//! if result.was_rebuilt() {
//!     println!("rebuilt: {:?}", result.rebuild_causes);
//! }
//! let records = result.connection.records();
//! let id = records.allocate_record()?;
//! records.set_name_ref(id, result.connection.names().enumerate("src")?)?;
//! Connector::disconnect(&result.connection)?;
//! # Ok::<(), fsrecords_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod aux;
mod blobs;
mod config;
mod connection;
mod connector;
mod diagnostics;
mod error;
mod marker;
mod names;
mod paths;

pub use aux::{AuxiliaryStore, AuxiliaryStoreOpener, OpenMode};
pub use blobs::{BlobId, BlobStore, ATTRIBUTES_MAGIC, CONTENT_MAGIC};
pub use config::Config;
pub use connection::Connection;
pub use connector::{Connector, InitializationResult, StoreState};
pub use diagnostics::{CollectingSink, DiagnosticsSink, LoggingSink};
pub use error::{CoreError, CoreResult, NeedsRebuild, RebuildCause};
pub use marker::CorruptionMarker;
pub use names::{NameId, NamesStore};
pub use paths::{
    StorePaths, ATTRIBUTES_FILE, ATTRIBUTE_ENUMS_FILE, CONTENT_FILE, ESSENTIAL_FILES, MARKER_FILE,
    NAMES_FILE, NON_ESSENTIAL_FILES, RECORDS_FILE,
};

// Re-export storage types callers need alongside a connection.
pub use fsrecords_storage::{
    ConnectionStatus, Header, RecordField, RecordId, RecordLayout, RecordsStorage, StorageError,
    StorageKind, NULL_ID,
};
