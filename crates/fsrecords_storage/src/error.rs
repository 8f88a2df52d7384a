//! Error types for storage operations.

use crate::kind::StorageKind;
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// A record id outside `1..=records_count` was accessed.
    #[error("record id {id} out of range (records count {records_count})")]
    IndexOutOfRange {
        /// The requested record id.
        id: u32,
        /// The records count at the time of access.
        records_count: u32,
    },

    /// The storage file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The file was written by a different records backend.
    #[error("storage kind mismatch: expected {expected}, file was written by {found}")]
    KindMismatch {
        /// Backend kind requested by the caller.
        expected: StorageKind,
        /// Backend kind recorded in the header.
        found: StorageKind,
    },

    /// The file holds records of another width.
    #[error("record size mismatch: expected {expected} bytes, file holds {found} byte records")]
    LayoutMismatch {
        /// Record width requested by the caller.
        expected: usize,
        /// Record width recorded in the header.
        found: usize,
    },

    /// A mutation was attempted on a read-only storage.
    #[error("storage is read-only")]
    ReadOnly,

    /// The storage is closed.
    #[error("storage is closed")]
    Closed,

    /// The record layout cannot be used.
    #[error("invalid record layout: {0}")]
    InvalidLayout(String),
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Returns true if the error describes on-disk state that cannot be
    /// trusted (as opposed to a transient I/O or usage error).
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Corrupted(_)
                | Self::KindMismatch { .. }
                | Self::LayoutMismatch { .. }
                | Self::ReadPastEnd { .. }
        )
    }
}
