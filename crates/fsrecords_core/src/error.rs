//! Error types for fsrecords core.

use fsrecords_storage::StorageError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Why a store has to be discarded and recreated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RebuildCause {
    /// The store was written by a different implementation version or a
    /// different records backend.
    ImplVersionMismatch,
    /// The last connection did not close cleanly.
    NotClosedProperly,
    /// A store file is missing, truncated or fails validation.
    StorageFileMissingOrCorrupted,
    /// A rebuild was scheduled through a corruption marker.
    ExplicitRequest,
}

impl RebuildCause {
    /// All causes.
    pub const ALL: [RebuildCause; 4] = [
        Self::ImplVersionMismatch,
        Self::NotClosedProperly,
        Self::StorageFileMissingOrCorrupted,
        Self::ExplicitRequest,
    ];

    /// Stable tag used in logs and the CLI.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ImplVersionMismatch => "IMPL_VERSION_MISMATCH",
            Self::NotClosedProperly => "NOT_CLOSED_PROPERLY",
            Self::StorageFileMissingOrCorrupted => "STORAGE_FILE_MISSING_OR_CORRUPTED",
            Self::ExplicitRequest => "EXPLICIT_REQUEST",
        }
    }
}

impl fmt::Display for RebuildCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed request to rebuild the store.
///
/// Returned by strict opens instead of touching the files; the connector
/// acts on it by wiping and recreating the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("store needs rebuild ({cause}): {message}")]
pub struct NeedsRebuild {
    /// Why the store cannot be used as is.
    pub cause: RebuildCause,
    /// Human-readable detail.
    pub message: String,
}

impl NeedsRebuild {
    /// Creates a rebuild request.
    pub fn new(cause: RebuildCause, message: impl Into<String>) -> Self {
        Self {
            cause,
            message: message.into(),
        }
    }

    /// Classifies a storage error raised while opening a store.
    ///
    /// A backend kind or record size mismatch is a format incompatibility;
    /// other structural
    /// errors mean the file cannot be trusted. Transient errors (I/O, bounds,
    /// usage) are not rebuild requests and return `None`.
    #[must_use]
    pub fn from_storage_error(err: &StorageError) -> Option<Self> {
        match err {
            StorageError::KindMismatch { .. } | StorageError::LayoutMismatch { .. } => {
                Some(Self::new(RebuildCause::ImplVersionMismatch, err.to_string()))
            }
            e if e.is_structural() => Some(Self::new(
                RebuildCause::StorageFileMissingOrCorrupted,
                e.to_string(),
            )),
            _ => None,
        }
    }
}

/// Errors that can occur in fsrecords core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Records storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store must be rebuilt before it can be used.
    #[error(transparent)]
    NeedsRebuild(#[from] NeedsRebuild),

    /// An auxiliary store file is corrupted.
    #[error("store corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The connection is closed.
    #[error("connection is closed")]
    ConnectionClosed,
}

impl CoreError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns the rebuild this error calls for, if any.
    ///
    /// Used on open paths, where a corrupted file means the store has to
    /// be recreated rather than the operation retried.
    #[must_use]
    pub fn rebuild_request(&self) -> Option<NeedsRebuild> {
        match self {
            Self::NeedsRebuild(request) => Some(request.clone()),
            Self::Storage(e) => NeedsRebuild::from_storage_error(e),
            Self::Corrupted { message } => Some(NeedsRebuild::new(
                RebuildCause::StorageFileMissingOrCorrupted,
                message.clone(),
            )),
            _ => None,
        }
    }

    /// Cause of the rebuild this error calls for, if any.
    #[must_use]
    pub fn rebuild_cause(&self) -> Option<RebuildCause> {
        self.rebuild_request().map(|request| request.cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsrecords_storage::StorageKind;

    #[test]
    fn cause_tags() {
        let tags: Vec<_> = RebuildCause::ALL.iter().map(ToString::to_string).collect();
        assert_eq!(
            tags,
            [
                "IMPL_VERSION_MISMATCH",
                "NOT_CLOSED_PROPERLY",
                "STORAGE_FILE_MISSING_OR_CORRUPTED",
                "EXPLICIT_REQUEST"
            ]
        );
    }

    #[test]
    fn storage_errors_classify() {
        let mismatch = StorageError::KindMismatch {
            expected: StorageKind::PagedFile,
            found: StorageKind::MappedFile,
        };
        assert_eq!(
            NeedsRebuild::from_storage_error(&mismatch).map(|r| r.cause),
            Some(RebuildCause::ImplVersionMismatch)
        );
        let layout = StorageError::LayoutMismatch {
            expected: 40,
            found: 48,
        };
        assert_eq!(
            NeedsRebuild::from_storage_error(&layout).map(|r| r.cause),
            Some(RebuildCause::ImplVersionMismatch)
        );
        assert_eq!(
            NeedsRebuild::from_storage_error(&StorageError::corrupted("bad magic")).map(|r| r.cause),
            Some(RebuildCause::StorageFileMissingOrCorrupted)
        );
        assert!(NeedsRebuild::from_storage_error(&StorageError::ReadOnly).is_none());
        assert!(NeedsRebuild::from_storage_error(&StorageError::IndexOutOfRange {
            id: 9,
            records_count: 1
        })
        .is_none());
    }

    #[test]
    fn core_errors_classify() {
        assert_eq!(
            CoreError::corrupted("short entry").rebuild_cause(),
            Some(RebuildCause::StorageFileMissingOrCorrupted)
        );
        let io = CoreError::from(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert_eq!(io.rebuild_cause(), None);
        assert_eq!(CoreError::ConnectionClosed.rebuild_cause(), None);
    }
}
