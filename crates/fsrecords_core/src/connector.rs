//! Opening a store directory: validation, rebuild decisions and recovery.
//!
//! ```text
//! empty directory ─────────────────────────────────────► create
//! records header ─ bad magic / checksum / size ────────► STORAGE_FILE_MISSING_OR_CORRUPTED
//!                ─ other backend kind, record size ───► IMPL_VERSION_MISMATCH
//!                  or version
//!                ─ marker present or status CORRUPTED ─► EXPLICIT_REQUEST
//!                ─ status not SAFELY_CLOSED ───────────► NOT_CLOSED_PROPERLY
//! essential file missing or malformed ─────────────────► STORAGE_FILE_MISSING_OR_CORRUPTED
//! otherwise ───────────────────────────────────────────► open
//! ```
//!
//! [`Connector::try_init`] reports a rebuild as a typed error.
//! [`Connector::connect`] acts on it: it writes the corruption marker,
//! deletes every other file in the directory, creates a fresh store and
//! then consumes the marker.

use crate::aux::AuxiliaryStoreOpener;
use crate::config::Config;
use crate::connection::Connection;
use crate::diagnostics::DiagnosticsSink;
use crate::error::{CoreError, CoreResult, NeedsRebuild, RebuildCause};
use crate::marker::CorruptionMarker;
use crate::paths::StorePaths;
use fsrecords_storage::{ConnectionStatus, Header};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// What the connector found in a store directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreState {
    /// No store files: a fresh store will be created.
    Empty,
    /// The store can be opened as is.
    Ready(Header),
    /// The store has to be rebuilt.
    NeedsRebuild(NeedsRebuild),
}

/// Outcome of [`Connector::connect`].
#[derive(Debug)]
pub struct InitializationResult {
    /// The open connection.
    pub connection: Connection,
    /// Why the store was rebuilt; empty if it was opened or created
    /// normally.
    pub rebuild_causes: Vec<RebuildCause>,
    /// Wall-clock time spent in `connect`, including any rebuild.
    pub total_init_duration: Duration,
}

impl InitializationResult {
    /// Returns true if the store was wiped and recreated.
    #[must_use]
    pub fn was_rebuilt(&self) -> bool {
        !self.rebuild_causes.is_empty()
    }
}

/// Opens store directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct Connector;

impl Connector {
    /// Inspects a store directory without opening anything for writing.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the records file exists but cannot be read.
    /// Unreadable content is reported as [`StoreState::NeedsRebuild`].
    pub fn probe(dir: &Path, config: &Config) -> CoreResult<StoreState> {
        let paths = StorePaths::new(dir);
        let marker = CorruptionMarker::new(paths.marker());

        if paths.is_empty_store() {
            if marker.exists() {
                return Ok(StoreState::NeedsRebuild(NeedsRebuild::new(
                    RebuildCause::ExplicitRequest,
                    "corruption marker present in an empty store directory",
                )));
            }
            return Ok(StoreState::Empty);
        }

        let records = paths.records();
        if !records.is_file() {
            return Ok(StoreState::NeedsRebuild(NeedsRebuild::new(
                RebuildCause::StorageFileMissingOrCorrupted,
                format!("records file {} is missing", records.display()),
            )));
        }
        let header = match Header::read_from(&records) {
            Ok(header) => header,
            Err(e) => {
                return match NeedsRebuild::from_storage_error(&e) {
                    Some(request) => Ok(StoreState::NeedsRebuild(request)),
                    None => Err(e.into()),
                };
            }
        };

        if header.kind != config.storage_kind {
            return Ok(StoreState::NeedsRebuild(NeedsRebuild::new(
                RebuildCause::ImplVersionMismatch,
                format!(
                    "store was written by the {} backend, configured backend is {}",
                    header.kind, config.storage_kind
                ),
            )));
        }
        if header.record_size != config.record_layout.record_size() {
            return Ok(StoreState::NeedsRebuild(NeedsRebuild::new(
                RebuildCause::ImplVersionMismatch,
                format!(
                    "store holds {} byte records, configured layout has {}",
                    header.record_size,
                    config.record_layout.record_size()
                ),
            )));
        }
        if header.format_version != config.version {
            return Ok(StoreState::NeedsRebuild(NeedsRebuild::new(
                RebuildCause::ImplVersionMismatch,
                format!(
                    "store version {} does not match expected {}",
                    header.format_version, config.version
                ),
            )));
        }
        if marker.exists() || header.status == ConnectionStatus::Corrupted {
            return Ok(StoreState::NeedsRebuild(NeedsRebuild::new(
                RebuildCause::ExplicitRequest,
                format!("rebuild requested (status {})", header.status),
            )));
        }
        if header.status != ConnectionStatus::SafelyClosed {
            return Ok(StoreState::NeedsRebuild(NeedsRebuild::new(
                RebuildCause::NotClosedProperly,
                format!("store was not closed properly (status {})", header.status),
            )));
        }

        let missing = paths.missing_essential_files();
        if !missing.is_empty() {
            return Ok(StoreState::NeedsRebuild(NeedsRebuild::new(
                RebuildCause::StorageFileMissingOrCorrupted,
                format!("missing store files: {}", missing.join(", ")),
            )));
        }

        Ok(StoreState::Ready(header))
    }

    /// Opens the store in `dir`, or creates it if the directory holds no
    /// store. Never deletes anything.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NeedsRebuild`] if the store cannot be used as
    /// is (including a read-only open of an empty directory), and I/O or
    /// storage errors otherwise.
    pub fn try_init(
        dir: &Path,
        config: Config,
        sink: Arc<dyn DiagnosticsSink>,
        extra_stores: &[Arc<dyn AuxiliaryStoreOpener>],
    ) -> CoreResult<Connection> {
        let paths = StorePaths::new(dir);
        match Self::probe(dir, &config)? {
            StoreState::Empty if config.read_only => Err(NeedsRebuild::new(
                RebuildCause::StorageFileMissingOrCorrupted,
                format!("no store in {}", dir.display()),
            )
            .into()),
            StoreState::Empty => Connection::create(paths, config, sink, extra_stores),
            StoreState::NeedsRebuild(request) => Err(request.into()),
            StoreState::Ready(_) => Connection::open(paths, config, sink, extra_stores)
                .map_err(|e| match e.rebuild_request() {
                    Some(request) => CoreError::NeedsRebuild(request),
                    None => e,
                }),
        }
    }

    /// Opens the store in `dir`, rebuilding it if it cannot be used.
    ///
    /// A rebuild reports the triggering error to `sink`, writes the
    /// corruption marker, deletes every other file in the directory,
    /// creates a fresh store and then removes the marker. If anything
    /// fails in between, the marker stays and the next connect rebuilds
    /// again.
    ///
    /// Read-only connections never rebuild; they return the
    /// [`CoreError::NeedsRebuild`] error instead.
    ///
    /// # Errors
    ///
    /// Returns I/O or storage errors that do not call for a rebuild, and
    /// any error of the rebuild itself.
    pub fn connect(
        dir: &Path,
        config: Config,
        sink: Arc<dyn DiagnosticsSink>,
        extra_stores: &[Arc<dyn AuxiliaryStoreOpener>],
    ) -> CoreResult<InitializationResult> {
        let started = Instant::now();

        let request = match Self::try_init(dir, config.clone(), Arc::clone(&sink), extra_stores) {
            Ok(connection) => {
                return Ok(InitializationResult {
                    connection,
                    rebuild_causes: Vec::new(),
                    total_init_duration: started.elapsed(),
                });
            }
            Err(CoreError::NeedsRebuild(request)) if !config.read_only => request,
            Err(e) => return Err(e),
        };

        sink.report("store needs rebuild", &request);
        warn!(
            dir = %dir.display(),
            cause = %request.cause,
            message = %request.message,
            "rebuilding store"
        );

        let paths = StorePaths::new(dir);
        let marker = CorruptionMarker::new(paths.marker());
        if !marker.exists() {
            let cause: &(dyn std::error::Error + 'static) = &request;
            marker.write(&format!("rebuild: {}", request.cause), Some(cause))?;
        }
        paths.wipe_except_marker()?;

        let connection = Connection::create(paths.clone(), config, sink, extra_stores)?;
        marker.remove()?;
        paths.sync_directory()?;

        let total_init_duration = started.elapsed();
        info!(
            dir = %dir.display(),
            cause = %request.cause,
            elapsed_ms = total_init_duration.as_millis() as u64,
            "store rebuilt"
        );
        Ok(InitializationResult {
            connection,
            rebuild_causes: vec![request.cause],
            total_init_duration,
        })
    }

    /// Closes a connection cleanly. Idempotent.
    ///
    /// # Errors
    ///
    /// See [`Connection::close`].
    pub fn disconnect(connection: &Connection) -> CoreResult<()> {
        connection.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use fsrecords_storage::StorageKind;
    use tempfile::tempdir;

    fn config() -> Config {
        Config::new().reset_storage_kind().storage_kind(StorageKind::LockFreeCache)
    }

    fn sink() -> Arc<dyn DiagnosticsSink> {
        Arc::new(CollectingSink::new())
    }

    #[test]
    fn empty_directory_creates_store() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("store");
        assert_eq!(Connector::probe(&dir, &config()).unwrap(), StoreState::Empty);

        let result = Connector::connect(&dir, config(), sink(), &[]).unwrap();
        assert!(!result.was_rebuilt());
        Connector::disconnect(&result.connection).unwrap();
        Connector::disconnect(&result.connection).unwrap();

        assert!(matches!(
            Connector::probe(&dir, &config()).unwrap(),
            StoreState::Ready(_)
        ));
    }

    #[test]
    fn read_only_never_creates() {
        let temp = tempdir().unwrap();
        let err = Connector::connect(temp.path(), config().read_only(true), sink(), &[]).unwrap_err();
        assert_eq!(
            err.rebuild_cause(),
            Some(RebuildCause::StorageFileMissingOrCorrupted)
        );
        assert!(StorePaths::new(temp.path()).list_files().unwrap().is_empty());
    }

    #[test]
    fn marker_in_empty_directory_is_consumed() {
        let temp = tempdir().unwrap();
        let paths = StorePaths::new(temp.path());
        CorruptionMarker::new(paths.marker()).write("interrupted rebuild", None).unwrap();

        let sink = Arc::new(CollectingSink::new());
        let result = Connector::connect(temp.path(), config(), sink.clone(), &[]).unwrap();
        assert_eq!(result.rebuild_causes, vec![RebuildCause::ExplicitRequest]);
        assert!(!paths.marker().exists());
        assert_eq!(sink.reports().len(), 1);
        result.connection.close().unwrap();
    }

    #[test]
    fn rebuild_reports_to_sink() {
        let temp = tempdir().unwrap();
        {
            let result = Connector::connect(temp.path(), config(), sink(), &[]).unwrap();
            result.connection.records().allocate_record().unwrap();
            result.connection.do_force().unwrap();
            // crash: no close
        }

        let sink = Arc::new(CollectingSink::new());
        let result = Connector::connect(temp.path(), config(), sink.clone(), &[]).unwrap();
        assert_eq!(result.rebuild_causes, vec![RebuildCause::NotClosedProperly]);
        assert_eq!(result.connection.records().records_count(), 0);
        let reports = sink.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].contains("NOT_CLOSED_PROPERLY"));
        result.connection.close().unwrap();
    }
}
