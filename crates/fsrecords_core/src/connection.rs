//! An open store: the records storage plus its auxiliary stores, opened
//! and closed as one unit.

use crate::aux::{AuxiliaryStore, AuxiliaryStoreOpener, OpenMode};
use crate::blobs::{BlobStore, ATTRIBUTES_MAGIC, CONTENT_MAGIC};
use crate::config::Config;
use crate::diagnostics::DiagnosticsSink;
use crate::error::{CoreError, CoreResult, NeedsRebuild, RebuildCause};
use crate::marker::CorruptionMarker;
use crate::names::NamesStore;
use crate::paths::{StorePaths, ATTRIBUTES_FILE, ATTRIBUTE_ENUMS_FILE, CONTENT_FILE, NAMES_FILE};
use fsrecords_storage::{current_time_millis, open_records_storage, ConnectionStatus, RecordsStorage};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Closes every store opened so far unless disarmed.
struct CloseOnError {
    sink: Arc<dyn DiagnosticsSink>,
    records: Option<Arc<dyn RecordsStorage>>,
    stores: Vec<Arc<dyn AuxiliaryStore>>,
    armed: bool,
}

impl CloseOnError {
    fn new(sink: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            sink,
            records: None,
            stores: Vec::new(),
            armed: true,
        }
    }

    fn track(&mut self, store: Arc<dyn AuxiliaryStore>) {
        self.stores.push(store);
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CloseOnError {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for store in self.stores.iter().rev() {
            if let Err(e) = store.close() {
                self.sink
                    .report(&format!("closing {} after failed open", store.name()), &e);
            }
        }
        if let Some(records) = &self.records {
            if let Err(e) = records.close() {
                self.sink.report("closing records after failed open", &e);
            }
        }
    }
}

/// An open store.
///
/// Obtained from [`Connector`](crate::Connector) (or directly through
/// [`open`](Self::open) / [`create`](Self::create) when the caller has
/// already validated the directory). Dropping a connection without
/// [`close`](Self::close) leaves the store looking crashed: the next open
/// reports `NOT_CLOSED_PROPERLY`.
pub struct Connection {
    paths: StorePaths,
    config: Config,
    records: Arc<dyn RecordsStorage>,
    names: Arc<NamesStore>,
    attributes: Arc<BlobStore>,
    attribute_enums: Arc<NamesStore>,
    contents: Arc<BlobStore>,
    extras: Vec<Arc<dyn AuxiliaryStore>>,
    sink: Arc<dyn DiagnosticsSink>,
    needs_rebuild: AtomicBool,
    dirty: AtomicBool,
    closed: AtomicBool,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("dir", &self.paths.dir())
            .field("kind", &self.records.kind())
            .field("read_only", &self.config.read_only)
            .field("records", &self.records.records_count())
            .field("needs_rebuild", &self.needs_rebuild())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Opens an existing store.
    ///
    /// The records file must exist and carry `config.version`. On a
    /// writable open the header is stamped `CONNECTED` and forced before
    /// the connection is returned. The connection status found on disk is
    /// not checked here; see [`Connector`](crate::Connector).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NeedsRebuild`] if the records file is missing
    /// or was written with another version, and the storage or auxiliary
    /// store error if one fails to open. Stores opened before the failure
    /// are closed.
    pub fn open(
        paths: StorePaths,
        config: Config,
        sink: Arc<dyn DiagnosticsSink>,
        extra_stores: &[Arc<dyn AuxiliaryStoreOpener>],
    ) -> CoreResult<Self> {
        if !paths.records().is_file() {
            return Err(NeedsRebuild::new(
                RebuildCause::StorageFileMissingOrCorrupted,
                format!("records file {} is missing", paths.records().display()),
            )
            .into());
        }
        Self::open_with_mode(paths, config, sink, extra_stores, OpenMode::Open)
    }

    /// Creates a fresh store in an empty directory.
    ///
    /// Writes `config.version` and a fresh creation timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for read-only configurations
    /// or if a records file already exists, and any I/O error. Files
    /// created before a failure are closed but left in place.
    pub fn create(
        paths: StorePaths,
        config: Config,
        sink: Arc<dyn DiagnosticsSink>,
        extra_stores: &[Arc<dyn AuxiliaryStoreOpener>],
    ) -> CoreResult<Self> {
        if config.read_only {
            return Err(CoreError::invalid_operation(
                "cannot create a store in read-only mode",
            ));
        }
        if paths.records().exists() {
            return Err(CoreError::invalid_operation(format!(
                "records file {} already exists",
                paths.records().display()
            )));
        }
        paths.ensure_dir()?;
        Self::open_with_mode(paths, config, sink, extra_stores, OpenMode::Create)
    }

    fn open_with_mode(
        paths: StorePaths,
        config: Config,
        sink: Arc<dyn DiagnosticsSink>,
        extra_stores: &[Arc<dyn AuxiliaryStoreOpener>],
        mode: OpenMode,
    ) -> CoreResult<Self> {
        let read_only = config.read_only;
        let mut guard = CloseOnError::new(Arc::clone(&sink));

        let records: Arc<dyn RecordsStorage> = Arc::from(open_records_storage(
            config.storage_kind,
            &paths.records(),
            config.record_layout,
            config.storage_options(),
        )?);
        guard.records = Some(Arc::clone(&records));

        if mode == OpenMode::Open && records.version() != config.version {
            return Err(NeedsRebuild::new(
                RebuildCause::ImplVersionMismatch,
                format!(
                    "store version {} does not match expected {}",
                    records.version(),
                    config.version
                ),
            )
            .into());
        }

        let names = Arc::new(NamesStore::open(&paths.names(), NAMES_FILE, mode, read_only, false)?);
        guard.track(Arc::clone(&names) as Arc<dyn AuxiliaryStore>);

        let attributes = Arc::new(BlobStore::open(
            &paths.attributes(),
            ATTRIBUTES_FILE,
            ATTRIBUTES_MAGIC,
            mode,
            read_only,
        )?);
        guard.track(Arc::clone(&attributes) as Arc<dyn AuxiliaryStore>);

        let attribute_enums = Arc::new(NamesStore::open(
            &paths.attribute_enums(),
            ATTRIBUTE_ENUMS_FILE,
            mode,
            read_only,
            true,
        )?);
        guard.track(Arc::clone(&attribute_enums) as Arc<dyn AuxiliaryStore>);

        let contents = Arc::new(BlobStore::open(
            &paths.contents(),
            CONTENT_FILE,
            CONTENT_MAGIC,
            mode,
            read_only,
        )?);
        guard.track(Arc::clone(&contents) as Arc<dyn AuxiliaryStore>);

        let mut extras = Vec::with_capacity(extra_stores.len());
        for opener in extra_stores {
            let store: Arc<dyn AuxiliaryStore> = Arc::from(opener.open(paths.dir(), mode, read_only)?);
            guard.track(Arc::clone(&store));
            extras.push(store);
        }

        let connection = Self {
            paths,
            config,
            records,
            names,
            attributes,
            attribute_enums,
            contents,
            extras,
            sink,
            needs_rebuild: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };

        if !read_only {
            if mode == OpenMode::Create {
                connection.records.set_version(connection.config.version)?;
                connection.records.set_timestamp(current_time_millis())?;
            }
            connection
                .records
                .set_connection_status(ConnectionStatus::Connected)?;
            connection.do_force()?;
            if mode == OpenMode::Create {
                connection.paths.sync_directory()?;
            }
        }

        guard.disarm();
        if mode == OpenMode::Create {
            info!(
                dir = %connection.paths.dir().display(),
                kind = %connection.config.storage_kind,
                version = connection.config.version,
                "created store"
            );
        } else {
            debug!(
                dir = %connection.paths.dir().display(),
                kind = %connection.config.storage_kind,
                records = connection.records.records_count(),
                read_only,
                "opened store"
            );
        }
        Ok(connection)
    }

    /// The records storage.
    #[must_use]
    pub fn records(&self) -> &dyn RecordsStorage {
        self.records.as_ref()
    }

    /// The names table.
    #[must_use]
    pub fn names(&self) -> &NamesStore {
        &self.names
    }

    /// The attribute blob store.
    #[must_use]
    pub fn attributes(&self) -> &BlobStore {
        &self.attributes
    }

    /// The attribute-name enumerator.
    #[must_use]
    pub fn attribute_enumerator(&self) -> &NamesStore {
        &self.attribute_enums
    }

    /// The content blob store.
    #[must_use]
    pub fn contents(&self) -> &BlobStore {
        &self.contents
    }

    /// A caller-supplied auxiliary store, by name.
    #[must_use]
    pub fn extra_store(&self, name: &str) -> Option<&dyn AuxiliaryStore> {
        self.extras
            .iter()
            .find(|store| store.name() == name)
            .map(|store| store.as_ref())
    }

    /// Store file layout.
    #[must_use]
    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Configuration the connection was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns true if the connection rejects mutations.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    /// Returns true once a rebuild has been scheduled.
    #[must_use]
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild.load(Ordering::Acquire)
    }

    /// Returns true if any store has writes not yet forced.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
            || self.records.is_dirty()
            || self.aux_stores().any(|store| store.is_dirty())
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn aux_stores(&self) -> impl Iterator<Item = &dyn AuxiliaryStore> {
        [
            &*self.names as &dyn AuxiliaryStore,
            &*self.attributes,
            &*self.attribute_enums,
            &*self.contents,
        ]
        .into_iter()
        .chain(self.extras.iter().map(|store| store.as_ref()))
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_closed() {
            return Err(CoreError::ConnectionClosed);
        }
        Ok(())
    }

    /// Records that there are unflushed changes and makes sure the header
    /// says `CONNECTED`.
    ///
    /// # Errors
    ///
    /// Fails if the connection is closed or read-only.
    pub fn mark_dirty(&self) -> CoreResult<()> {
        self.ensure_open()?;
        if self.needs_rebuild() {
            // CORRUPTED must survive until the rebuild.
            self.dirty.store(true, Ordering::Release);
            return Ok(());
        }
        self.records
            .set_connection_status(ConnectionStatus::Connected)?;
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Flushes every owned store without closing.
    ///
    /// Every store is forced even if an earlier one fails; the first error
    /// is returned.
    ///
    /// # Errors
    ///
    /// Fails if the connection is closed, or with the first flush error.
    pub fn do_force(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.force_all()
    }

    fn force_all(&self) -> CoreResult<()> {
        let mut first_error = None;
        for store in self.aux_stores() {
            if let Err(e) = store.force() {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.records.force() {
            first_error.get_or_insert(e.into());
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                self.dirty.store(false, Ordering::Release);
                Ok(())
            }
        }
    }

    /// Requests a rebuild on the next connect.
    ///
    /// Writes the corruption marker with `reason` and the cause chain, and
    /// on a writable connection stamps `CORRUPTED` into the header. No file
    /// is deleted.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the marker cannot be written, or the
    /// storage error of the header update.
    pub fn schedule_rebuild(&self, reason: &str, cause: Option<&(dyn Error + 'static)>) -> CoreResult<()> {
        CorruptionMarker::new(self.paths.marker()).write(reason, cause)?;
        self.needs_rebuild.store(true, Ordering::Release);
        warn!(
            dir = %self.paths.dir().display(),
            reason,
            cause = %cause.map(|c| c.to_string()).unwrap_or_default(),
            "store rebuild scheduled"
        );

        if !self.config.read_only && !self.is_closed() {
            self.records
                .set_connection_status(ConnectionStatus::Corrupted)?;
            self.records.force()?;
        }
        Ok(())
    }

    /// Flushes and releases every store. Idempotent.
    ///
    /// `SAFELY_CLOSED` (or `CORRUPTED`, if a rebuild was scheduled) is
    /// stamped only after every store flushed successfully; after a failed
    /// flush the header keeps `CONNECTED` and the next open rebuilds.
    ///
    /// # Errors
    ///
    /// Returns the first flush or release error. Every store is released
    /// regardless; later errors go to the diagnostics sink.
    pub fn close(&self) -> CoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut first_error: Option<CoreError> = None;
        if !self.config.read_only {
            match self.force_all() {
                Ok(()) => {
                    let status = if self.needs_rebuild() {
                        ConnectionStatus::Corrupted
                    } else {
                        ConnectionStatus::SafelyClosed
                    };
                    let stamped = self
                        .records
                        .set_connection_status(status)
                        .and_then(|()| self.records.force());
                    if let Err(e) = stamped {
                        first_error = Some(e.into());
                    }
                }
                Err(e) => first_error = Some(e),
            }
        }

        for store in self.aux_stores() {
            if let Err(e) = store.close() {
                self.release_failed(store.name(), e, &mut first_error);
            }
        }
        if let Err(e) = self.records.close() {
            self.release_failed("records", e.into(), &mut first_error);
        }

        match first_error {
            Some(e) => {
                warn!(dir = %self.paths.dir().display(), error = %e, "store closed uncleanly");
                Err(e)
            }
            None => {
                info!(dir = %self.paths.dir().display(), "store closed");
                Ok(())
            }
        }
    }

    fn release_failed(&self, store: &str, err: CoreError, first_error: &mut Option<CoreError>) {
        if first_error.is_some() {
            self.sink.report(&format!("closing {store}"), &err);
        } else {
            *first_error = Some(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use fsrecords_storage::{Header, StorageKind};
    use tempfile::tempdir;

    fn config() -> Config {
        Config::new().reset_storage_kind().storage_kind(StorageKind::PagedFile)
    }

    fn sink() -> Arc<dyn DiagnosticsSink> {
        Arc::new(CollectingSink::new())
    }

    #[test]
    fn create_stamps_connected_and_version() {
        let temp = tempdir().unwrap();
        let paths = StorePaths::new(temp.path());
        let connection = Connection::create(paths.clone(), config().version(3), sink(), &[]).unwrap();

        let header = Header::read_from(&paths.records()).unwrap();
        assert_eq!(header.status, ConnectionStatus::Connected);
        assert_eq!(header.format_version, 3);
        assert!(!connection.is_dirty());

        connection.close().unwrap();
        let header = Header::read_from(&paths.records()).unwrap();
        assert_eq!(header.status, ConnectionStatus::SafelyClosed);
        for file in crate::paths::ESSENTIAL_FILES {
            assert!(temp.path().join(file).is_file(), "{file}");
        }
    }

    #[test]
    fn create_refuses_existing_store() {
        let temp = tempdir().unwrap();
        let paths = StorePaths::new(temp.path());
        Connection::create(paths.clone(), config(), sink(), &[])
            .unwrap()
            .close()
            .unwrap();
        assert!(matches!(
            Connection::create(paths, config(), sink(), &[]),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn open_with_other_version_needs_rebuild() {
        let temp = tempdir().unwrap();
        let paths = StorePaths::new(temp.path());
        Connection::create(paths.clone(), config(), sink(), &[])
            .unwrap()
            .close()
            .unwrap();

        let err = Connection::open(paths.clone(), config().version(2), sink(), &[]).unwrap_err();
        assert_eq!(err.rebuild_cause(), Some(RebuildCause::ImplVersionMismatch));
        // The failed open released the records file without stamping it.
        assert_eq!(
            Header::read_from(&paths.records()).unwrap().status,
            ConnectionStatus::SafelyClosed
        );
    }

    #[test]
    fn failed_open_closes_opened_stores() {
        let temp = tempdir().unwrap();
        let paths = StorePaths::new(temp.path());
        Connection::create(paths.clone(), config(), sink(), &[])
            .unwrap()
            .close()
            .unwrap();
        std::fs::write(paths.contents(), b"garbage!garbage!").unwrap();

        let err = Connection::open(paths.clone(), config(), sink(), &[]).unwrap_err();
        assert_eq!(
            err.rebuild_cause(),
            Some(RebuildCause::StorageFileMissingOrCorrupted)
        );
        assert_eq!(
            Header::read_from(&paths.records()).unwrap().status,
            ConnectionStatus::SafelyClosed
        );
    }

    #[test]
    fn mark_dirty_and_force() {
        let temp = tempdir().unwrap();
        let connection = Connection::create(StorePaths::new(temp.path()), config(), sink(), &[]).unwrap();
        connection.mark_dirty().unwrap();
        assert!(connection.is_dirty());
        assert_eq!(
            connection.records().connection_status(),
            ConnectionStatus::Connected
        );
        connection.do_force().unwrap();
        assert!(!connection.is_dirty());
        connection.close().unwrap();
        assert!(matches!(connection.do_force(), Err(CoreError::ConnectionClosed)));
        connection.close().unwrap();
    }

    #[test]
    fn scheduled_rebuild_survives_close() {
        let temp = tempdir().unwrap();
        let paths = StorePaths::new(temp.path());
        let connection = Connection::create(paths.clone(), config(), sink(), &[]).unwrap();
        connection.schedule_rebuild("index out of sync", None).unwrap();
        assert!(connection.needs_rebuild());
        assert_eq!(
            Header::read_from(&paths.records()).unwrap().status,
            ConnectionStatus::Corrupted
        );

        connection.mark_dirty().unwrap();
        connection.close().unwrap();
        assert_eq!(
            Header::read_from(&paths.records()).unwrap().status,
            ConnectionStatus::Corrupted
        );
        assert!(paths.marker().is_file());
    }

    #[test]
    fn read_only_open_leaves_files_untouched() {
        let temp = tempdir().unwrap();
        let paths = StorePaths::new(temp.path());
        let connection = Connection::create(paths.clone(), config(), sink(), &[]).unwrap();
        connection.records().allocate_record().unwrap();
        connection.close().unwrap();
        let before = std::fs::read(paths.records()).unwrap();

        let connection = Connection::open(paths.clone(), config().read_only(true), sink(), &[]).unwrap();
        assert!(connection.is_read_only());
        assert_eq!(connection.records().records_count(), 1);
        assert!(connection.mark_dirty().is_err());
        connection.close().unwrap();
        assert_eq!(std::fs::read(paths.records()).unwrap(), before);
    }
}
