//! Corruption marker: a plain-text file whose presence requests a rebuild.

use crate::error::CoreResult;
use fsrecords_storage::current_time_millis;
use std::error::Error;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// The corruption marker of one store directory.
///
/// The content is diagnostic only; the connector only checks whether the
/// file exists.
#[derive(Debug, Clone)]
pub struct CorruptionMarker {
    path: PathBuf,
}

impl CorruptionMarker {
    /// Marker at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the marker file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes (or overwrites) the marker and syncs it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be written.
    pub fn write(&self, reason: &str, cause: Option<&(dyn Error + 'static)>) -> CoreResult<()> {
        let mut text = String::new();
        let _ = writeln!(text, "reason: {reason}");
        let _ = writeln!(text, "timestamp: {}", current_time_millis());
        if let Some(cause) = cause {
            let _ = writeln!(text, "cause: {cause}");
            let mut source = cause.source();
            while let Some(err) = source {
                let _ = writeln!(text, "caused by: {err}");
                source = err.source();
            }
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&self.path)?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Returns true if the marker exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Reads the marker text.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the marker is missing or unreadable.
    pub fn read(&self) -> CoreResult<String> {
        Ok(fs::read_to_string(&self.path)?)
    }

    /// Deletes the marker. Missing markers are not an error.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be removed.
    pub fn remove(&self) -> CoreResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
