//! Store directory layout.
//!
//! ```text
//! <dir>/
//! ├─ records.dat           # header + record array
//! ├─ names.dat             # interned names
//! ├─ attributes.dat        # attribute blobs
//! ├─ attributes_enums.dat  # attribute-name enumerator (regenerated when missing)
//! ├─ content.dat           # content blobs
//! ├─ <extra>.dat           # caller-supplied auxiliary stores
//! └─ corruption.marker     # only while a rebuild is pending
//! ```
//!
//! There is no lock file: a second writer is detected through the
//! connection status stored in the records header.

use crate::error::CoreResult;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Records file.
pub const RECORDS_FILE: &str = "records.dat";
/// Names table.
pub const NAMES_FILE: &str = "names.dat";
/// Attribute blobs.
pub const ATTRIBUTES_FILE: &str = "attributes.dat";
/// Attribute-name enumerator.
pub const ATTRIBUTE_ENUMS_FILE: &str = "attributes_enums.dat";
/// Content blobs.
pub const CONTENT_FILE: &str = "content.dat";
/// Corruption marker.
pub const MARKER_FILE: &str = "corruption.marker";

/// Files that must exist for an existing store to be opened.
pub const ESSENTIAL_FILES: [&str; 4] = [RECORDS_FILE, NAMES_FILE, ATTRIBUTES_FILE, CONTENT_FILE];

/// Store files whose loss does not force a rebuild; they are recreated
/// empty on open.
pub const NON_ESSENTIAL_FILES: [&str; 1] = [ATTRIBUTE_ENUMS_FILE];

/// Paths of the files making up one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    dir: PathBuf,
}

impl StorePaths {
    /// Layout rooted at `dir`. Nothing is touched on disk.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Records file.
    #[must_use]
    pub fn records(&self) -> PathBuf {
        self.dir.join(RECORDS_FILE)
    }

    /// Names table.
    #[must_use]
    pub fn names(&self) -> PathBuf {
        self.dir.join(NAMES_FILE)
    }

    /// Attribute blobs.
    #[must_use]
    pub fn attributes(&self) -> PathBuf {
        self.dir.join(ATTRIBUTES_FILE)
    }

    /// Attribute-name enumerator.
    #[must_use]
    pub fn attribute_enums(&self) -> PathBuf {
        self.dir.join(ATTRIBUTE_ENUMS_FILE)
    }

    /// Content blobs.
    #[must_use]
    pub fn contents(&self) -> PathBuf {
        self.dir.join(CONTENT_FILE)
    }

    /// Corruption marker.
    #[must_use]
    pub fn marker(&self) -> PathBuf {
        self.dir.join(MARKER_FILE)
    }

    /// File of a caller-supplied auxiliary store.
    #[must_use]
    pub fn extra(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.dat"))
    }

    /// Returns true if the directory is absent or holds none of the
    /// built-in store files.
    #[must_use]
    pub fn is_empty_store(&self) -> bool {
        ESSENTIAL_FILES
            .iter()
            .chain(NON_ESSENTIAL_FILES.iter())
            .all(|name| !self.dir.join(name).exists())
    }

    /// Essential files that do not exist.
    #[must_use]
    pub fn missing_essential_files(&self) -> Vec<&'static str> {
        ESSENTIAL_FILES
            .iter()
            .copied()
            .filter(|name| !self.dir.join(name).is_file())
            .collect()
    }

    /// Every entry of the store directory, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be read.
    pub fn list_files(&self) -> CoreResult<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = fs::read_dir(&self.dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()?;
        files.sort();
        Ok(files)
    }

    /// Deletes everything in the store directory except the corruption
    /// marker, then syncs the directory.
    ///
    /// Returns the number of entries removed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if an entry cannot be removed.
    pub fn wipe_except_marker(&self) -> CoreResult<usize> {
        let marker = self.marker();
        let mut removed = 0;
        for path in self.list_files()? {
            if path == marker {
                continue;
            }
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
            debug!(path = %path.display(), "removed store file");
            removed += 1;
        }
        if removed > 0 {
            self.sync_directory()?;
        }
        Ok(removed)
    }

    /// Creates the store directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn ensure_dir(&self) -> CoreResult<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Syncs the store directory so file creations and deletions are
    /// durable.
    #[cfg(unix)]
    pub fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }

    /// NTFS journals metadata; there is no directory handle to sync.
    #[cfg(not(unix))]
    pub fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}
