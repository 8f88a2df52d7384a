//! Records backend selection.

use std::fmt;
use std::str::FromStr;

/// Environment variable consulted by [`StorageKind::from_env`].
pub const STORAGE_KIND_ENV: &str = "FSRECORDS_STORAGE_KIND";

/// The closed set of records storage backends.
///
/// The kind is recorded in the header of every records file: a file
/// written by one backend is never opened by another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageKind {
    /// Regular file accessed through an in-process page cache.
    PagedFile,
    /// Whole-file cache of atomic words; field access takes no lock.
    LockFreeCache,
    /// The file is memory-mapped in full.
    #[default]
    MappedFile,
}

impl StorageKind {
    /// All backend kinds.
    pub const ALL: [StorageKind; 3] = [Self::PagedFile, Self::LockFreeCache, Self::MappedFile];

    /// Tag byte stored in the header.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::PagedFile => 1,
            Self::LockFreeCache => 2,
            Self::MappedFile => 3,
        }
    }

    /// Converts a header tag byte back to a kind.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::PagedFile),
            2 => Some(Self::LockFreeCache),
            3 => Some(Self::MappedFile),
            _ => None,
        }
    }

    /// Configuration name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PagedFile => "paged-file",
            Self::LockFreeCache => "lock-free-mapped-cache",
            Self::MappedFile => "fully-mapped-file",
        }
    }

    /// Reads the kind from [`STORAGE_KIND_ENV`].
    ///
    /// Returns `None` when the variable is unset or not a known kind name.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        std::env::var(STORAGE_KIND_ENV)
            .ok()
            .and_then(|value| value.parse().ok())
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paged-file" | "paged" | "regular" => Ok(Self::PagedFile),
            "lock-free-mapped-cache" | "lock-free" | "lockfree" => Ok(Self::LockFreeCache),
            "fully-mapped-file" | "mapped" | "mmap" => Ok(Self::MappedFile),
            other => Err(format!("unknown storage kind: {other}")),
        }
    }
}
