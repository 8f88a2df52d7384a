//! Store configuration.

use fsrecords_storage::{RecordLayout, StorageKind, StorageOptions};

/// Configuration for connecting to a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Implementation version the caller expects. A store written with a
    /// different version is rebuilt.
    pub version: u32,

    /// Open without write access. Read-only connections never create,
    /// stamp or wipe anything.
    pub read_only: bool,

    /// Records backend. A store written by another backend is rebuilt.
    pub storage_kind: StorageKind,

    /// Layout of the record array.
    pub record_layout: RecordLayout,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            read_only: false,
            storage_kind: StorageKind::from_env().unwrap_or_default(),
            record_layout: RecordLayout::default(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the expected implementation version.
    #[must_use]
    pub const fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Sets read-only mode.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets the records backend.
    #[must_use]
    pub const fn storage_kind(mut self, kind: StorageKind) -> Self {
        self.storage_kind = kind;
        self
    }

    /// Sets the record layout.
    #[must_use]
    pub const fn record_layout(mut self, layout: RecordLayout) -> Self {
        self.record_layout = layout;
        self
    }

    /// Restores the default backend, ignoring the environment.
    #[must_use]
    pub fn reset_storage_kind(mut self) -> Self {
        self.storage_kind = StorageKind::default();
        self
    }

    /// Backend options derived from this configuration.
    #[must_use]
    pub const fn storage_options(&self) -> StorageOptions {
        StorageOptions {
            read_only: self.read_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default().reset_storage_kind();
        assert_eq!(config.version, 1);
        assert!(!config.read_only);
        assert_eq!(config.storage_kind, StorageKind::MappedFile);
        assert_eq!(config.record_layout, RecordLayout::default());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .version(7)
            .read_only(true)
            .storage_kind(StorageKind::LockFreeCache);

        assert_eq!(config.version, 7);
        assert!(config.storage_options().read_only);
        assert_eq!(config.storage_kind, StorageKind::LockFreeCache);
        assert_eq!(config.reset_storage_kind().storage_kind, StorageKind::default());
    }
}
