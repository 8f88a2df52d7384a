//! CLI command implementations.

pub mod inspect;
pub mod invalidate;
pub mod verify;

use fsrecords_core::{Config, Header, StorageKind, StorePaths};
use std::path::Path;

/// Builds the configuration a command opens the store with.
///
/// Without an explicit kind, the backend recorded in the header is used so
/// that a store is never reported as mismatched just because the CLI runs
/// with another default.
pub(crate) fn store_config(path: &Path, version: u32, kind: Option<StorageKind>) -> Config {
    let header_kind = || {
        Header::read_from(&StorePaths::new(path).records())
            .ok()
            .map(|header| header.kind)
    };
    let mut config = Config::new().version(version);
    if let Some(kind) = kind.or_else(header_kind) {
        config = config.storage_kind(kind);
    }
    config
}
