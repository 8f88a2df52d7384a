//! Verify command implementation.

use super::store_config;
use fsrecords_core::{Connector, LoggingSink, StorageKind};
use std::path::Path;
use std::sync::Arc;

/// Runs the verify command.
///
/// Opens the store read-only with the strict initializer: nothing on disk
/// is changed, whatever the outcome.
pub fn run(path: &Path, version: u32, kind: Option<StorageKind>) -> Result<(), Box<dyn std::error::Error>> {
    let config = store_config(path, version, kind).read_only(true);
    println!(
        "Verifying store at {} (version {}, backend {})",
        path.display(),
        config.version,
        config.storage_kind
    );
    println!();

    match Connector::try_init(path, config, Arc::new(LoggingSink), &[]) {
        Ok(connection) => {
            println!("  Records:          {}", connection.records().records_count());
            println!("  Names:            {}", connection.names().len());
            println!("  Attributes:       {}", connection.attributes().len());
            println!("  Contents:         {}", connection.contents().len());
            Connector::disconnect(&connection)?;
            println!();
            println!("✓ Store verification passed");
            Ok(())
        }
        Err(e) => {
            match e.rebuild_cause() {
                Some(cause) => println!("✗ Store needs rebuild: {cause}"),
                None => println!("✗ Store could not be opened"),
            }
            println!("  {e}");
            Err("Verification failed".into())
        }
    }
}
