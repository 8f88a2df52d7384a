//! Invalidate command implementation.

use super::store_config;
use fsrecords_core::{Connector, CoreError, CorruptionMarker, LoggingSink, StorageKind, StorePaths};
use std::path::Path;
use std::sync::Arc;

/// Runs the invalidate command.
///
/// A store that already needs a rebuild only gets the marker; otherwise
/// the store is opened and the rebuild scheduled through the connection,
/// which also stamps the header.
pub fn run(
    path: &Path,
    reason: &str,
    version: u32,
    kind: Option<StorageKind>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = store_config(path, version, kind);

    match Connector::try_init(path, config, Arc::new(LoggingSink), &[]) {
        Ok(connection) => {
            connection.schedule_rebuild(reason, None)?;
            Connector::disconnect(&connection)?;
        }
        Err(CoreError::NeedsRebuild(request)) => {
            println!("Store already needs rebuild: {}", request.cause);
            let cause: &(dyn std::error::Error + 'static) = &request;
            CorruptionMarker::new(StorePaths::new(path).marker()).write(reason, Some(cause))?;
        }
        Err(e) => return Err(e.into()),
    }

    println!("Rebuild scheduled for {}: {reason}", path.display());
    Ok(())
}
