//! Reporting of errors that trigger a rebuild or are swallowed on cleanup
//! paths.

use parking_lot::Mutex;
use std::error::Error;
use tracing::error;

/// Receives errors the caller would otherwise never see.
pub trait DiagnosticsSink: Send + Sync {
    /// Reports an error together with what was being done when it occurred.
    fn report(&self, context: &str, err: &(dyn Error + 'static));
}

/// Sink that logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl DiagnosticsSink for LoggingSink {
    fn report(&self, context: &str, err: &(dyn Error + 'static)) {
        error!(context, error = %err, "store diagnostic");
    }
}

/// Sink that keeps every report in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    reports: Mutex<Vec<String>>,
}

impl CollectingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports received so far, as `"<context>: <error>"`.
    #[must_use]
    pub fn reports(&self) -> Vec<String> {
        self.reports.lock().clone()
    }

    /// Drops every report.
    pub fn clear(&self) {
        self.reports.lock().clear();
    }
}

impl DiagnosticsSink for CollectingSink {
    fn report(&self, context: &str, err: &(dyn Error + 'static)) {
        self.reports.lock().push(format!("{context}: {err}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    #[test]
    fn collecting_sink_keeps_reports() {
        let sink = CollectingSink::new();
        sink.report("closing names", &CoreError::ConnectionClosed);
        sink.report("rebuild", &CoreError::corrupted("bad magic"));
        assert_eq!(
            sink.reports(),
            vec![
                "closing names: connection is closed".to_string(),
                "rebuild: store corrupted: bad magic".to_string(),
            ]
        );
        sink.clear();
        assert!(sink.reports().is_empty());
    }
}
