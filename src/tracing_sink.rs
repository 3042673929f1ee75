//! [`RecordSink`] backed by the `tracing` crate.

use tracing::{debug, Level};

use crate::types::Marker;
use crate::RecordSink;

/// Target used for every record emitted by [`TracingSink`].
pub const RECORD_TARGET: &str = "logging_filter::records";

/// Emits records as `tracing` debug events on the [`RECORD_TARGET`] target.
///
/// Levels are read from the active subscriber, so filtering `logging_filter::records=debug`
/// in or out switches capture on and off without touching the layer. The marker, when
/// present, is attached as a `marker` field.
///
/// # Examples
///
/// ```rust,no_run
/// use logging_filter::{FilterConfig, LoggingLayer, TracingSink};
///
/// tracing_subscriber::fmt()
///     .with_env_filter("logging_filter::records=debug")
///     .init();
///
/// let layer = LoggingLayer::new(FilterConfig::default(), TracingSink);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl RecordSink for TracingSink {
    fn debug_enabled(&self) -> bool {
        tracing::enabled!(target: RECORD_TARGET, Level::DEBUG)
    }

    fn trace_enabled(&self) -> bool {
        tracing::enabled!(target: RECORD_TARGET, Level::TRACE)
    }

    fn debug(&self, marker: Option<Marker>, message: &str) {
        match marker {
            Some(marker) => debug!(target: RECORD_TARGET, marker = marker.as_str(), "{message}"),
            None => debug!(target: RECORD_TARGET, "{message}"),
        }
    }
}
