//! Error types for configuration and record rendering.

use crate::types::Marker;

/// Error raised while reading [`FilterConfig`](crate::FilterConfig) options.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for init parameter `{parameter}`, expected a boolean")]
    InvalidFlag { parameter: String, value: String },
}

/// Error raised while turning a snapshot into a log message.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("failed to serialize {marker} snapshot: {source}")]
    Serialize {
        marker: Marker,
        #[source]
        source: serde_json::Error,
    },
}
