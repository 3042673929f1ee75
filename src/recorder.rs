//! Turning snapshots into log records and handing them to a [`RecordSink`].

use axum::body::Body;
use axum::response::Response;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, trace};

use crate::body_wrapper::CapturingBody;
use crate::error::RecordError;
use crate::types::{header_map, Marker, RequestSnapshot, ResponseSnapshot};
use crate::{FilterConfig, RecordSink};

/// Log levels reported by the sink, probed once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verbosity {
    pub debug: bool,
    pub trace: bool,
}

impl Verbosity {
    /// Ask the sink for its levels. Trace is only queried when debug is enabled.
    pub fn probe<K: RecordSink + ?Sized>(sink: &K) -> Self {
        let debug = sink.debug_enabled();
        let trace = debug && sink.trace_enabled();
        Self { debug, trace }
    }
}

/// A rendered log record: the message text plus an optional marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub marker: Option<Marker>,
    pub message: String,
}

impl LogRecord {
    /// Serialize `snapshot` and shape it according to the prefix and marker options.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use axum::http::StatusCode;
    /// use logging_filter::recorder::LogRecord;
    /// use logging_filter::types::{Marker, ResponseSnapshot};
    /// use logging_filter::FilterConfig;
    ///
    /// let snapshot = ResponseSnapshot::new(StatusCode::OK, Default::default(), Some(b"ok"));
    ///
    /// let config = FilterConfig::default();
    /// let record = LogRecord::render(&config, Marker::Response, &snapshot).unwrap();
    /// assert_eq!(record.marker, Some(Marker::Response));
    /// assert_eq!(record.message, r#"RESPONSE: {"status":200,"headers":{},"body":"ok"}"#);
    /// ```
    pub fn render<T: Serialize>(
        config: &FilterConfig,
        marker: Marker,
        snapshot: &T,
    ) -> Result<Self, RecordError> {
        let json = serde_json::to_string(snapshot)
            .map_err(|source| RecordError::Serialize { marker, source })?;

        let message = if config.disable_prefix {
            json
        } else {
            format!("{marker}: {json}")
        };

        Ok(Self {
            marker: (!config.disable_marker).then_some(marker),
            message,
        })
    }
}

/// Shared, immutable per-layer state: the configuration and the sink.
pub(crate) struct Recorder<K> {
    config: Arc<FilterConfig>,
    sink: Arc<K>,
}

impl<K> Clone for Recorder<K> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            sink: self.sink.clone(),
        }
    }
}

impl<K: RecordSink> Recorder<K> {
    pub(crate) fn new(config: Arc<FilterConfig>, sink: Arc<K>) -> Self {
        Self { config, sink }
    }

    pub(crate) fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub(crate) fn verbosity(&self) -> Verbosity {
        Verbosity::probe(self.sink.as_ref())
    }

    pub(crate) fn record<T: Serialize>(&self, marker: Marker, snapshot: &T) {
        match LogRecord::render(&self.config, marker, snapshot) {
            Ok(record) => self.sink.debug(record.marker, &record.message),
            Err(e) => error!(error = %e, "Dropping log record"),
        }
    }

    /// Arrange for the response record to be emitted.
    ///
    /// With response capture on, the body is wrapped and the record goes out once the body
    /// has been fully sent or dropped. Otherwise the record goes out immediately.
    pub(crate) fn watch_response(&self, response: Response, verbosity: Verbosity) -> Response {
        let (parts, body) = response.into_parts();
        let status = parts.status;
        let headers = header_map(&parts.headers);

        if !self.config.capture_response_body {
            self.record(Marker::Response, &ResponseSnapshot::new(status, headers, None));
            return Response::from_parts(parts, body);
        }

        let recorder = self.clone();
        let body = CapturingBody::new(body).on_finish(move |captured| {
            if verbosity.trace {
                trace!(status = %status, bytes = captured.len(), "Response body captured");
            }
            recorder.record(
                Marker::Response,
                &ResponseSnapshot::new(status, headers, Some(captured)),
            );
        });

        Response::from_parts(parts, Body::new(body))
    }
}

/// Request record waiting for the inner service to finish.
///
/// Emitted by [`PendingRequest::emit`], or on drop if the request future is cancelled first.
pub(crate) struct PendingRequest<K: RecordSink> {
    recorder: Recorder<K>,
    snapshot: Option<RequestSnapshot>,
}

impl<K: RecordSink> PendingRequest<K> {
    pub(crate) fn new(recorder: Recorder<K>, snapshot: RequestSnapshot) -> Self {
        Self {
            recorder,
            snapshot: Some(snapshot),
        }
    }

    pub(crate) fn emit(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.recorder.record(Marker::Request, &snapshot);
        }
    }
}

impl<K: RecordSink> Drop for PendingRequest<K> {
    fn drop(&mut self) {
        self.emit();
    }
}
