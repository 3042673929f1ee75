//! # logging-filter
//!
//! An Axum/Tower middleware that logs every request and response passing through it as a JSON
//! record, without changing a single byte the handler or the client sees.
//!
//! ## Features
//!
//! - **Transparent**: the request body is read and replayed, the response body is copied as it
//!   streams to the client
//! - **Level-gated**: when the sink reports debug disabled, requests pass straight through and
//!   nothing is read, wrapped or serialized
//! - **Configurable shape**: `REQUEST: ` / `RESPONSE: ` prefixes and `REQUEST` / `RESPONSE`
//!   markers can be switched off independently
//! - **Pluggable backend**: records go to any [`RecordSink`]; [`TracingSink`] is provided
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{routing::post, Router};
//! use logging_filter::{FilterConfig, LoggingLayer, TracingSink};
//! use std::net::SocketAddr;
//!
//! async fn echo(body: String) -> String {
//!     body
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("logging_filter::records=debug")
//!         .init();
//!
//!     let app = Router::new()
//!         .route("/echo", post(echo))
//!         .layer(LoggingLayer::new(FilterConfig::default(), TracingSink));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
//!         .await
//!         .unwrap();
//! }
//! ```
//!
//! A `POST /echo` with body `hi` then produces two debug records:
//!
//! ```text
//! REQUEST: {"sender":"127.0.0.1","method":"POST","path":"http://localhost:3000/echo","params":{},"headers":{...},"body":"hi"}
//! RESPONSE: {"status":200,"headers":{"Content-Type":"text/plain; charset=utf-8"},"body":"hi"}
//! ```
//!
//! ## Custom Sinks
//!
//! Implement [`RecordSink`] to send records somewhere else:
//!
//! ```rust
//! use logging_filter::{types::Marker, RecordSink};
//!
//! #[derive(Debug)]
//! struct StderrSink;
//!
//! impl RecordSink for StderrSink {
//!     fn debug_enabled(&self) -> bool {
//!         true
//!     }
//!
//!     fn trace_enabled(&self) -> bool {
//!         false
//!     }
//!
//!     fn debug(&self, marker: Option<Marker>, message: &str) {
//!         match marker {
//!             Some(marker) => eprintln!("[{marker}] {message}"),
//!             None => eprintln!("{message}"),
//!         }
//!     }
//! }
//! ```

use axum::{extract::Request, response::Response};
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::{debug, trace};

pub mod body_wrapper;
use body_wrapper::buffer_body;

pub mod config;
pub use config::FilterConfig;

pub mod error;
pub use error::{ConfigError, RecordError};

pub mod recorder;
use recorder::{PendingRequest, Recorder};
pub use recorder::{LogRecord, Verbosity};

pub mod tracing_sink;
pub use tracing_sink::TracingSink;

pub mod types;
pub use types::{Marker, RequestSnapshot, ResponseSnapshot};

/// Destination for finished log records.
///
/// The layer asks [`debug_enabled`](RecordSink::debug_enabled) once per request before doing
/// any capture work, and [`trace_enabled`](RecordSink::trace_enabled) once more when debug is
/// on. Each record is then handed to [`debug`](RecordSink::debug), synchronously, on the task
/// serving the request.
pub trait RecordSink: Send + Sync + 'static {
    /// Whether debug records would be kept. `false` turns the layer into a pass-through.
    fn debug_enabled(&self) -> bool;

    /// Whether trace output would be kept. Enables extra diagnostics from the layer itself.
    fn trace_enabled(&self) -> bool;

    /// Emit one record. `marker` is `None` when markers are disabled.
    fn debug(&self, marker: Option<Marker>, message: &str);
}

/// Tower layer for the logging filter.
///
/// # Examples
///
/// ```rust
/// use axum::{routing::get, Router};
/// use logging_filter::{LoggingLayer, TracingSink};
///
/// # async fn hello() -> &'static str { "Hello" }
/// let layer = LoggingLayer::from_init_params(
///     [("disablePrefix", "true"), ("disableMarker", "false")],
///     TracingSink,
/// )
/// .unwrap();
///
/// let app: Router = Router::new().route("/hello", get(hello)).layer(layer);
/// ```
pub struct LoggingLayer<K = TracingSink> {
    config: Arc<FilterConfig>,
    sink: Arc<K>,
}

impl<K: RecordSink> LoggingLayer<K> {
    pub fn new(config: FilterConfig, sink: K) -> Self {
        Self {
            config: Arc::new(config),
            sink: Arc::new(sink),
        }
    }

    /// Build the layer from string init parameters. See
    /// [`FilterConfig::from_init_params`].
    pub fn from_init_params<I, N, V>(params: I, sink: K) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: AsRef<str>,
    {
        Ok(Self::new(FilterConfig::from_init_params(params)?, sink))
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }
}

impl Default for LoggingLayer<TracingSink> {
    fn default() -> Self {
        Self::new(FilterConfig::default(), TracingSink)
    }
}

impl<K> Clone for LoggingLayer<K> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            sink: self.sink.clone(),
        }
    }
}

impl<S, K: RecordSink> Layer<S> for LoggingLayer<K> {
    type Service = LoggingService<S, K>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingService {
            inner,
            recorder: Recorder::new(self.config.clone(), self.sink.clone()),
        }
    }
}

/// Tower service implementation of the logging filter.
///
/// Created by [`LoggingLayer`]. Errors from the inner service are returned unchanged.
pub struct LoggingService<S, K = TracingSink> {
    inner: S,
    recorder: Recorder<K>,
}

impl<S: Clone, K> Clone for LoggingService<S, K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            recorder: self.recorder.clone(),
        }
    }
}

impl<S, K> Service<Request> for LoggingService<S, K>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    K: RecordSink,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let verbosity = self.recorder.verbosity();
        if !verbosity.debug {
            return Box::pin(self.inner.call(request));
        }

        // The instance that was polled ready goes into the future; keep a fresh clone.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let recorder = self.recorder.clone();

        Box::pin(async move {
            let (request, snapshot) = capture_request(request, recorder.config(), verbosity).await;
            let mut pending = PendingRequest::new(recorder.clone(), snapshot);

            debug!("Awaiting inner service response");
            let result = inner.call(request).await;
            pending.emit();

            match result {
                Ok(response) => Ok(recorder.watch_response(response, verbosity)),
                Err(e) => {
                    debug!("Inner service failed, no response to record");
                    Err(e)
                }
            }
        })
    }
}

/// Snapshot the request, reading the body first when configured to.
///
/// The returned request carries a body equivalent to the original one.
async fn capture_request(
    request: Request,
    config: &FilterConfig,
    verbosity: Verbosity,
) -> (Request, RequestSnapshot) {
    let (parts, body) = request.into_parts();

    if !config.capture_request_body {
        let snapshot = RequestSnapshot::from_parts(&parts, None);
        return (Request::from_parts(parts, body), snapshot);
    }

    let buffered = buffer_body(body).await;
    let snapshot = RequestSnapshot::from_parts(&parts, buffered.payload());
    if verbosity.trace {
        trace!(
            method = %parts.method,
            uri = %parts.uri,
            bytes = ?buffered.payload().map(<[u8]>::len),
            "Request body buffered"
        );
    }

    (Request::from_parts(parts, buffered.into_body()), snapshot)
}
