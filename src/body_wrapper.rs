//! Body capture utilities.
//!
//! [`CapturingBody`] sits between a response body and whoever polls it, copying every data
//! frame into a buffer while passing the frame on untouched. [`buffer_body`] drains a request
//! body up front and hands back an equivalent body for the downstream handler.

use axum::body::{Body, Bytes};
use bytes::BytesMut;
use http_body::{Frame, SizeHint};
use http_body_util::BodyExt;
use pin_project_lite::pin_project;
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tracing::error;

type FinishCallback = Box<dyn FnOnce(&[u8]) + Send + 'static>;

pin_project! {
    /// Body decorator that records every data frame it forwards.
    ///
    /// Frames, trailers, errors, `is_end_stream` and `size_hint` are all those of the inner
    /// body. The bytes seen so far are available through [`CapturingBody::captured`].
    ///
    /// A callback registered with [`CapturingBody::on_finish`] runs exactly once: when the
    /// inner body reports end of stream, or when the wrapper is dropped before that.
    ///
    /// The capture buffer is unbounded. A long-lived stream such as server-sent events keeps
    /// growing it for as long as the connection stays open.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use axum::body::Body;
    /// use http_body_util::BodyExt;
    /// use logging_filter::body_wrapper::CapturingBody;
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let mut body = CapturingBody::new(Body::from("Hello, World!"));
    /// while let Some(frame) = body.frame().await {
    ///     frame.unwrap();
    /// }
    /// assert_eq!(body.captured(), b"Hello, World!");
    /// # }
    /// ```
    pub struct CapturingBody<B> {
        #[pin]
        inner: B,
        captured: BytesMut,
        on_finish: Option<FinishCallback>,
    }

    impl<B> PinnedDrop for CapturingBody<B> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(callback) = this.on_finish.take() {
                callback(&this.captured[..]);
            }
        }
    }
}

impl<B> CapturingBody<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            captured: BytesMut::new(),
            on_finish: None,
        }
    }

    /// Register the callback that receives the captured bytes once the body is done.
    pub fn on_finish<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&[u8]) + Send + 'static,
    {
        self.on_finish = Some(Box::new(callback));
        self
    }

    /// Everything captured so far.
    pub fn captured(&self) -> &[u8] {
        &self.captured
    }
}

impl<B> fmt::Debug for CapturingBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturingBody")
            .field("captured_len", &self.captured.len())
            .field("finished", &self.on_finish.is_none())
            .finish_non_exhaustive()
    }
}

impl<B> http_body::Body for CapturingBody<B>
where
    B: http_body::Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let polled = ready!(this.inner.poll_frame(cx));

        match &polled {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    this.captured.extend_from_slice(data);
                }
            }
            Some(Err(_)) => {}
            None => {
                if let Some(callback) = this.on_finish.take() {
                    callback(&this.captured[..]);
                }
            }
        }

        Poll::Ready(polled)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// A request body that has been read into memory.
///
/// Created by [`buffer_body`]. The original frames are kept so the body can be replayed
/// downstream exactly as it arrived, including a trailing error if reading failed.
pub struct BufferedBody {
    frames: Vec<Frame<Bytes>>,
    payload: BytesMut,
    error: Option<axum::Error>,
}

impl BufferedBody {
    /// The concatenated data frames, or `None` if the body could not be read to the end.
    pub fn payload(&self) -> Option<&[u8]> {
        match self.error {
            Some(_) => None,
            None => Some(&self.payload[..]),
        }
    }

    /// Turn the buffered frames back into a body the downstream handler can consume.
    ///
    /// The replayed body reports the exact length of the buffered data unless a read error is
    /// pending.
    pub fn into_body(self) -> Body {
        if self.error.is_none() && self.frames.iter().all(Frame::is_data) {
            return Body::from(self.payload.freeze());
        }

        Body::new(ReplayBody {
            remaining: self.payload.len() as u64,
            frames: self.frames.into(),
            error: self.error,
        })
    }
}

/// Replays buffered frames that include trailers or end in an error.
struct ReplayBody {
    frames: VecDeque<Frame<Bytes>>,
    error: Option<axum::Error>,
    remaining: u64,
}

impl http_body::Body for ReplayBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if let Some(frame) = this.frames.pop_front() {
            if let Some(data) = frame.data_ref() {
                this.remaining = this.remaining.saturating_sub(data.len() as u64);
            }
            return Poll::Ready(Some(Ok(frame)));
        }

        Poll::Ready(this.error.take().map(Err))
    }

    fn is_end_stream(&self) -> bool {
        self.frames.is_empty() && self.error.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        match self.error {
            Some(_) => {
                let mut hint = SizeHint::new();
                hint.set_lower(self.remaining);
                hint
            }
            None => SizeHint::with_exact(self.remaining),
        }
    }
}

/// Read a body to the end without losing any of it.
///
/// # Examples
///
/// ```rust
/// use axum::body::Body;
/// use http_body_util::BodyExt;
/// use logging_filter::body_wrapper::buffer_body;
///
/// # #[tokio::main]
/// # async fn main() {
/// let buffered = buffer_body(Body::from("Test request body")).await;
/// assert_eq!(buffered.payload(), Some(&b"Test request body"[..]));
///
/// // The downstream handler still sees the full body
/// let replayed = buffered.into_body().collect().await.unwrap().to_bytes();
/// assert_eq!(replayed, "Test request body");
/// # }
/// ```
pub async fn buffer_body(mut body: Body) -> BufferedBody {
    let mut frames = Vec::new();
    let mut payload = BytesMut::new();
    let mut error = None;

    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                if let Some(data) = frame.data_ref() {
                    payload.extend_from_slice(data);
                }
                frames.push(frame);
            }
            Err(e) => {
                error!(
                    error = %e,
                    bytes_read = payload.len(),
                    "Stream error while buffering request body"
                );
                error = Some(e);
                break;
            }
        }
    }

    BufferedBody {
        frames,
        payload,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use http_body::Body as _;
    use http_body_util::StreamBody;
    use std::io;
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<Vec<u8>>>>;

    fn recording(body: Body) -> (CapturingBody<Body>, Seen) {
        let seen: Seen = Arc::default();
        let sink = seen.clone();
        let body = CapturingBody::new(body).on_finish(move |captured| {
            sink.lock().unwrap().push(captured.to_vec());
        });
        (body, seen)
    }

    fn chunked(chunks: Vec<Result<&'static str, io::Error>>) -> Body {
        Body::from_stream(futures::stream::iter(chunks))
    }

    #[tokio::test]
    async fn test_streaming_body_capture() {
        let body = chunked(vec![Ok("chunk1"), Ok("chunk2"), Ok("chunk3")]);
        let (mut body, seen) = recording(body);

        let mut delivered: Vec<u8> = Vec::new();
        while let Some(frame) = body.frame().await {
            delivered.extend_from_slice(frame.unwrap().data_ref().unwrap());
        }

        assert_eq!(delivered, b"chunk1chunk2chunk3");
        assert_eq!(body.captured(), b"chunk1chunk2chunk3");
        // Reading the capture is repeatable
        assert_eq!(body.captured(), body.captured());

        // Finished at end of stream, and not again on drop
        assert_eq!(seen.lock().unwrap().len(), 1);
        drop(body);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], b"chunk1chunk2chunk3");
    }

    #[tokio::test]
    async fn test_collect_passes_everything_through() {
        let large_data = "x".repeat(64 * 1024);
        let (body, seen) = recording(Body::from(large_data.clone()));

        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected, large_data);
        assert_eq!(seen.lock().unwrap()[0], large_data.as_bytes());
    }

    #[tokio::test]
    async fn test_finish_runs_on_drop_when_never_polled() {
        let (body, seen) = recording(Body::from("never read"));
        assert!(seen.lock().unwrap().is_empty());

        drop(body);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_empty());
    }

    #[tokio::test]
    async fn test_inner_error_propagates_unchanged() {
        let body = chunked(vec![Ok("partial"), Err(io::Error::other("connection reset"))]);
        let (mut body, seen) = recording(body);

        let first = body.frame().await.unwrap().unwrap();
        assert_eq!(first.into_data().unwrap(), "partial");

        let err = body.frame().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(body.captured(), b"partial");

        drop(body);
        assert_eq!(seen.lock().unwrap()[0], b"partial");
    }

    #[tokio::test]
    async fn test_size_hint_and_end_stream_delegate() {
        let body = CapturingBody::new(Body::from("12345"));
        assert_eq!(body.size_hint().exact(), Some(5));
        assert!(!body.is_end_stream());

        let empty = CapturingBody::new(Body::empty());
        assert!(empty.is_end_stream());
    }

    #[tokio::test]
    async fn test_trailers_are_forwarded_not_captured() {
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", "abc".parse().unwrap());
        let frames: Vec<Result<Frame<Bytes>, io::Error>> = vec![
            Ok(Frame::data(Bytes::from("data"))),
            Ok(Frame::trailers(trailers)),
        ];
        let inner = StreamBody::new(futures::stream::iter(frames));

        let collected = CapturingBody::new(inner).collect().await.unwrap();
        assert_eq!(collected.trailers().unwrap()["x-checksum"], "abc");
        assert_eq!(collected.to_bytes(), "data");
    }

    #[tokio::test]
    async fn test_buffer_body_replays_frames() {
        let buffered = buffer_body(chunked(vec![Ok("Test "), Ok("request "), Ok("body")])).await;
        assert_eq!(buffered.payload(), Some(&b"Test request body"[..]));

        let replayed = buffered.into_body();
        assert_eq!(replayed.size_hint().exact(), Some(17));
        let replayed = replayed.collect().await.unwrap().to_bytes();
        assert_eq!(replayed, "Test request body");
    }

    #[tokio::test]
    async fn test_buffer_body_empty() {
        let buffered = buffer_body(Body::empty()).await;
        assert_eq!(buffered.payload(), Some(&b""[..]));

        let replayed = buffered.into_body();
        assert_eq!(replayed.size_hint().exact(), Some(0));
        assert!(replayed.collect().await.unwrap().to_bytes().is_empty());
    }

    #[tokio::test]
    async fn test_buffer_body_replays_trailers_with_exact_length() {
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", "abc".parse().unwrap());
        let frames: Vec<Result<Frame<Bytes>, io::Error>> = vec![
            Ok(Frame::data(Bytes::from("data"))),
            Ok(Frame::trailers(trailers)),
        ];
        let body = Body::new(StreamBody::new(futures::stream::iter(frames)));
        let buffered = buffer_body(body).await;
        assert_eq!(buffered.payload(), Some(&b"data"[..]));

        let replayed = buffered.into_body();
        assert_eq!(replayed.size_hint().exact(), Some(4));
        let collected = replayed.collect().await.unwrap();
        assert_eq!(collected.trailers().unwrap()["x-checksum"], "abc");
        assert_eq!(collected.to_bytes(), "data");
    }

    #[tokio::test]
    async fn test_buffer_body_replays_read_error() {
        let body = chunked(vec![Ok("partial"), Err(io::Error::other("client went away"))]);
        let buffered = buffer_body(body).await;
        assert_eq!(buffered.payload(), None);

        let mut replayed = buffered.into_body();
        assert_eq!(replayed.size_hint().exact(), None);
        assert_eq!(replayed.size_hint().lower(), 7);
        let first = replayed.frame().await.unwrap().unwrap();
        assert_eq!(first.into_data().unwrap(), "partial");
        let err = replayed.frame().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("client went away"));
    }
}
