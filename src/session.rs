//! Rendering glue: recognizes a renderable event stream, sets the SSE
//! response headers, and hands the response over to the stream bridge.
//!
//! Dispatch is an explicit tagged variant: the hosting server wraps its
//! payload in [`Renderable`] and the session matches on it, rather than any
//! runtime type discovery. Header negotiation failures (headers already
//! committed) are reported to the caller and never retried.

use std::fmt;

use http::header::{HeaderMap, HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use http::StatusCode;
use thiserror::Error;
use tracing::debug;

use crate::bridge::{self, BridgeError, Completion};
use crate::sink::OutputSink;
use crate::source::EventSource;

/// Content type of an SSE response body.
pub const TEXT_EVENT_STREAM: &str = "text/event-stream;charset=UTF-8";

/// Error rendering a payload onto a response.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The response head was already committed; SSE headers can no longer
    /// be set.
    #[error("response headers already committed")]
    HeadersAlreadySent,
    /// The streaming session itself failed.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// A renderable stream of Server-Sent Events: wraps the producer that will
/// feed one response body.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use ssebridge::{periodic, EventFrame, ServerSentEvents};
///
/// let events = ServerSentEvents::new(periodic(Duration::from_millis(5), |i| {
///     if i < 5 {
///         Some(EventFrame::new().with_data(format!("event {i}")))
///     } else {
///         None
///     }
/// }));
/// ```
pub struct ServerSentEvents {
    source: Box<dyn EventSource>,
}

impl ServerSentEvents {
    /// Wrap an event source for rendering.
    pub fn new(source: impl EventSource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    pub(crate) fn source_mut(&mut self) -> &mut dyn EventSource {
        self.source.as_mut()
    }
}

impl fmt::Debug for ServerSentEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSentEvents").finish_non_exhaustive()
    }
}

/// A typed render payload. The session dispatches on the concrete variant.
#[derive(Debug)]
pub enum Renderable {
    ServerSentEvents(ServerSentEvents),
}

impl From<ServerSentEvents> for Renderable {
    fn from(events: ServerSentEvents) -> Self {
        Self::ServerSentEvents(events)
    }
}

/// The head of the HTTP response being rendered: status, headers, and
/// whether they have been handed to the transport yet.
///
/// This is the interface contract with the hosting server, which owns the
/// actual wire representation.
#[derive(Debug)]
pub struct ResponseHead {
    status: StatusCode,
    headers: HeaderMap,
    committed: bool,
}

impl Default for ResponseHead {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseHead {
    /// A fresh, uncommitted `200 OK` head.
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            committed: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Whether the head was already handed to the transport.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Mark the head as handed to the transport. Headers set afterwards
    /// never reach the client.
    pub fn commit(&mut self) {
        self.committed = true;
    }
}

/// Composition root for one streamed response: owns the response head and
/// the output sink, and renders one payload through the stream bridge.
///
/// # Example
/// ```no_run
/// use ssebridge::{
///     from_iter, BufferSink, EventFrame, Renderable, RenderableSession, ResponseHead,
///     ServerSentEvents,
/// };
///
/// # async fn render() -> Result<(), ssebridge::RenderError> {
/// let frames = vec![EventFrame::new().with_data("hello")];
/// let mut session = RenderableSession::new(ResponseHead::new(), BufferSink::new());
/// session
///     .render(Renderable::ServerSentEvents(ServerSentEvents::new(from_iter(frames))))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RenderableSession<S> {
    head: ResponseHead,
    sink: S,
}

impl<S: OutputSink> RenderableSession<S> {
    /// Pair a response head with its body sink.
    pub fn new(head: ResponseHead, sink: S) -> Self {
        Self { head, sink }
    }

    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    /// Render a payload onto this response.
    ///
    /// For an SSE payload: fails fast if the headers were already sent,
    /// otherwise sets `Content-Type: text/event-stream;charset=UTF-8` (and
    /// `Cache-Control: no-cache`), commits the head, and drives the stream
    /// bridge to a terminal state.
    pub async fn render(&mut self, renderable: Renderable) -> Result<Completion, RenderError> {
        match renderable {
            Renderable::ServerSentEvents(mut events) => {
                if self.head.is_committed() {
                    return Err(RenderError::HeadersAlreadySent);
                }
                self.head
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_EVENT_STREAM));
                self.head
                    .headers_mut()
                    .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
                self.head.commit();
                debug!("rendering server-sent events");

                Ok(bridge::run(events.source_mut(), &mut self.sink).await?)
            }
        }
    }

    /// Hand the head and sink back to the hosting server.
    pub fn into_parts(self) -> (ResponseHead, S) {
        (self.head, self.sink)
    }
}
