//! # ssebridge - Server-Sent Events streaming library
//!
//! A small, pragmatic Rust library for rendering a push-based sequence of
//! discrete events onto a long-lived HTTP response body using the SSE wire
//! protocol, with correct backpressure, framing, and lifecycle handling.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Demand-aware producer contract: cold, cancellable, single-subscriber
//! - Strict wire framing: ordered, atomic, one in-flight write
//! - Disconnect-safe: a gone client always tears the producer down
//! - Transport-agnostic output via the `OutputSink` trait
//!
//! ## Architecture
//!
//! The library is layered leaves-first:
//!
//! - **`EventFrame`**: one SSE event and its serialization to wire bytes
//! - **`EventSource`**: the producer contract (subscribe, request demand,
//!   cancel) plus built-in stream/iterator/timer sources
//! - **`OutputSink`**: the transport contract (demand signal, suspending
//!   writes, disconnect notification)
//! - **`bridge`**: the engine driving one source onto one sink until a
//!   terminal state
//! - **`RenderableSession`**: composition root pairing a response head with
//!   a sink and dispatching typed render payloads
//!
//! ## Example
//! ```
//! use ssebridge::{from_iter, BufferSink, EventFrame, RenderableSession, ResponseHead};
//! use ssebridge::{Renderable, ServerSentEvents};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let frames = (0..5).map(|i| {
//!         Ok::<_, ssebridge::FrameBuildError>(
//!             EventFrame::new()
//!                 .with_event("counter")?
//!                 .with_data(format!("event {i}"))
//!                 .with_id(i.to_string())?,
//!         )
//!     });
//!     let frames = frames.collect::<Result<Vec<_>, _>>()?;
//!
//!     let mut session = RenderableSession::new(ResponseHead::new(), BufferSink::new());
//!     session
//!         .render(Renderable::ServerSentEvents(ServerSentEvents::new(
//!             from_iter(frames),
//!         )))
//!         .await?;
//!
//!     let (head, sink) = session.into_parts();
//!     assert_eq!(
//!         head.headers().get(http::header::CONTENT_TYPE).unwrap(),
//!         "text/event-stream;charset=UTF-8"
//!     );
//!     assert!(sink.as_str().starts_with("event: counter\ndata: event 0\nid: 0\n\n"));
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod frame;
pub mod session;
pub mod sink;
pub mod source;

// Re-exports for convenience
pub use bridge::{BridgeError, Completion};
pub use frame::{EventFrame, FrameBuildError};
pub use session::{
    Renderable, RenderableSession, RenderError, ResponseHead, ServerSentEvents, TEXT_EVENT_STREAM,
};
pub use sink::{BufferSink, ChannelSink, OutputSink, SinkError};
pub use source::{
    from_iter, from_stream, periodic, EventSource, PeriodicSource, Producer, SourceError,
    SourceSignal, StreamSource, SubscribeError, Subscription,
};
