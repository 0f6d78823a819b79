//! The output side of a streaming session: a byte sink with an explicit
//! demand signal and a disconnect notification.
//!
//! The HTTP server itself is out of scope; it plugs in behind this trait.
//! [`ChannelSink`] is the adapter a real server uses (the receiver half
//! becomes the response body), [`BufferSink`] an in-memory collector for
//! tests and demos.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::mpsc;

/// Error writing to an output sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The client disconnected. A normal termination path, not a failure.
    #[error("client disconnected")]
    Closed,
    /// The transport itself failed.
    #[error("transport error: {0}")]
    Transport(Box<dyn std::error::Error + Send + Sync>),
}

/// A backpressure-sensitive byte sink for one HTTP response body.
///
/// Exclusively owned by a single stream session for the response's
/// lifetime. All methods may suspend; none may be called concurrently
/// with another (the bridge serializes every interaction).
#[async_trait]
pub trait OutputSink: Send {
    /// Suspend until the transport can absorb at least one more frame;
    /// resolve with how many it will currently accept.
    ///
    /// Resolves with [`SinkError::Closed`] once the client is gone.
    async fn demand(&mut self) -> Result<u64, SinkError>;

    /// Write one serialized frame, suspending until the transport accepts
    /// it.
    async fn write(&mut self, bytes: Bytes) -> Result<(), SinkError>;

    /// End the stream cleanly after producer completion.
    async fn finish(&mut self) -> Result<(), SinkError>;

    /// Close the stream abnormally after producer failure. Best effort:
    /// bytes already accepted cannot be retracted.
    async fn abort(&mut self);

    /// Resolve when the client disconnects. Used by the bridge to react to
    /// a disconnect while it is waiting on a slow producer.
    async fn closed(&mut self);
}

/// Sink adapter over a bounded [`mpsc`] channel of serialized frames.
///
/// Demand is the channel's free capacity, disconnect is the receiver being
/// dropped. A server wraps the receiver into its streaming response body:
///
/// ```no_run
/// use ssebridge::ChannelSink;
///
/// let (sink, mut body) = ChannelSink::channel(8);
/// // hand `sink` to the renderable session, spawn a task forwarding
/// // `body.recv()` chunks into the HTTP response
/// ```
#[derive(Debug)]
pub struct ChannelSink {
    tx: Option<mpsc::Sender<Bytes>>,
}

impl ChannelSink {
    /// Create a sink and the receiver that yields its serialized frames.
    ///
    /// `capacity` bounds how many frames may be buffered towards the
    /// transport; it is also the upper bound of the demand signal.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }
}

#[async_trait]
impl OutputSink for ChannelSink {
    async fn demand(&mut self) -> Result<u64, SinkError> {
        let tx = self.tx.as_ref().ok_or(SinkError::Closed)?;
        // Wait for one free slot, then report everything currently free.
        match tx.reserve().await {
            Ok(permit) => drop(permit),
            Err(_) => return Err(SinkError::Closed),
        }
        Ok(tx.capacity() as u64)
    }

    async fn write(&mut self, bytes: Bytes) -> Result<(), SinkError> {
        let tx = self.tx.as_ref().ok_or(SinkError::Closed)?;
        tx.send(bytes).await.map_err(|_| SinkError::Closed)
    }

    async fn finish(&mut self) -> Result<(), SinkError> {
        // Dropping the sender ends the receiver's stream, which ends the
        // response body.
        self.tx.take().ok_or(SinkError::Closed)?;
        Ok(())
    }

    async fn abort(&mut self) {
        self.tx.take();
    }

    async fn closed(&mut self) {
        match &self.tx {
            Some(tx) => tx.closed().await,
            None => {}
        }
    }
}

/// In-memory sink collecting everything written to it.
///
/// Demand is granted in fixed batches (default one frame at a time, the
/// strictest schedule a transport can impose) and never runs out, so a
/// finite stream always drains fully.
#[derive(Debug)]
pub struct BufferSink {
    buf: BytesMut,
    demand_batch: u64,
    frames: usize,
    finished: bool,
    aborted: bool,
}

impl Default for BufferSink {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferSink {
    /// Create a sink granting demand one frame at a time.
    pub fn new() -> Self {
        Self::with_demand_batch(1)
    }

    /// Create a sink granting demand `batch` frames at a time.
    pub fn with_demand_batch(batch: u64) -> Self {
        Self {
            buf: BytesMut::new(),
            demand_batch: batch.max(1),
            frames: 0,
            finished: false,
            aborted: false,
        }
    }

    /// Everything written so far.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Everything written so far, as UTF-8.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.buf).unwrap_or("<non-utf8>")
    }

    /// Number of frames written.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Whether the stream was ended cleanly.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether the stream was closed abnormally.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }
}

#[async_trait]
impl OutputSink for BufferSink {
    async fn demand(&mut self) -> Result<u64, SinkError> {
        Ok(self.demand_batch)
    }

    async fn write(&mut self, bytes: Bytes) -> Result<(), SinkError> {
        self.buf.extend_from_slice(&bytes);
        self.frames += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), SinkError> {
        self.finished = true;
        Ok(())
    }

    async fn abort(&mut self) {
        self.aborted = true;
    }

    async fn closed(&mut self) {
        // A buffer never disconnects.
        std::future::pending::<()>().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_demand_tracks_capacity() {
        let (mut sink, mut rx) = ChannelSink::channel(2);
        assert_eq!(sink.demand().await.unwrap(), 2);

        sink.write(Bytes::from_static(b"a")).await.unwrap();
        assert_eq!(sink.demand().await.unwrap(), 1);

        assert_eq!(rx.recv().await.unwrap(), "a");
        assert_eq!(sink.demand().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_channel_sink_detects_receiver_drop() {
        let (mut sink, rx) = ChannelSink::channel(1);
        drop(rx);

        assert!(matches!(sink.demand().await, Err(SinkError::Closed)));
        assert!(matches!(
            sink.write(Bytes::from_static(b"a")).await,
            Err(SinkError::Closed)
        ));
        // closed() must resolve promptly.
        sink.closed().await;
    }

    #[tokio::test]
    async fn test_channel_sink_finish_ends_body() {
        let (mut sink, mut rx) = ChannelSink::channel(1);
        sink.write(Bytes::from_static(b"a")).await.unwrap();
        sink.finish().await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), "a");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_buffer_sink_collects() {
        let mut sink = BufferSink::new();
        assert_eq!(sink.demand().await.unwrap(), 1);

        sink.write(Bytes::from_static(b"data: a\n\n")).await.unwrap();
        sink.write(Bytes::from_static(b"data: b\n\n")).await.unwrap();
        sink.finish().await.unwrap();

        assert_eq!(sink.as_str(), "data: a\n\ndata: b\n\n");
        assert_eq!(sink.frames(), 2);
        assert!(sink.is_finished());
        assert!(!sink.is_aborted());
    }
}
