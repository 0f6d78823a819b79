//! The stream bridge: drives one [`EventSource`] onto one [`OutputSink`].
//!
//! This is the single synchronization point between the producer (which may
//! tick on its own timers or I/O callbacks) and the transport. The bridge
//! runs one sequential control loop; producers only ever touch it through
//! the subscription's channels, so frame writes can never interleave and
//! frames can never be reordered.
//!
//! Demand flows through 1:1: every batch of demand the sink signals is
//! requested upstream unchanged, and at most one frame is in flight at any
//! moment. Terminal transitions:
//!
//! - producer completes → sink finished cleanly → [`Completion::Completed`]
//! - client disconnects → subscription cancelled, no further writes →
//!   [`Completion::Cancelled`]
//! - producer fails → sink aborted → [`BridgeError::Producer`]

use thiserror::Error;
use tracing::{debug, trace};

use crate::sink::{OutputSink, SinkError};
use crate::source::{EventSource, SourceError, SourceSignal, SubscribeError, Subscription};

/// How a streaming session ended, short of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The producer completed and the sink was finished cleanly.
    Completed,
    /// The client disconnected first; the subscription was cancelled.
    Cancelled,
}

/// Failure of a streaming session, surfaced to the owning response.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The producer signalled an error mid-stream. Whatever was already
    /// written stays written; the sink was closed abnormally.
    #[error("event source failed mid-stream: {0}")]
    Producer(#[source] SourceError),
    /// The transport failed for a reason other than a plain disconnect.
    #[error("output sink failed: {0}")]
    Transport(#[source] SinkError),
    /// Subscribing to the source failed (double subscription or a reused
    /// terminated source).
    #[error(transparent)]
    Subscribe(#[from] SubscribeError),
}

/// Drive `source` to a terminal state over `sink`.
///
/// Subscribes to the source, mirrors the sink's demand upstream, writes
/// each frame's serialized bytes in emission order with a single write in
/// flight, and releases the subscription on every exit path.
pub async fn run<S>(
    source: &mut dyn EventSource,
    sink: &mut S,
) -> Result<Completion, BridgeError>
where
    S: OutputSink + ?Sized,
{
    let subscription = source.subscribe()?;
    debug!("stream session subscribed");
    StreamSession {
        subscription,
        sink,
        pending: 0,
        written: 0,
    }
    .drive()
    .await
}

/// Runtime state of one streaming session: exactly one per response,
/// exclusive owner of the subscription and the sink for its lifetime.
struct StreamSession<'a, S: OutputSink + ?Sized> {
    subscription: Subscription,
    sink: &'a mut S,
    /// Demand requested upstream but not yet delivered.
    pending: u64,
    written: u64,
}

enum Step {
    Continue,
    Done(Completion),
}

impl<S: OutputSink + ?Sized> StreamSession<'_, S> {
    async fn drive(mut self) -> Result<Completion, BridgeError> {
        loop {
            let step = if self.pending == 0 {
                // Out of granted demand: wait for the sink to open up, but
                // stay responsive to a terminal signal from the producer.
                tokio::select! {
                    res = self.sink.demand() => match res {
                        Ok(n) => {
                            let n = n.max(1);
                            self.subscription.request(n);
                            self.pending = n;
                            Step::Continue
                        }
                        Err(SinkError::Closed) => self.cancelled(),
                        Err(error) => return self.transport_failed(error),
                    },
                    signal = self.subscription.next() => self.on_signal(signal).await?,
                }
            } else {
                // Demand outstanding: wait for the next signal, bailing out
                // the moment the client goes away. Biased so a disconnect
                // is seen before a frame that raced it.
                tokio::select! {
                    biased;
                    _ = self.sink.closed() => self.cancelled(),
                    signal = self.subscription.next() => self.on_signal(signal).await?,
                }
            };

            if let Step::Done(completion) = step {
                return Ok(completion);
            }
        }
    }

    async fn on_signal(&mut self, signal: SourceSignal) -> Result<Step, BridgeError> {
        match signal {
            SourceSignal::Frame(frame) => {
                let bytes = frame.serialize();
                trace!(len = bytes.len(), "writing frame");
                match self.sink.write(bytes).await {
                    Ok(()) => {
                        self.pending = self.pending.saturating_sub(1);
                        self.written += 1;
                        Ok(Step::Continue)
                    }
                    Err(SinkError::Closed) => Ok(self.cancelled()),
                    Err(error) => self.transport_failed(error).map(Step::Done),
                }
            }
            SourceSignal::Complete => {
                debug!(frames = self.written, "event source completed");
                match self.sink.finish().await {
                    Ok(()) => Ok(Step::Done(Completion::Completed)),
                    // The client vanished between the last frame and the
                    // end of stream.
                    Err(SinkError::Closed) => Ok(Step::Done(Completion::Cancelled)),
                    Err(error) => self.transport_failed(error).map(Step::Done),
                }
            }
            SourceSignal::Error(error) => {
                debug!(frames = self.written, %error, "event source failed");
                self.sink.abort().await;
                Err(BridgeError::Producer(error))
            }
        }
    }

    /// Client disconnect: release the producer in the same step that makes
    /// the session terminal, so nothing produced afterwards can be written.
    fn cancelled(&mut self) -> Step {
        self.subscription.cancel();
        debug!(frames = self.written, "client disconnected, session cancelled");
        Step::Done(Completion::Cancelled)
    }

    fn transport_failed(&mut self, error: SinkError) -> Result<Completion, BridgeError> {
        self.subscription.cancel();
        Err(BridgeError::Transport(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::EventFrame;
    use crate::sink::{BufferSink, ChannelSink};
    use crate::source::{from_iter, from_stream, periodic};
    use futures::stream;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn counter_frame(n: u64) -> EventFrame {
        EventFrame::new()
            .with_event("counter")
            .unwrap()
            .with_data(format!("event {n}"))
            .with_id(n.to_string())
            .unwrap()
    }

    #[tokio::test]
    async fn test_finite_source_writes_all_frames_in_order() {
        let mut source = from_iter((0..5).map(counter_frame));
        let mut sink = BufferSink::new();

        let completion = run(&mut source, &mut sink).await.unwrap();

        assert_eq!(completion, Completion::Completed);
        assert_eq!(sink.frames(), 5);
        assert!(sink.is_finished());
        let expected: String = (0..5)
            .map(|i| format!("event: counter\ndata: event {i}\nid: {i}\n\n"))
            .collect();
        assert_eq!(sink.as_str(), expected);
    }

    #[tokio::test]
    async fn test_demand_batches_larger_than_one() {
        let mut source = from_iter((0..7).map(counter_frame));
        let mut sink = BufferSink::with_demand_batch(4);

        let completion = run(&mut source, &mut sink).await.unwrap();

        assert_eq!(completion, Completion::Completed);
        assert_eq!(sink.frames(), 7);
    }

    /// Demand-recording source: logs every demand batch the bridge
    /// requests upstream and serves frames strictly against credit.
    struct RecordingSource {
        frames: Option<Vec<EventFrame>>,
        requests: Arc<Mutex<Vec<u64>>>,
    }

    impl EventSource for RecordingSource {
        fn subscribe(&mut self) -> Result<Subscription, SubscribeError> {
            let frames = self
                .frames
                .take()
                .ok_or(SubscribeError::AlreadySubscribed)?;
            let requests = self.requests.clone();
            Ok(Subscription::spawn(move |mut producer| async move {
                let mut frames = frames.into_iter();
                loop {
                    let Some(n) = producer.wait_demand().await else {
                        return;
                    };
                    requests.lock().unwrap().push(n);
                    while producer.credit() > 0 {
                        match frames.next() {
                            Some(frame) => {
                                if !producer.emit(frame).await {
                                    return;
                                }
                            }
                            None => {
                                producer.complete().await;
                                return;
                            }
                        }
                    }
                }
            }))
        }
    }

    #[tokio::test]
    async fn test_no_over_requesting_with_unit_demand() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let mut source = RecordingSource {
            frames: Some((0..5).map(counter_frame).collect()),
            requests: requests.clone(),
        };
        // Strictest schedule: the sink admits one frame at a time.
        let mut sink = BufferSink::new();

        run(&mut source, &mut sink).await.unwrap();

        let requests = requests.lock().unwrap();
        // One request per granted batch, each exactly the sink's demand,
        // and at most one beyond the frame count (the one that discovers
        // completion).
        assert!(requests.iter().all(|&n| n == 1), "requests: {requests:?}");
        assert_eq!(requests.len(), 6);
        assert_eq!(sink.frames(), 5);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_subscription() {
        let mut source = from_iter((0..100).map(counter_frame));
        let (mut sink, mut rx) = ChannelSink::channel(1);

        let reader = tokio::spawn(async move {
            // Accept three frames, then disconnect.
            let mut seen = Vec::new();
            for _ in 0..3 {
                if let Some(bytes) = rx.recv().await {
                    seen.push(bytes);
                }
            }
            drop(rx);
            seen
        });

        let completion = run(&mut source, &mut sink).await.unwrap();
        assert_eq!(completion, Completion::Cancelled);

        let seen = reader.await.unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], counter_frame(0).serialize());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_tears_down_periodic_producer() {
        struct DropFlag(Arc<AtomicBool>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let guard = DropFlag(dropped.clone());
        let mut source = periodic(Duration::from_millis(5), move |tick| {
            let _guard = &guard;
            Some(counter_frame(tick))
        });

        let (mut sink, mut rx) = ChannelSink::channel(1);
        let reader = tokio::spawn(async move {
            let first = rx.recv().await;
            drop(rx);
            first
        });

        let completion = run(&mut source, &mut sink).await.unwrap();
        assert_eq!(completion, Completion::Cancelled);
        assert!(reader.await.unwrap().is_some());

        // A disconnected client must not leave the timer running.
        for _ in 0..20 {
            tokio::task::yield_now().await;
            if dropped.load(Ordering::SeqCst) {
                return;
            }
        }
        panic!("periodic producer survived client disconnect");
    }

    #[tokio::test]
    async fn test_producer_failure_aborts_sink() {
        let mut source = from_stream(stream::iter(vec![
            Ok(counter_frame(0)),
            Ok(counter_frame(1)),
            Err(crate::source::SourceError::msg("upstream feed broke")),
        ]));
        let mut sink = BufferSink::new();

        let err = run(&mut source, &mut sink).await.unwrap_err();

        assert!(matches!(err, BridgeError::Producer(_)));
        assert_eq!(sink.frames(), 2);
        assert!(sink.is_aborted());
        assert!(!sink.is_finished());
    }

    /// Like `RecordingSource`, but the producer fails once its frames run
    /// out instead of completing.
    struct FailingSource {
        frames: Option<Vec<EventFrame>>,
        requests: Arc<Mutex<Vec<u64>>>,
    }

    impl EventSource for FailingSource {
        fn subscribe(&mut self) -> Result<Subscription, SubscribeError> {
            let frames = self
                .frames
                .take()
                .ok_or(SubscribeError::AlreadySubscribed)?;
            let requests = self.requests.clone();
            Ok(Subscription::spawn(move |mut producer| async move {
                let mut frames = frames.into_iter();
                loop {
                    let Some(n) = producer.wait_demand().await else {
                        return;
                    };
                    requests.lock().unwrap().push(n);
                    while producer.credit() > 0 {
                        match frames.next() {
                            Some(frame) => {
                                if !producer.emit(frame).await {
                                    return;
                                }
                            }
                            None => {
                                producer.fail(SourceError::msg("feed broke")).await;
                                return;
                            }
                        }
                    }
                }
            }))
        }
    }

    #[tokio::test]
    async fn test_no_requests_after_producer_failure() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let mut source = FailingSource {
            frames: Some((0..2).map(counter_frame).collect()),
            requests: requests.clone(),
        };
        let mut sink = BufferSink::new();

        let err = run(&mut source, &mut sink).await.unwrap_err();
        assert!(matches!(err, BridgeError::Producer(_)));
        assert_eq!(sink.frames(), 2);
        assert!(sink.is_aborted());

        // Two requests delivered frames, the third carried the failure, and
        // the session must not have issued anything after the terminal
        // signal. A few scheduler turns let any stray request surface.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let requests = requests.lock().unwrap();
        assert_eq!(*requests, vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn test_double_run_fails_fast() {
        let mut source = from_iter((0..2).map(counter_frame));
        let mut sink = BufferSink::new();
        run(&mut source, &mut sink).await.unwrap();

        let mut sink = BufferSink::new();
        let err = run(&mut source, &mut sink).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Subscribe(SubscribeError::AlreadySubscribed)
        ));
        // The failed attempt must not have touched the sink.
        assert_eq!(sink.frames(), 0);
        assert!(!sink.is_finished());
    }

    #[tokio::test]
    async fn test_empty_source_finishes_cleanly() {
        let mut source = from_iter(std::iter::empty());
        let mut sink = BufferSink::new();

        let completion = run(&mut source, &mut sink).await.unwrap();

        assert_eq!(completion, Completion::Completed);
        assert_eq!(sink.frames(), 0);
        assert!(sink.is_finished());
        assert_eq!(sink.as_str(), "");
    }
}
