//! The event producer contract: a cold, single-subscriber, demand-aware
//! sequence of [`EventFrame`] values.
//!
//! The contract is a minimal reactive-pull protocol. A source does nothing
//! until [`EventSource::subscribe`] is called; the resulting
//! [`Subscription`] is the consumer half (request demand, receive signals,
//! cancel), while the production work runs in a spawned task that talks to
//! the subscription only through channels. Producers therefore may tick on
//! timers or I/O callbacks without ever racing the consumer: every signal
//! funnels through one bounded channel.
//!
//! Built-in sources cover the common producers: [`from_stream`] adapts any
//! fallible [`Stream`] of frames, [`from_iter`] a finite in-memory
//! sequence, and [`periodic`] a timer-driven producer.

use std::fmt;

use futures::stream::{self, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::frame::EventFrame;

/// Opaque failure reported by a producer mid-stream.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SourceError(Box<dyn std::error::Error + Send + Sync>);

impl SourceError {
    /// Wrap an underlying error.
    pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self(err.into())
    }

    /// Build an error from a plain message.
    pub fn msg(msg: impl fmt::Display) -> Self {
        Self(msg.to_string().into())
    }
}

/// Error subscribing to an [`EventSource`].
///
/// Sources are single-subscriber: driving one twice, or reviving one that
/// already reached a terminal state, fails fast here rather than corrupting
/// an in-flight stream.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("event source already has an active subscription")]
    AlreadySubscribed,
    #[error("event source already reached a terminal state")]
    Terminated,
}

/// One signal delivered over a subscription. `Complete` and `Error` are
/// terminal: nothing follows them.
#[derive(Debug)]
pub enum SourceSignal {
    Frame(EventFrame),
    Complete,
    Error(SourceError),
}

/// A cold, cancellable, demand-aware producer of [`EventFrame`] values.
///
/// Implementors usually hold their production input in an `Option` and
/// hand it to [`Subscription::spawn`] on first subscribe:
///
/// ```no_run
/// use ssebridge::{EventFrame, EventSource, SubscribeError, Subscription};
///
/// struct Single(Option<EventFrame>);
///
/// impl EventSource for Single {
///     fn subscribe(&mut self) -> Result<Subscription, SubscribeError> {
///         let frame = self.0.take().ok_or(SubscribeError::AlreadySubscribed)?;
///         Ok(Subscription::spawn(move |mut producer| async move {
///             if producer.emit(frame).await {
///                 producer.complete().await;
///             }
///         }))
///     }
/// }
/// ```
pub trait EventSource: Send {
    /// Begin production. At most one subscription may ever be active.
    fn subscribe(&mut self) -> Result<Subscription, SubscribeError>;
}

/// The consumer half of an active subscription.
///
/// Owned by exactly one stream session. Dropping it aborts the production
/// task, so an abandoned subscription can never leave a timer running.
#[derive(Debug)]
pub struct Subscription {
    signals: mpsc::Receiver<SourceSignal>,
    demand: mpsc::UnboundedSender<u64>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Spawn a production task and wire it to a new subscription.
    ///
    /// The task receives the [`Producer`] half and must honor the demand
    /// protocol: wait for credit, emit, and finish with a terminal signal.
    pub fn spawn<F, Fut>(produce: F) -> Self
    where
        F: FnOnce(Producer) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        // One in-flight signal: the producer cannot run ahead of the
        // consumer even if it ignores demand.
        let (signal_tx, signal_rx) = mpsc::channel(1);
        let (demand_tx, demand_rx) = mpsc::unbounded_channel();

        let producer = Producer {
            signals: signal_tx,
            demand: demand_rx,
            credit: 0,
        };

        Self {
            signals: signal_rx,
            demand: demand_tx,
            task: Some(tokio::spawn(produce(producer))),
        }
    }

    /// Grant the producer `n` more items of demand.
    pub fn request(&self, n: u64) {
        trace!(n, "requesting upstream demand");
        // A dropped producer is reported through `next`, not here.
        let _ = self.demand.send(n);
    }

    /// Receive the next signal, suspending until the producer delivers one.
    ///
    /// A producer that goes away without sending a terminal signal is
    /// reported as an error rather than silently completing.
    pub async fn next(&mut self) -> SourceSignal {
        match self.signals.recv().await {
            Some(signal) => signal,
            None => SourceSignal::Error(SourceError::msg(
                "event source dropped without a terminal signal",
            )),
        }
    }

    /// Tear the producer down: abort its task and stop accepting signals.
    ///
    /// Idempotent. Safe to call after a terminal signal, where it is a
    /// no-op beyond reaping the finished task.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.signals.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// The producer half of a subscription, handed to the production task by
/// [`Subscription::spawn`].
#[derive(Debug)]
pub struct Producer {
    signals: mpsc::Sender<SourceSignal>,
    demand: mpsc::UnboundedReceiver<u64>,
    credit: u64,
}

impl Producer {
    /// Suspend until at least one item of demand is available.
    ///
    /// Returns `false` once the subscription has been cancelled.
    pub async fn ready(&mut self) -> bool {
        loop {
            while let Ok(n) = self.demand.try_recv() {
                self.credit = self.credit.saturating_add(n);
            }
            if self.credit > 0 {
                return true;
            }
            match self.demand.recv().await {
                Some(n) => self.credit = self.credit.saturating_add(n),
                None => return false,
            }
        }
    }

    /// Receive one raw demand batch as requested by the consumer.
    ///
    /// Lower-level than [`ready`](Self::ready): exposes the exact request
    /// sizes, which demand-sensitive producers (and tests) care about. The
    /// batch is also added to the credit balance.
    pub async fn wait_demand(&mut self) -> Option<u64> {
        let n = self.demand.recv().await?;
        self.credit = self.credit.saturating_add(n);
        Some(n)
    }

    /// Demand credit currently available.
    pub fn credit(&self) -> u64 {
        self.credit
    }

    /// Deliver one frame, consuming one item of credit (waiting for demand
    /// first if none is available).
    ///
    /// Returns `false` once the subscription has been cancelled; the
    /// producer should wind down without a terminal signal in that case.
    pub async fn emit(&mut self, frame: EventFrame) -> bool {
        if self.credit == 0 && !self.ready().await {
            return false;
        }
        self.credit -= 1;
        self.signals.send(SourceSignal::Frame(frame)).await.is_ok()
    }

    /// Signal normal completion. Terminal.
    pub async fn complete(self) {
        let _ = self.signals.send(SourceSignal::Complete).await;
    }

    /// Signal producer failure. Terminal.
    pub async fn fail(self, error: SourceError) {
        let _ = self.signals.send(SourceSignal::Error(error)).await;
    }
}

/// Adapt any fallible [`Stream`] of frames into an [`EventSource`].
///
/// The stream is polled only against demand, so a slow consumer
/// backpressures straight into the stream.
pub fn from_stream<St>(stream: St) -> StreamSource<St>
where
    St: Stream<Item = Result<EventFrame, SourceError>> + Send + 'static,
{
    StreamSource {
        stream: Some(stream),
    }
}

/// Build a finite source over an in-memory sequence of frames.
pub fn from_iter<I>(
    frames: I,
) -> StreamSource<impl Stream<Item = Result<EventFrame, SourceError>> + Send + 'static>
where
    I: IntoIterator<Item = EventFrame>,
    I::IntoIter: Send + 'static,
{
    from_stream(stream::iter(frames.into_iter().map(Ok)))
}

/// [`EventSource`] over a [`Stream`], created by [`from_stream`].
#[derive(Debug)]
pub struct StreamSource<St> {
    stream: Option<St>,
}

impl<St> EventSource for StreamSource<St>
where
    St: Stream<Item = Result<EventFrame, SourceError>> + Send + 'static,
{
    fn subscribe(&mut self) -> Result<Subscription, SubscribeError> {
        let stream = self.stream.take().ok_or(SubscribeError::AlreadySubscribed)?;
        Ok(Subscription::spawn(move |mut producer| async move {
            futures::pin_mut!(stream);
            loop {
                if !producer.ready().await {
                    return;
                }
                match stream.next().await {
                    Some(Ok(frame)) => {
                        if !producer.emit(frame).await {
                            return;
                        }
                    }
                    Some(Err(error)) => {
                        producer.fail(error).await;
                        return;
                    }
                    None => {
                        producer.complete().await;
                        return;
                    }
                }
            }
        }))
    }
}

/// Build a timer-driven source: every `period`, emit `produce(tick)` for
/// tick 0, 1, 2, ... until it returns `None`, which completes the stream.
///
/// Demand-aware: the timer only runs while the consumer has requested more
/// events, and cancellation stops it immediately.
pub fn periodic<F>(period: std::time::Duration, produce: F) -> PeriodicSource<F>
where
    F: FnMut(u64) -> Option<EventFrame> + Send + 'static,
{
    PeriodicSource {
        period,
        produce: Some(produce),
    }
}

/// Timer-driven [`EventSource`], created by [`periodic`].
#[derive(Debug)]
pub struct PeriodicSource<F> {
    period: std::time::Duration,
    produce: Option<F>,
}

impl<F> EventSource for PeriodicSource<F>
where
    F: FnMut(u64) -> Option<EventFrame> + Send + 'static,
{
    fn subscribe(&mut self) -> Result<Subscription, SubscribeError> {
        let period = self.period;
        let mut produce = self
            .produce
            .take()
            .ok_or(SubscribeError::AlreadySubscribed)?;
        Ok(Subscription::spawn(move |mut producer| async move {
            let mut tick = 0u64;
            loop {
                if !producer.ready().await {
                    return;
                }
                tokio::time::sleep(period).await;
                match produce(tick) {
                    Some(frame) => {
                        if !producer.emit(frame).await {
                            return;
                        }
                        tick += 1;
                    }
                    None => {
                        producer.complete().await;
                        return;
                    }
                }
            }
        }))
    }
}
