//! # Stream Contracts
//!
//! The push-based producer/consumer contract the rest of the library is
//! built on.
//!
//! ## Model
//!
//! - **[`EventStream<T>`]** — ordered, potentially infinite, push-driven
//!   stream. A cheap cloneable handle; subscribing attaches a sink and
//!   returns a [`Subscription`].
//! - **[`Subscriber<T>`]** — sink with `on_event` / `on_complete` /
//!   `on_error` reactions, invoked strictly sequentially per
//!   subscription, in source order.
//! - **[`Subscription`]** — disposal handle. Disposing detaches the
//!   subscriber and releases held state; idempotent.
//! - **[`SinkHandle<T>`]** — the delivery gate every operator pushes
//!   through; enforces the at-most-one-terminal and
//!   nothing-after-terminal invariants.
//!
//! Cancellation is expressed solely through disposal. No operation in
//! this module blocks or sleeps.

mod error;
mod sink;
mod source;
mod subscription;

pub use error::StreamError;
pub use sink::SinkHandle;
pub use subscription::Subscription;

pub(crate) use subscription::SubscriptionLink;

use std::sync::Arc;

/// Sequential sink of a stream's events and terminal signal.
pub trait Subscriber<T>: Send {
    /// Called once per event, in source order.
    fn on_event(&mut self, event: T);

    /// Called at most once, after the final event.
    fn on_complete(&mut self);

    /// Called at most once, instead of completion.
    fn on_error(&mut self, error: StreamError);
}

/// A producer that can be attached to any number of independent sinks.
///
/// Implementations must deliver every subscription's events through the
/// given [`SinkHandle`] and return a [`Subscription`] that tears down
/// whatever the attachment created upstream. Detaching the sink itself
/// is the caller's job.
pub trait StreamSource<T>: Send + Sync {
    /// Attaches one sink to this source.
    fn subscribe_raw(&self, sink: SinkHandle<T>) -> Subscription;
}

/// Cloneable handle to a push-based stream.
pub struct EventStream<T> {
    source: Arc<dyn StreamSource<T>>,
}

impl<T> Clone for EventStream<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<T: Send + 'static> EventStream<T> {
    /// Wraps a custom source.
    pub fn from_source(source: impl StreamSource<T> + 'static) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    /// A stream that synchronously replays `items` to each subscriber,
    /// then completes. Each subscription walks its own fresh iterator.
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
    {
        Self::from_source(source::IterSource::new(items))
    }

    /// A stream that completes immediately.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_source(source::EmptySource)
    }

    /// A stream that fails immediately with `error`.
    #[must_use]
    pub fn fail(error: StreamError) -> Self {
        Self::from_source(source::FailSource::new(error))
    }

    /// Attaches a subscriber; the returned handle detaches it again.
    pub fn subscribe(&self, subscriber: impl Subscriber<T> + 'static) -> Subscription {
        let sink = SinkHandle::new(Box::new(subscriber));
        let upstream = self.source.subscribe_raw(sink.clone());
        Subscription::new(move || {
            sink.detach();
            upstream.dispose();
        })
    }

    /// Subscribes with an event callback only. Completion is ignored and
    /// errors are logged at debug level.
    pub fn subscribe_with(&self, on_event: impl FnMut(T) + Send + 'static) -> Subscription {
        self.subscribe(FnSubscriber::new(
            on_event,
            || {},
            |error| tracing::debug!(%error, "Unhandled stream error"),
        ))
    }

    /// Subscribes with callbacks for all three reactions.
    pub fn subscribe_all(
        &self,
        on_event: impl FnMut(T) + Send + 'static,
        on_complete: impl FnMut() + Send + 'static,
        on_error: impl FnMut(StreamError) + Send + 'static,
    ) -> Subscription {
        self.subscribe(FnSubscriber::new(on_event, on_complete, on_error))
    }

    /// Derives a stream that applies `transform` to each event.
    /// Terminal signals pass through unchanged.
    pub fn map<U: Send + 'static>(
        &self,
        transform: impl Fn(T) -> U + Send + Sync + 'static,
    ) -> EventStream<U> {
        EventStream::from_source(source::MapSource::new(self.clone(), Arc::new(transform)))
    }

    /// Crate-internal attach for operators that already hold a sink.
    pub(crate) fn attach(&self, sink: SinkHandle<T>) -> Subscription {
        self.source.subscribe_raw(sink)
    }
}

impl<T> std::fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

/// Closure-backed [`Subscriber`].
pub struct FnSubscriber<E, C, F> {
    on_event: E,
    on_complete: C,
    on_error: F,
}

impl<E, C, F> FnSubscriber<E, C, F> {
    /// Builds a subscriber from the three reaction callbacks.
    pub fn new(on_event: E, on_complete: C, on_error: F) -> Self {
        Self {
            on_event,
            on_complete,
            on_error,
        }
    }
}

impl<T, E, C, F> Subscriber<T> for FnSubscriber<E, C, F>
where
    E: FnMut(T) + Send,
    C: FnMut() + Send,
    F: FnMut(StreamError) + Send,
{
    fn on_event(&mut self, event: T) {
        (self.on_event)(event);
    }

    fn on_complete(&mut self) {
        (self.on_complete)();
    }

    fn on_error(&mut self, error: StreamError) {
        (self.on_error)(error);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Recorder;
    use super::*;

    #[test]
    fn test_from_iter_delivers_then_completes() {
        let stream = EventStream::from_iter(vec![1, 2, 3]);
        let (recorder, record) = Recorder::new();
        stream.subscribe(recorder);

        let record = record.lock();
        assert_eq!(record.events, vec![1, 2, 3]);
        assert!(record.completed);
        assert!(record.error.is_none());
    }

    #[test]
    fn test_from_iter_resubscribable() {
        let stream = EventStream::from_iter(vec![1, 2]);
        let (r1, rec1) = Recorder::new();
        let (r2, rec2) = Recorder::new();
        stream.subscribe(r1);
        stream.subscribe(r2);

        assert_eq!(rec1.lock().events, vec![1, 2]);
        assert_eq!(rec2.lock().events, vec![1, 2]);
    }

    #[test]
    fn test_empty_completes_immediately() {
        let stream = EventStream::<i32>::empty();
        let (recorder, record) = Recorder::new();
        stream.subscribe(recorder);

        let record = record.lock();
        assert!(record.events.is_empty());
        assert!(record.completed);
    }

    #[test]
    fn test_fail_errors_immediately() {
        let stream = EventStream::<i32>::fail(StreamError::source("down"));
        let (recorder, record) = Recorder::new();
        stream.subscribe(recorder);

        let record = record.lock();
        assert!(record.events.is_empty());
        assert!(!record.completed);
        assert_eq!(record.error, Some(StreamError::source("down")));
    }

    #[test]
    fn test_map_transforms_and_forwards_terminal() {
        let stream = EventStream::from_iter(vec![1, 2, 3]).map(|x| x * 10);
        let (recorder, record) = Recorder::new();
        stream.subscribe(recorder);

        let record = record.lock();
        assert_eq!(record.events, vec![10, 20, 30]);
        assert!(record.completed);
    }

    #[test]
    fn test_map_forwards_error() {
        let stream = EventStream::<i32>::fail(StreamError::source("down")).map(|x| x + 1);
        let (recorder, record) = Recorder::new();
        stream.subscribe(recorder);

        assert_eq!(record.lock().error, Some(StreamError::source("down")));
    }

    #[test]
    fn test_detach_during_delivery_stops_synchronous_source() {
        // Detaching the sink from inside a delivery must stop the
        // synchronous producer before the next event.
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink_slot: Arc<parking_lot::Mutex<Option<SinkHandle<i32>>>> =
            Arc::new(parking_lot::Mutex::new(None));

        let seen_in = Arc::clone(&seen);
        let slot_in = Arc::clone(&sink_slot);
        let sink = SinkHandle::new(Box::new(FnSubscriber::new(
            move |x: i32| {
                seen_in.lock().push(x);
                if x == 2 {
                    if let Some(sink) = slot_in.lock().as_ref() {
                        sink.detach();
                    }
                }
            },
            || {},
            |_| {},
        )));
        *sink_slot.lock() = Some(sink.clone());

        EventStream::from_iter(1..=100).attach(sink);
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_subscribe_with_ignores_terminal() {
        let stream = EventStream::from_iter(vec![7]);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        stream.subscribe_with(move |x| seen_in.lock().push(x));
        assert_eq!(*seen.lock(), vec![7]);
    }
}
