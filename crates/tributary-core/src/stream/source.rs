//! Built-in sources and the per-event transform adapter.

use std::sync::Arc;

use super::error::StreamError;
use super::sink::SinkHandle;
use super::subscription::Subscription;
use super::{EventStream, StreamSource, Subscriber};

/// Synchronous source over a cloneable collection of items.
///
/// Every subscription walks its own fresh iterator, so the stream can be
/// subscribed any number of times. Emission checks the sink between
/// items: a disposal issued mid-iteration stops the walk.
pub(crate) struct IterSource<I> {
    items: I,
}

impl<I> IterSource<I> {
    pub(crate) fn new(items: I) -> Self {
        Self { items }
    }
}

impl<I, T> StreamSource<T> for IterSource<I>
where
    I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    fn subscribe_raw(&self, sink: SinkHandle<T>) -> Subscription {
        for item in self.items.clone() {
            if !sink.is_live() {
                return Subscription::empty();
            }
            sink.event(item);
        }
        sink.complete();
        Subscription::empty()
    }
}

/// Source that completes immediately.
pub(crate) struct EmptySource;

impl<T: Send + 'static> StreamSource<T> for EmptySource {
    fn subscribe_raw(&self, sink: SinkHandle<T>) -> Subscription {
        sink.complete();
        Subscription::empty()
    }
}

/// Source that fails immediately with a fixed error.
pub(crate) struct FailSource {
    error: StreamError,
}

impl FailSource {
    pub(crate) fn new(error: StreamError) -> Self {
        Self { error }
    }
}

impl<T: Send + 'static> StreamSource<T> for FailSource {
    fn subscribe_raw(&self, sink: SinkHandle<T>) -> Subscription {
        sink.error(self.error.clone());
        Subscription::empty()
    }
}

/// Per-event transform over an upstream stream.
pub(crate) struct MapSource<T, U> {
    upstream: EventStream<T>,
    transform: Arc<dyn Fn(T) -> U + Send + Sync>,
}

impl<T, U> MapSource<T, U> {
    pub(crate) fn new(
        upstream: EventStream<T>,
        transform: Arc<dyn Fn(T) -> U + Send + Sync>,
    ) -> Self {
        Self {
            upstream,
            transform,
        }
    }
}

struct MapSubscriber<T, U> {
    transform: Arc<dyn Fn(T) -> U + Send + Sync>,
    down: SinkHandle<U>,
}

impl<T: Send, U: Send> Subscriber<T> for MapSubscriber<T, U> {
    fn on_event(&mut self, event: T) {
        let mapped = (self.transform)(event);
        self.down.event(mapped);
    }

    fn on_complete(&mut self) {
        self.down.complete();
    }

    fn on_error(&mut self, error: StreamError) {
        self.down.error(error);
    }
}

impl<T, U> StreamSource<U> for MapSource<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    fn subscribe_raw(&self, sink: SinkHandle<U>) -> Subscription {
        self.upstream.subscribe(MapSubscriber {
            transform: Arc::clone(&self.transform),
            down: sink,
        })
    }
}
