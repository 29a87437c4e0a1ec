//! # Broadcast Channel
//!
//! Multicast fan-out: one upstream source, many independent subscribers,
//! each receiving every event in source order exactly once.
//!
//! ## Design
//!
//! - Per-subscriber registry entries with an id and an active flag;
//!   unsubscribing deactivates the entry, pruning happens lazily on the
//!   next push.
//! - Delivery never holds the registry lock: a snapshot of the active
//!   sinks is taken first, then events are pushed outside the lock. A
//!   subscriber disposing itself (or another) during a delivery can
//!   therefore never deadlock against the hub.
//! - The first terminal signal latches the hub closed; subscribers that
//!   attach afterwards receive the terminal immediately.
//!
//! Two surfaces share the hub:
//!
//! - [`Relay<T>`] — a manual push-in multicast source (`push` /
//!   `complete` / `fail`).
//! - [`ConnectableStream<T>`] — [`EventStream::publish`]: subscribers
//!   attach first, then an explicit [`connect`](ConnectableStream::connect)
//!   starts the true upstream exactly once. No replay in either
//!   direction: late subscribers see only subsequent events.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::stream::{
    EventStream, SinkHandle, StreamError, StreamSource, Subscriber, Subscription,
    SubscriptionLink,
};

/// Terminal state a hub latches into.
#[derive(Debug, Clone)]
enum Terminal {
    Completed,
    Failed(StreamError),
}

struct HubEntry<T> {
    active: Arc<AtomicBool>,
    sink: SinkHandle<T>,
}

struct Hub<T> {
    entries: Mutex<Vec<HubEntry<T>>>,
    terminal: Mutex<Option<Terminal>>,
    next_id: AtomicUsize,
}

impl<T: Send + 'static> Hub<T> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            terminal: Mutex::new(None),
            next_id: AtomicUsize::new(0),
        }
    }

    /// Registers a sink. If the hub is already terminal, the sink gets
    /// the terminal immediately and nothing is registered.
    fn attach(&self, sink: SinkHandle<T>) -> Subscription {
        let terminal_guard = self.terminal.lock();
        if let Some(terminal) = terminal_guard.clone() {
            drop(terminal_guard);
            match terminal {
                Terminal::Completed => sink.complete(),
                Terminal::Failed(error) => sink.error(error),
            }
            return Subscription::empty();
        }

        // Register while the terminal lock is held so a concurrent latch
        // cannot miss this entry.
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        self.entries.lock().push(HubEntry {
            active: Arc::clone(&active),
            sink: sink.clone(),
        });
        drop(terminal_guard);
        tracing::trace!(subscriber = id, "Broadcast subscriber attached");

        Subscription::new(move || {
            active.store(false, Ordering::Release);
            sink.detach();
        })
    }

    /// Snapshot of the active sinks; prunes deactivated entries.
    fn snapshot(&self) -> Vec<SinkHandle<T>> {
        let mut entries = self.entries.lock();
        entries.retain(|e| e.active.load(Ordering::Acquire));
        entries.iter().map(|e| e.sink.clone()).collect()
    }

    fn broadcast(&self, event: T)
    where
        T: Clone,
    {
        // Snapshot first: no registry lock is held while subscriber
        // callbacks run.
        for sink in self.snapshot() {
            sink.event(event.clone());
        }
    }

    /// Latches the terminal; returns the sinks to notify, or None if a
    /// terminal was already latched. The snapshot happens under the
    /// terminal lock (lock order: terminal, then entries) so no attach
    /// can slip between the latch and the notification set.
    fn latch(&self, terminal: Terminal) -> Option<Vec<SinkHandle<T>>> {
        let mut slot = self.terminal.lock();
        if slot.is_some() {
            return None;
        }
        *slot = Some(terminal);
        let sinks = self.snapshot();
        drop(slot);
        Some(sinks)
    }

    fn complete(&self) {
        if let Some(sinks) = self.latch(Terminal::Completed) {
            for sink in sinks {
                sink.complete();
            }
            // Terminal means nothing further is produced; drop the
            // registry so the subscribers are fully released.
            self.disconnect_all();
        }
    }

    fn fail(&self, error: StreamError) {
        if let Some(sinks) = self.latch(Terminal::Failed(error.clone())) {
            for sink in sinks {
                sink.error(error.clone());
            }
            self.disconnect_all();
        }
    }

    /// Detaches every current subscriber without a terminal signal.
    fn disconnect_all(&self) {
        let entries = std::mem::take(&mut *self.entries.lock());
        for entry in entries {
            entry.active.store(false, Ordering::Release);
            entry.sink.detach();
        }
    }

    fn subscriber_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.active.load(Ordering::Acquire))
            .count()
    }
}

struct HubSource<T> {
    hub: Arc<Hub<T>>,
}

impl<T: Send + 'static> StreamSource<T> for HubSource<T> {
    fn subscribe_raw(&self, sink: SinkHandle<T>) -> Subscription {
        self.hub.attach(sink)
    }
}

/// Manual multicast push source.
///
/// Every active subscriber of [`stream`](Self::stream) receives each
/// pushed event, in push order, exactly once. Subscribers attaching
/// after a `push` do not see it (hot stream, no replay).
pub struct Relay<T> {
    hub: Arc<Hub<T>>,
}

impl<T> Clone for Relay<T> {
    fn clone(&self) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
        }
    }
}

impl<T: Clone + Send + 'static> Relay<T> {
    /// Creates a relay with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hub: Arc::new(Hub::new()),
        }
    }

    /// The multicast stream fed by this relay.
    #[must_use]
    pub fn stream(&self) -> EventStream<T> {
        EventStream::from_source(HubSource {
            hub: Arc::clone(&self.hub),
        })
    }

    /// Pushes one event to every active subscriber.
    pub fn push(&self, event: T) {
        self.hub.broadcast(event);
    }

    /// Completes the relay; all subscribers receive the completion and
    /// later subscribers receive it immediately on attach.
    pub fn complete(&self) {
        self.hub.complete();
    }

    /// Fails the relay; the error fans out to every subscriber.
    pub fn fail(&self, error: StreamError) {
        self.hub.fail(error);
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }
}

impl<T: Clone + Send + 'static> Default for Relay<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Forwards one upstream subscription into a hub.
struct HubForwarder<T> {
    hub: Arc<Hub<T>>,
}

impl<T: Clone + Send + 'static> Subscriber<T> for HubForwarder<T> {
    fn on_event(&mut self, event: T) {
        self.hub.broadcast(event);
    }

    fn on_complete(&mut self) {
        self.hub.complete();
    }

    fn on_error(&mut self, error: StreamError) {
        self.hub.fail(error);
    }
}

/// A multicast stream whose upstream starts only on explicit
/// [`connect`](Self::connect).
///
/// Observers attached before `connect` see everything from the first
/// upstream event; observers attached after see only subsequent events.
pub struct ConnectableStream<T> {
    upstream: EventStream<T>,
    hub: Arc<Hub<T>>,
    connection: Mutex<Option<Subscription>>,
}

impl<T: Clone + Send + 'static> ConnectableStream<T> {
    fn new(upstream: EventStream<T>) -> Self {
        Self {
            upstream,
            hub: Arc::new(Hub::new()),
            connection: Mutex::new(None),
        }
    }

    /// The multicast stream. Subscribing never starts the upstream.
    #[must_use]
    pub fn stream(&self) -> EventStream<T> {
        EventStream::from_source(HubSource {
            hub: Arc::clone(&self.hub),
        })
    }

    /// Starts the upstream feed exactly once.
    ///
    /// While a connection is live, further calls return the same handle.
    /// Disposing the handle stops the upstream and disconnects all
    /// current subscribers without a terminal signal.
    pub fn connect(&self) -> Subscription {
        let (handle, link) = {
            let mut connection = self.connection.lock();
            if let Some(existing) = connection.as_ref() {
                if !existing.is_disposed() {
                    return existing.clone();
                }
            }

            let link = SubscriptionLink::new();
            let upstream = link.clone();
            let hub = Arc::clone(&self.hub);
            let handle = Subscription::new(move || {
                tracing::debug!("Disconnecting multicast upstream");
                upstream.dispose();
                hub.disconnect_all();
            });
            *connection = Some(handle.clone());
            (handle, link)
        };

        // Subscribe outside the connection lock: a synchronous upstream
        // delivers everything during this call.
        tracing::debug!("Connecting multicast upstream");
        link.link(self.upstream.subscribe(HubForwarder {
            hub: Arc::clone(&self.hub),
        }));
        handle
    }
}

impl<T: Clone + Send + 'static> EventStream<T> {
    /// Turns this stream into a connectable multicast stream.
    #[must_use]
    pub fn publish(&self) -> ConnectableStream<T> {
        ConnectableStream::new(self.clone())
    }
}
