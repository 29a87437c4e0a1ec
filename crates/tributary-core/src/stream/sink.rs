//! Per-subscription delivery gate.
//!
//! Every subscription funnels its deliveries through one [`SinkHandle`].
//! The handle owns three obligations of the stream contract:
//!
//! - deliveries are strictly sequential per subscription (one mutex
//!   around the subscriber),
//! - at most one terminal signal, and nothing of any kind after it,
//! - after detachment an in-progress delivery may finish, but no later
//!   delivery reaches the subscriber.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::StreamError;
use super::Subscriber;

struct SinkState<T> {
    subscriber: Mutex<Box<dyn Subscriber<T>>>,
    terminated: AtomicBool,
    detached: AtomicBool,
}

/// Shared, thread-safe handle through which a source pushes into one
/// subscriber.
pub struct SinkHandle<T> {
    state: Arc<SinkState<T>>,
}

impl<T> Clone for SinkHandle<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Send> SinkHandle<T> {
    pub(crate) fn new(subscriber: Box<dyn Subscriber<T>>) -> Self {
        Self {
            state: Arc::new(SinkState {
                subscriber: Mutex::new(subscriber),
                terminated: AtomicBool::new(false),
                detached: AtomicBool::new(false),
            }),
        }
    }

    /// Delivers one event, unless the sink is already terminal or
    /// detached.
    pub fn event(&self, event: T) {
        if !self.is_live() {
            return;
        }
        let mut subscriber = self.state.subscriber.lock();
        // A terminal or detach may have won the lock race; re-check so
        // nothing is delivered after it.
        if !self.is_live() {
            return;
        }
        subscriber.on_event(event);
    }

    /// Delivers the completion signal; first terminal wins.
    pub fn complete(&self) {
        if self.state.detached.load(Ordering::Acquire) {
            return;
        }
        if self
            .state
            .terminated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let mut subscriber = self.state.subscriber.lock();
        if self.state.detached.load(Ordering::Acquire) {
            return;
        }
        subscriber.on_complete();
    }

    /// Delivers the error signal; first terminal wins.
    pub fn error(&self, error: StreamError) {
        if self.state.detached.load(Ordering::Acquire) {
            return;
        }
        if self
            .state
            .terminated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let mut subscriber = self.state.subscriber.lock();
        if self.state.detached.load(Ordering::Acquire) {
            return;
        }
        subscriber.on_error(error);
    }

    /// True while the sink is neither terminated nor detached.
    ///
    /// Synchronous producers poll this between emissions so disposal
    /// stops them promptly.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.state.terminated.load(Ordering::Acquire)
            && !self.state.detached.load(Ordering::Acquire)
    }

    /// Silently stops all further delivery. Called on disposal; never
    /// delivers a terminal of its own.
    pub(crate) fn detach(&self) {
        self.state.detached.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::FnSubscriber;
    use parking_lot::Mutex as PlMutex;

    fn collecting() -> (SinkHandle<i32>, Arc<PlMutex<Vec<String>>>) {
        let log = Arc::new(PlMutex::new(Vec::new()));
        let events = Arc::clone(&log);
        let done = Arc::clone(&log);
        let failed = Arc::clone(&log);
        let sink = SinkHandle::new(Box::new(FnSubscriber::new(
            move |e: i32| events.lock().push(format!("event:{e}")),
            move || done.lock().push("complete".into()),
            move |err: StreamError| failed.lock().push(format!("error:{err}")),
        )));
        (sink, log)
    }

    #[test]
    fn test_delivers_in_order() {
        let (sink, log) = collecting();
        sink.event(1);
        sink.event(2);
        sink.complete();
        assert_eq!(*log.lock(), vec!["event:1", "event:2", "complete"]);
    }

    #[test]
    fn test_nothing_after_completion() {
        let (sink, log) = collecting();
        sink.event(1);
        sink.complete();
        sink.event(2);
        sink.complete();
        sink.error(StreamError::other("late"));
        assert_eq!(*log.lock(), vec!["event:1", "complete"]);
    }

    #[test]
    fn test_first_terminal_wins() {
        let (sink, log) = collecting();
        sink.error(StreamError::other("boom"));
        sink.complete();
        assert_eq!(*log.lock(), vec!["error:boom"]);
    }

    #[test]
    fn test_detach_gates_everything() {
        let (sink, log) = collecting();
        sink.event(1);
        sink.detach();
        sink.event(2);
        sink.complete();
        sink.error(StreamError::other("boom"));
        assert!(!sink.is_live());
        assert_eq!(*log.lock(), vec!["event:1"]);
    }
}
