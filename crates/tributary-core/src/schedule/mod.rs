//! # Scheduling
//!
//! Execution context is an explicit parameter, never ambient state. A
//! [`Scheduler`] decides where subscription activation runs; the default
//! is the caller's own context.
//!
//! Delivery itself is not rescheduled: once a source is active, events
//! run wherever the producer pushes from. Per-subscription sequencing is
//! enforced by the sink, not by the scheduler.

use std::sync::Arc;

use crate::stream::{EventStream, SinkHandle, StreamSource, Subscription, SubscriptionLink};

/// Decides the execution context for a scheduled task.
pub trait Scheduler: Send + Sync {
    /// Runs `task` on this scheduler's context.
    fn schedule(&self, task: Box<dyn FnOnce() + Send>);
}

/// Runs tasks inline on the calling thread. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallerScheduler;

impl Scheduler for CallerScheduler {
    fn schedule(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}

/// Runs each task on its own named thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn schedule(&self, task: Box<dyn FnOnce() + Send>) {
        let spawned = std::thread::Builder::new()
            .name("tributary-subscribe".into())
            .spawn(task);
        if let Err(error) = spawned {
            tracing::warn!(%error, "Failed to spawn scheduler thread; task dropped");
        }
    }
}

struct ScheduledSource<T> {
    upstream: EventStream<T>,
    scheduler: Arc<dyn Scheduler>,
}

impl<T: Send + 'static> StreamSource<T> for ScheduledSource<T> {
    fn subscribe_raw(&self, sink: SinkHandle<T>) -> Subscription {
        let link = SubscriptionLink::new();
        let deferred = link.clone();
        let upstream = self.upstream.clone();
        self.scheduler.schedule(Box::new(move || {
            deferred.link(upstream.attach(sink));
        }));
        link.handle()
    }
}

impl<T: Send + 'static> EventStream<T> {
    /// Moves subscription activation onto `scheduler`.
    ///
    /// The returned stream's `subscribe` returns immediately; the actual
    /// upstream attach runs as a scheduled task. Disposing the handle
    /// before the task has run still detaches: the late activation is
    /// disposed the moment it completes.
    pub fn subscribe_on(&self, scheduler: Arc<dyn Scheduler>) -> EventStream<T> {
        EventStream::from_source(ScheduledSource {
            upstream: self.clone(),
            scheduler,
        })
    }
}
