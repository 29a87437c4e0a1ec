//! # Join-Pattern Engine
//!
//! Transactional synchronization of N independently-delivered streams:
//! declare the participants of a [`Pattern`], bind a projection with
//! [`Pattern::then`] to get a [`Plan`], activate one or more plans with
//! [`when`]. For every round, each participant contributes exactly one
//! value to a single combined emission.
//!
//! ## Algorithm
//!
//! Each participant delivery enqueues into a private FIFO scoped to
//! (plan, participant). On every enqueue the plan atomically checks
//! whether all of its queues are non-empty; if so it dequeues exactly
//! one value from each, applies the projection to the values in
//! participant order, and pushes the result downstream. The whole
//! enqueue-check-fire-project-emit sequence is one critical section
//! behind a single per-plan lock, so concurrent enqueues from different
//! participants can neither double-fire nor leave a ready firing
//! undetected, and firing order equals emission order.
//!
//! ## Termination
//!
//! - A participant completing retires its plan permanently; residual
//!   queued values are discarded with it.
//! - When the last live plan retires, the combined stream completes and
//!   every participant subscription is disposed.
//! - Any participant error, or a projection error, fails the combined
//!   stream and tears down all plans under the `when` (fail-fast, not
//!   fail-isolated). Values dequeued for a failed firing are discarded,
//!   not requeued.
//!
//! ## Limits
//!
//! Queues are unbounded: a participant outrunning its peers grows its
//! queue without bound. The engine only logs a one-shot warning per
//! queue past [`JoinConfig::queue_warning_threshold`]; it never blocks
//! or drops.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::stream::{
    EventStream, SinkHandle, StreamError, StreamSource, Subscriber, Subscription,
};

/// Default queue length that triggers the outrunning-participant warning.
pub const DEFAULT_QUEUE_WARNING_THRESHOLD: usize = 1024;

/// Join engine configuration.
#[derive(Debug, Clone)]
pub struct JoinConfig {
    /// Queue length at which a one-shot `warn!` is logged for a
    /// participant outrunning its peers. Purely observational; queues
    /// stay unbounded.
    pub queue_warning_threshold: usize,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            queue_warning_threshold: DEFAULT_QUEUE_WARNING_THRESHOLD,
        }
    }
}

impl JoinConfig {
    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> JoinConfigBuilder {
        JoinConfigBuilder::default()
    }
}

/// Builder for [`JoinConfig`].
#[derive(Debug, Default)]
pub struct JoinConfigBuilder {
    queue_warning_threshold: Option<usize>,
}

impl JoinConfigBuilder {
    /// Sets the queue warning threshold.
    #[must_use]
    pub fn queue_warning_threshold(mut self, threshold: usize) -> Self {
        self.queue_warning_threshold = Some(threshold);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> JoinConfig {
        JoinConfig {
            queue_warning_threshold: self
                .queue_warning_threshold
                .unwrap_or(DEFAULT_QUEUE_WARNING_THRESHOLD),
        }
    }
}

/// Immutable ordered list of participant streams awaiting a projection.
///
/// Declaration order fixes the order in which the projection receives
/// values.
pub struct Pattern<T> {
    participants: Vec<EventStream<T>>,
}

/// Declares a two-participant pattern. Extend it with [`Pattern::and`].
pub fn and<T: Send + 'static>(a: &EventStream<T>, b: &EventStream<T>) -> Pattern<T> {
    Pattern {
        participants: vec![a.clone(), b.clone()],
    }
}

impl<T: Send + 'static> Pattern<T> {
    /// Appends one more participant.
    #[must_use]
    pub fn and(mut self, participant: &EventStream<T>) -> Self {
        self.participants.push(participant.clone());
        self
    }

    /// Number of participants.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.participants.len()
    }

    /// Binds a projection over one dequeued value per participant,
    /// producing a [`Plan`]. Binding starts nothing; activation happens
    /// in [`when`].
    ///
    /// The projection receives exactly `arity()` values, in declaration
    /// order. A projection error fails the combined stream.
    pub fn then<R>(
        self,
        projection: impl Fn(&[T]) -> Result<R, StreamError> + Send + Sync + 'static,
    ) -> Plan<T, R> {
        Plan {
            participants: self.participants,
            projection: Arc::new(projection),
        }
    }
}

impl<T: Send + 'static> EventStream<T> {
    /// Method form of [`and`].
    #[must_use]
    pub fn and(&self, other: &EventStream<T>) -> Pattern<T> {
        and(self, other)
    }
}

type Projection<T, R> = dyn Fn(&[T]) -> Result<R, StreamError> + Send + Sync;

/// A [`Pattern`] bound to a projection, ready for activation.
pub struct Plan<T, R> {
    participants: Vec<EventStream<T>>,
    projection: Arc<Projection<T, R>>,
}

/// Activates `plans` concurrently and merges their joint firings into
/// one combined stream, in temporal order. Uses the default
/// [`JoinConfig`].
pub fn when<T, R>(plans: impl IntoIterator<Item = Plan<T, R>>) -> EventStream<R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    when_with(plans, JoinConfig::default())
}

/// [`when`] with explicit configuration.
///
/// Activation happens at subscribe time: one subscription per
/// participant per plan. Disposing the returned stream's subscription
/// detaches every participant of every plan.
pub fn when_with<T, R>(
    plans: impl IntoIterator<Item = Plan<T, R>>,
    config: JoinConfig,
) -> EventStream<R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    EventStream::from_source(WhenSource {
        plans: plans.into_iter().collect(),
        config,
    })
}

struct WhenSource<T, R> {
    plans: Vec<Plan<T, R>>,
    config: JoinConfig,
}

/// Queues of one plan, all behind the plan's single lock.
struct PlanQueues<T> {
    queues: Vec<VecDeque<T>>,
    warned: Vec<bool>,
}

struct PlanRuntime<T, R> {
    index: usize,
    projection: Arc<Projection<T, R>>,
    /// Retired flag. Atomic so teardown paths never need the plan lock;
    /// a projection or subscriber may dispose the combined subscription
    /// from inside a delivery without deadlocking.
    dead: AtomicBool,
    state: Mutex<PlanQueues<T>>,
    warn_threshold: usize,
}

struct JoinRuntime<T, R> {
    down: SinkHandle<R>,
    plans: Vec<Arc<PlanRuntime<T, R>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    live_plans: AtomicUsize,
    terminated: AtomicBool,
}

impl<T: Send + 'static, R: Send + 'static> JoinRuntime<T, R> {
    /// Tracks a participant subscription, or disposes it immediately if
    /// the runtime already tore down during activation.
    fn register(&self, subscription: Subscription) {
        let mut subs = self.subscriptions.lock();
        if self.terminated.load(Ordering::Acquire) {
            drop(subs);
            subscription.dispose();
        } else {
            subs.push(subscription);
        }
    }

    /// Claims the teardown; at most one caller gets the subscriptions.
    fn take_subscriptions(&self) -> Option<Vec<Subscription>> {
        let mut subs = self.subscriptions.lock();
        if self.terminated.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(std::mem::take(&mut *subs))
    }

    fn retire_all_plans(&self) {
        for plan in &self.plans {
            plan.dead.store(true, Ordering::Release);
        }
    }

    /// A plan retired through participant completion. The combined
    /// stream completes once no plan can ever fire again.
    fn plan_retired(&self) {
        if self.live_plans.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(subs) = self.take_subscriptions() {
                tracing::debug!("All join plans retired; completing combined stream");
                for sub in subs {
                    sub.dispose();
                }
                self.down.complete();
            }
        }
    }

    /// Fail-fast: any participant or projection error cancels every
    /// participant subscription across all plans and propagates.
    fn fail(&self, error: StreamError) {
        self.retire_all_plans();
        if let Some(subs) = self.take_subscriptions() {
            tracing::debug!(%error, "Join failed; tearing down all plans");
            for sub in subs {
                sub.dispose();
            }
            self.down.error(error);
        }
    }

    /// Silent teardown on disposal of the combined subscription.
    fn cancel(&self) {
        self.retire_all_plans();
        if let Some(subs) = self.take_subscriptions() {
            tracing::debug!("Join subscription disposed; detaching participants");
            for sub in subs {
                sub.dispose();
            }
        }
    }
}

struct ParticipantSubscriber<T, R> {
    plan: Arc<PlanRuntime<T, R>>,
    participant: usize,
    runtime: Arc<JoinRuntime<T, R>>,
}

impl<T: Send + 'static, R: Send + 'static> Subscriber<T> for ParticipantSubscriber<T, R> {
    fn on_event(&mut self, event: T) {
        if self.plan.dead.load(Ordering::Acquire) {
            return;
        }
        let mut state = self.plan.state.lock();
        // Teardown may have retired the plan while we waited.
        if self.plan.dead.load(Ordering::Acquire) {
            return;
        }

        state.queues[self.participant].push_back(event);

        let queued = state.queues[self.participant].len();
        if queued >= self.plan.warn_threshold && !state.warned[self.participant] {
            state.warned[self.participant] = true;
            tracing::warn!(
                plan = self.plan.index,
                participant = self.participant,
                queued,
                "Join participant outrunning its peers; queues are unbounded"
            );
        }

        if state.queues.iter().any(VecDeque::is_empty) {
            return;
        }

        // Joint firing: one value per participant, FIFO, still inside
        // the plan's critical section.
        let values: SmallVec<[T; 4]> = state
            .queues
            .iter_mut()
            .map(|queue| queue.pop_front().expect("all queues checked non-empty"))
            .collect();

        match (self.plan.projection)(&values) {
            Ok(result) => self.runtime.down.event(result),
            Err(error) => {
                drop(state);
                self.runtime.fail(error);
            }
        }
    }

    fn on_complete(&mut self) {
        // First completion retires the plan for good; queued values of
        // the other participants are discarded with it.
        if self.plan.dead.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(
            plan = self.plan.index,
            participant = self.participant,
            "Participant completed; plan retired"
        );
        self.runtime.plan_retired();
    }

    fn on_error(&mut self, error: StreamError) {
        self.runtime.fail(error);
    }
}

impl<T, R> StreamSource<R> for WhenSource<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    fn subscribe_raw(&self, sink: SinkHandle<R>) -> Subscription {
        if self.plans.is_empty() {
            sink.complete();
            return Subscription::empty();
        }

        let plan_runtimes: Vec<Arc<PlanRuntime<T, R>>> = self
            .plans
            .iter()
            .enumerate()
            .map(|(index, plan)| {
                Arc::new(PlanRuntime {
                    index,
                    projection: Arc::clone(&plan.projection),
                    dead: AtomicBool::new(false),
                    state: Mutex::new(PlanQueues {
                        queues: plan.participants.iter().map(|_| VecDeque::new()).collect(),
                        warned: vec![false; plan.participants.len()],
                    }),
                    warn_threshold: self.config.queue_warning_threshold,
                })
            })
            .collect();

        let runtime = Arc::new(JoinRuntime {
            down: sink,
            plans: plan_runtimes.clone(),
            subscriptions: Mutex::new(Vec::new()),
            live_plans: AtomicUsize::new(plan_runtimes.len()),
            terminated: AtomicBool::new(false),
        });

        tracing::debug!(plans = self.plans.len(), "Activating join patterns");
        for (plan, plan_runtime) in self.plans.iter().zip(&plan_runtimes) {
            for (participant, stream) in plan.participants.iter().enumerate() {
                let subscription = stream.subscribe(ParticipantSubscriber {
                    plan: Arc::clone(plan_runtime),
                    participant,
                    runtime: Arc::clone(&runtime),
                });
                runtime.register(subscription);
            }
        }

        Subscription::new(move || runtime.cancel())
    }
}
