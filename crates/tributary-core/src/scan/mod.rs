//! # Scan Operators
//!
//! Stateful one-in-one-out transforms producing a running aggregate per
//! event: for each input, the accumulator is updated and the new
//! accumulator value is emitted. Exactly one output per input, in input
//! order; completion and error pass through unchanged after all computed
//! values have been flushed.
//!
//! Two primitives carry all the state handling:
//!
//! - [`running_fold`] — seeded accumulation with a fallible step,
//! - [`running_reduce`] — the first element seeds the accumulator and is
//!   emitted as-is.
//!
//! The named operators ([`running_sum`], [`running_count`],
//! [`running_average`], [`running_min`], [`running_max`],
//! [`running_distinct`] and their `_by` forms) are instantiations of
//! those primitives; numeric behavior is supplied through the
//! [`Numeric`] trait rather than per-type operator families.
//!
//! ## Ownership
//!
//! The accumulator is constructed inside `subscribe`, once per
//! subscription. Two subscriptions of the same derived stream never
//! share state; disposal drops the accumulator with the subscription.

use std::cmp::Ordering;
use std::hash::Hash;
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::stream::{
    EventStream, SinkHandle, StreamError, StreamSource, Subscriber, Subscription,
    SubscriptionLink,
};

/// Numeric behavior required by the aggregating operators: the additive
/// identity, addition, and a widening conversion for averaging.
pub trait Numeric: Copy + Send + 'static {
    /// Additive identity; the seed of a running sum.
    const ZERO: Self;

    /// Addition.
    #[must_use]
    fn add(self, other: Self) -> Self;

    /// Widens to `f64` for floating-point averaging.
    fn to_f64(self) -> f64;
}

macro_rules! impl_numeric {
    ($($ty:ty => $zero:expr),* $(,)?) => {
        $(
            impl Numeric for $ty {
                const ZERO: Self = $zero;

                #[inline]
                fn add(self, other: Self) -> Self {
                    self + other
                }

                #[inline]
                #[allow(clippy::cast_precision_loss, clippy::cast_lossless)]
                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_numeric!(i32 => 0, i64 => 0, u32 => 0, u64 => 0, f32 => 0.0, f64 => 0.0);

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

type Step<S, T> = dyn Fn(S, T) -> Result<S, StreamError> + Send + Sync;

struct FoldSource<T, S> {
    upstream: EventStream<T>,
    seed: S,
    step: Arc<Step<S, T>>,
}

struct FoldSubscriber<T, S> {
    state: Option<S>,
    step: Arc<Step<S, T>>,
    down: SinkHandle<S>,
    upstream: SubscriptionLink,
    done: bool,
}

impl<T: Send, S: Clone + Send> Subscriber<T> for FoldSubscriber<T, S> {
    fn on_event(&mut self, event: T) {
        if self.done {
            return;
        }
        let Some(state) = self.state.take() else {
            return;
        };
        match (self.step)(state, event) {
            Ok(next) => {
                self.down.event(next.clone());
                self.state = Some(next);
            }
            Err(error) => {
                // Step failure terminates the derived stream and
                // detaches upstream; it is not caught or retried.
                self.done = true;
                self.down.error(error);
                self.upstream.dispose();
            }
        }
    }

    fn on_complete(&mut self) {
        if !self.done {
            self.done = true;
            self.down.complete();
        }
    }

    fn on_error(&mut self, error: StreamError) {
        if !self.done {
            self.done = true;
            self.down.error(error);
        }
    }
}

impl<T, S> StreamSource<S> for FoldSource<T, S>
where
    T: Send + 'static,
    S: Clone + Send + Sync + 'static,
{
    fn subscribe_raw(&self, sink: SinkHandle<S>) -> Subscription {
        let link = SubscriptionLink::new();
        let subscription = self.upstream.subscribe(FoldSubscriber {
            state: Some(self.seed.clone()),
            step: Arc::clone(&self.step),
            down: sink,
            upstream: link.clone(),
            done: false,
        });
        link.link(subscription.clone());
        subscription
    }
}

/// Derives a stream that emits, for each input event, the accumulator
/// after folding that event in, starting from `seed`.
///
/// A step returning `Err` terminates the derived stream with that error
/// and detaches from the source.
pub fn running_fold<T, S>(
    source: &EventStream<T>,
    seed: S,
    step: impl Fn(S, T) -> Result<S, StreamError> + Send + Sync + 'static,
) -> EventStream<S>
where
    T: Send + 'static,
    S: Clone + Send + Sync + 'static,
{
    EventStream::from_source(FoldSource {
        upstream: source.clone(),
        seed,
        step: Arc::new(step),
    })
}

type Combine<T> = dyn Fn(T, T) -> Result<T, StreamError> + Send + Sync;

struct ReduceSource<T> {
    upstream: EventStream<T>,
    combine: Arc<Combine<T>>,
}

struct ReduceSubscriber<T> {
    state: Option<T>,
    combine: Arc<Combine<T>>,
    down: SinkHandle<T>,
    upstream: SubscriptionLink,
    done: bool,
}

impl<T: Clone + Send> Subscriber<T> for ReduceSubscriber<T> {
    fn on_event(&mut self, event: T) {
        if self.done {
            return;
        }
        let next = match self.state.take() {
            // The first element seeds the accumulator.
            None => event,
            Some(state) => match (self.combine)(state, event) {
                Ok(next) => next,
                Err(error) => {
                    self.done = true;
                    self.down.error(error);
                    self.upstream.dispose();
                    return;
                }
            },
        };
        self.down.event(next.clone());
        self.state = Some(next);
    }

    fn on_complete(&mut self) {
        if !self.done {
            self.done = true;
            self.down.complete();
        }
    }

    fn on_error(&mut self, error: StreamError) {
        if !self.done {
            self.done = true;
            self.down.error(error);
        }
    }
}

impl<T> StreamSource<T> for ReduceSource<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn subscribe_raw(&self, sink: SinkHandle<T>) -> Subscription {
        let link = SubscriptionLink::new();
        let subscription = self.upstream.subscribe(ReduceSubscriber {
            state: None,
            combine: Arc::clone(&self.combine),
            down: sink,
            upstream: link.clone(),
            done: false,
        });
        link.link(subscription.clone());
        subscription
    }
}

/// Seedless fold: the first element initializes the accumulator and is
/// emitted unchanged; every later element is combined into it.
///
/// An empty source yields an empty derived stream.
pub fn running_reduce<T>(
    source: &EventStream<T>,
    combine: impl Fn(T, T) -> Result<T, StreamError> + Send + Sync + 'static,
) -> EventStream<T>
where
    T: Clone + Send + Sync + 'static,
{
    EventStream::from_source(ReduceSource {
        upstream: source.clone(),
        combine: Arc::new(combine),
    })
}

// ---------------------------------------------------------------------------
// Named operators
// ---------------------------------------------------------------------------

/// Running sum of a numeric stream. Seed is the additive identity.
pub fn running_sum<N: Numeric + Sync>(source: &EventStream<N>) -> EventStream<N> {
    running_fold(source, N::ZERO, |acc, x| Ok(acc.add(x)))
}

/// Running sum of a value selected from each event.
pub fn running_sum_by<T, N>(
    source: &EventStream<T>,
    selector: impl Fn(&T) -> N + Send + Sync + 'static,
) -> EventStream<N>
where
    T: Send + 'static,
    N: Numeric + Sync,
{
    running_fold(source, N::ZERO, move |acc, x| Ok(acc.add(selector(&x))))
}

/// Running count of all events.
pub fn running_count<T: Send + 'static>(source: &EventStream<T>) -> EventStream<u64> {
    running_count_if(source, |_| true)
}

/// Running count of the events matching `predicate`. Non-matching
/// events still emit (the unchanged count).
pub fn running_count_if<T: Send + 'static>(
    source: &EventStream<T>,
    predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
) -> EventStream<u64> {
    running_fold(source, 0_u64, move |count, x| {
        Ok(if predicate(&x) { count + 1 } else { count })
    })
}

#[derive(Debug, Clone, Copy)]
struct AverageState {
    count: u64,
    sum: f64,
}

/// Running arithmetic mean of a numeric stream.
///
/// Accumulation and division happen in `f64` regardless of the source
/// numeric type. The first event already emits (count is 1 by then).
pub fn running_average<N: Numeric + Sync>(source: &EventStream<N>) -> EventStream<f64> {
    running_average_by(source, |x| *x)
}

/// Running arithmetic mean of a value selected from each event.
#[allow(clippy::cast_precision_loss)]
pub fn running_average_by<T, N>(
    source: &EventStream<T>,
    selector: impl Fn(&T) -> N + Send + Sync + 'static,
) -> EventStream<f64>
where
    T: Send + 'static,
    N: Numeric,
{
    running_fold(
        source,
        AverageState { count: 0, sum: 0.0 },
        move |state, x| {
            Ok(AverageState {
                count: state.count + 1,
                sum: state.sum + selector(&x).to_f64(),
            })
        },
    )
    .map(|state| state.sum / state.count as f64)
}

/// Running minimum. The accumulated value is retained on ties and on
/// incomparable pairs; only a strictly smaller element replaces it.
pub fn running_min<T>(source: &EventStream<T>) -> EventStream<T>
where
    T: Clone + PartialOrd + Send + Sync + 'static,
{
    running_reduce(source, |acc, next| {
        Ok(match next.partial_cmp(&acc) {
            Some(Ordering::Less) => next,
            _ => acc,
        })
    })
}

/// Running minimum of the values selected from each event.
pub fn running_min_by<T, K>(
    source: &EventStream<T>,
    selector: impl Fn(&T) -> K + Send + Sync + 'static,
) -> EventStream<K>
where
    T: Send + 'static,
    K: Clone + PartialOrd + Send + Sync + 'static,
{
    running_min(&source.map(move |x| selector(&x)))
}

/// Running maximum. The accumulated value is retained on ties and on
/// incomparable pairs; only a strictly greater element replaces it.
pub fn running_max<T>(source: &EventStream<T>) -> EventStream<T>
where
    T: Clone + PartialOrd + Send + Sync + 'static,
{
    running_reduce(source, |acc, next| {
        Ok(match next.partial_cmp(&acc) {
            Some(Ordering::Greater) => next,
            _ => acc,
        })
    })
}

/// Running maximum of the values selected from each event.
pub fn running_max_by<T, K>(
    source: &EventStream<T>,
    selector: impl Fn(&T) -> K + Send + Sync + 'static,
) -> EventStream<K>
where
    T: Send + 'static,
    K: Clone + PartialOrd + Send + Sync + 'static,
{
    running_max(&source.map(move |x| selector(&x)))
}

/// Running set of distinct values. Each emission carries the whole
/// accumulated set, not a delta.
pub fn running_distinct<T>(source: &EventStream<T>) -> EventStream<FxHashSet<T>>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    running_fold(source, FxHashSet::default(), |mut set, x| {
        set.insert(x);
        Ok(set)
    })
}

/// Running set of distinct keys selected from each event.
pub fn running_distinct_by<T, K>(
    source: &EventStream<T>,
    selector: impl Fn(&T) -> K + Send + Sync + 'static,
) -> EventStream<FxHashSet<K>>
where
    T: Send + 'static,
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    running_fold(source, FxHashSet::default(), move |mut set, x| {
        set.insert(selector(&x));
        Ok(set)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Relay;
    use crate::stream::testing::Recorder;

    fn collect<S: Send + 'static>(stream: &EventStream<S>) -> Vec<S> {
        let (recorder, record) = Recorder::new();
        stream.subscribe(recorder);
        let mut guard = record.lock();
        std::mem::take(&mut guard.events)
    }

    // --- Sum tests ---

    #[test]
    fn test_running_sum_ints() {
        let source = EventStream::from_iter(1..=10_i64);
        assert_eq!(
            collect(&running_sum(&source)),
            vec![1, 3, 6, 10, 15, 21, 28, 36, 45, 55]
        );
    }

    #[test]
    fn test_running_sum_doubles() {
        let source = EventStream::from_iter(vec![0.5, 1.0, 1.5, 2.0]);
        assert_eq!(collect(&running_sum(&source)), vec![0.5, 1.5, 3.0, 5.0]);
    }

    #[test]
    fn test_running_sum_by_selector() {
        let source = EventStream::from_iter(vec![("a", 1), ("b", 2), ("c", 3)]);
        assert_eq!(
            collect(&running_sum_by(&source, |(_, n)| *n)),
            vec![1, 3, 6]
        );
    }

    // --- Count tests ---

    #[test]
    fn test_running_count_default() {
        let source = EventStream::from_iter(vec![0, 1, 1, 2, 3, 5, 8, 13, 21, 34]);
        assert_eq!(
            collect(&running_count(&source)),
            (1..=10).collect::<Vec<u64>>()
        );
    }

    #[test]
    fn test_running_count_if_predicate() {
        let source = EventStream::from_iter(1..=6);
        // Non-matching events still emit the unchanged count.
        assert_eq!(
            collect(&running_count_if(&source, |x| x % 2 == 0)),
            vec![0, 1, 1, 2, 2, 3]
        );
    }

    // --- Average tests ---

    #[test]
    fn test_running_average_ints() {
        let source = EventStream::from_iter(1..=10_i32);
        assert_eq!(
            collect(&running_average(&source)),
            vec![1.0, 1.5, 2.0, 2.5, 3.0, 3.5, 4.0, 4.5, 5.0, 5.5]
        );
    }

    #[test]
    fn test_running_average_emits_from_first_event() {
        let source = EventStream::from_iter(vec![4_i32]);
        assert_eq!(collect(&running_average(&source)), vec![4.0]);
    }

    // --- Min/max tests ---

    #[test]
    fn test_running_min_sequence() {
        let source = EventStream::from_iter(vec![91, 81, 95, 69, 41, 77]);
        assert_eq!(
            collect(&running_min(&source)),
            vec![91, 81, 81, 69, 41, 41]
        );
    }

    #[test]
    fn test_running_max_sequence() {
        let source = EventStream::from_iter(vec![91, 81, 95, 69, 41, 77]);
        assert_eq!(
            collect(&running_max(&source)),
            vec![91, 91, 95, 95, 95, 95]
        );
    }

    /// Ordered by `value` only; `tag` rides along to make tie handling
    /// observable.
    #[derive(Debug, Clone)]
    struct Reading {
        value: i32,
        tag: char,
    }

    impl PartialEq for Reading {
        fn eq(&self, other: &Self) -> bool {
            self.value == other.value
        }
    }

    impl PartialOrd for Reading {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            self.value.partial_cmp(&other.value)
        }
    }

    fn reading(value: i32, tag: char) -> Reading {
        Reading { value, tag }
    }

    #[test]
    fn test_running_min_retains_accumulated_value_on_tie() {
        let source = EventStream::from_iter(vec![
            reading(5, 'a'),
            reading(5, 'b'),
            reading(3, 'c'),
            reading(3, 'd'),
        ]);
        let tags: Vec<char> = collect(&running_min(&source))
            .into_iter()
            .map(|r| r.tag)
            .collect();
        assert_eq!(tags, vec!['a', 'a', 'c', 'c']);
    }

    #[test]
    fn test_running_max_retains_accumulated_value_on_tie() {
        let source = EventStream::from_iter(vec![
            reading(5, 'a'),
            reading(5, 'b'),
            reading(8, 'c'),
            reading(8, 'd'),
        ]);
        let tags: Vec<char> = collect(&running_max(&source))
            .into_iter()
            .map(|r| r.tag)
            .collect();
        assert_eq!(tags, vec!['a', 'a', 'c', 'c']);
    }

    #[test]
    fn test_running_min_by_emits_selected_values() {
        let source = EventStream::from_iter(vec![("a", 9), ("b", 4), ("c", 7)]);
        assert_eq!(
            collect(&running_min_by(&source, |(_, n)| *n)),
            vec![9, 4, 4]
        );
    }

    #[test]
    fn test_running_min_empty_source_emits_nothing() {
        let source = EventStream::from_iter(Vec::<i32>::new());
        let (recorder, record) = Recorder::new();
        running_min(&source).subscribe(recorder);

        let record = record.lock();
        assert!(record.events.is_empty());
        assert!(record.completed);
    }

    // --- Distinct tests ---

    fn set_of(values: &[i32]) -> FxHashSet<i32> {
        values.iter().copied().collect()
    }

    #[test]
    fn test_running_distinct_carries_whole_set() {
        let source = EventStream::from_iter(vec![2, 3, 2, 2, 4, 1]);
        let sets = collect(&running_distinct(&source));
        assert_eq!(
            sets,
            vec![
                set_of(&[2]),
                set_of(&[2, 3]),
                set_of(&[2, 3]),
                set_of(&[2, 3]),
                set_of(&[2, 3, 4]),
                set_of(&[2, 3, 4, 1]),
            ]
        );
    }

    #[test]
    fn test_running_distinct_by_key() {
        let source = EventStream::from_iter(vec![(1, 'x'), (1, 'y'), (2, 'z')]);
        let sets = collect(&running_distinct_by(&source, |(k, _)| *k));
        assert_eq!(sets.last().unwrap(), &set_of(&[1, 2]));
        assert_eq!(sets.iter().map(FxHashSet::len).collect::<Vec<_>>(), vec![1, 1, 2]);
    }

    // --- Failure and ownership tests ---

    #[test]
    fn test_step_failure_terminates_and_detaches() {
        let relay = Relay::new();
        let folded = running_fold(&relay.stream(), 0, |acc, x: i32| {
            if x == 3 {
                Err(StreamError::step("refused"))
            } else {
                Ok(acc + x)
            }
        });

        let (recorder, record) = Recorder::new();
        folded.subscribe(recorder);

        relay.push(1);
        relay.push(2);
        relay.push(3);
        relay.push(4);

        let record = record.lock();
        assert_eq!(record.events, vec![1, 3]);
        assert_eq!(record.error, Some(StreamError::step("refused")));
        // The failed scan detached from the source.
        assert_eq!(relay.subscriber_count(), 0);
    }

    #[test]
    fn test_upstream_error_flushes_then_propagates() {
        let relay = Relay::new();
        let summed = running_sum(&relay.stream());
        let (recorder, record) = Recorder::new();
        summed.subscribe(recorder);

        relay.push(1);
        relay.push(2);
        relay.fail(StreamError::source("down"));

        let record = record.lock();
        assert_eq!(record.events, vec![1, 3]);
        assert_eq!(record.error, Some(StreamError::source("down")));
    }

    #[test]
    fn test_subscriptions_never_share_accumulators() {
        let relay = Relay::new();
        let summed = running_sum(&relay.stream());

        let (r1, rec1) = Recorder::new();
        summed.subscribe(r1);
        relay.push(1);
        relay.push(2);

        // The second subscription starts its own accumulator at its own
        // attach point.
        let (r2, rec2) = Recorder::new();
        summed.subscribe(r2);
        relay.push(3);

        assert_eq!(rec1.lock().events, vec![1, 3, 6]);
        assert_eq!(rec2.lock().events, vec![3]);
    }

    #[test]
    fn test_disposal_stops_scan_output() {
        let relay = Relay::new();
        let summed = running_sum(&relay.stream());
        let (recorder, record) = Recorder::new();
        let sub = summed.subscribe(recorder);

        relay.push(1);
        sub.dispose();
        relay.push(2);

        assert_eq!(record.lock().events, vec![1]);
        assert_eq!(relay.subscriber_count(), 0);
    }
}
