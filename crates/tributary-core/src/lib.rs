//! # Tributary
//!
//! Push-based stream combinators: stateful running aggregation over
//! unbounded event streams, and join-pattern synchronization that
//! combines several independently-delivered streams into one joint
//! event per round.
//!
//! ## Architecture
//!
//! - [`stream`] — the push contract: [`EventStream`], [`Subscriber`],
//!   [`Subscription`], and the per-subscription delivery gate.
//! - [`broadcast`] — multicast fan-out: [`Relay`] for manual push-in
//!   sources, [`ConnectableStream`] for attach-first / connect-once
//!   sharing of one upstream.
//! - [`scan`] — running-fold operators: sum, count, average, min, max,
//!   distinct-set, and the generic primitives they instantiate.
//! - [`join`] — the join-pattern engine: declare participants with
//!   [`and`], bind a projection with [`Pattern::then`], activate with
//!   [`when`].
//! - [`schedule`] — explicit scheduling of subscription activation.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tributary_core::{and, scan, when, EventStream};
//!
//! let source = EventStream::from_iter(1..=10_i64).map(|x| x as f64);
//! let shared = source.publish();
//! let raw = shared.stream();
//!
//! let sum = scan::running_sum(&raw);
//! let count = scan::running_count(&raw).map(|c| c as f64);
//! let avg = scan::running_average(&raw);
//!
//! let stats = raw
//!     .and(&sum)
//!     .and(&count)
//!     .and(&avg)
//!     .then(|v| Ok((v[0], v[1], v[2], v[3])));
//!
//! let subscription = when(vec![stats])
//!     .subscribe_all(|row| println!("{row:?}"), || (), |e| eprintln!("{e}"));
//!
//! let connection = shared.connect();
//! // ... later: disposal is the only cancellation mechanism.
//! subscription.dispose();
//! connection.dispose();
//! ```
//!
//! Queues inside the join engine are unbounded and nothing in the core
//! blocks, sleeps, or retries; failure anywhere is fail-fast and the
//! nearest external consumer decides whether to rebuild the pipeline.

pub mod broadcast;
pub mod join;
pub mod scan;
pub mod schedule;
pub mod stream;

pub use broadcast::{ConnectableStream, Relay};
pub use join::{and, when, when_with, JoinConfig, Pattern, Plan};
pub use scan::Numeric;
pub use schedule::{CallerScheduler, Scheduler, ThreadScheduler};
pub use stream::{EventStream, SinkHandle, StreamError, StreamSource, Subscriber, Subscription};
