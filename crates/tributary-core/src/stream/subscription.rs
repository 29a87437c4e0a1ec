//! Disposal handles.
//!
//! A [`Subscription`] is the only cancellation mechanism in the library:
//! disposing it detaches the observer from its upstream and releases any
//! state the subscription owned. Disposal is idempotent and safe to call
//! from any thread, including from inside a delivery on the same
//! subscription.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

type Teardown = Box<dyn FnOnce() + Send>;

struct SubscriptionInner {
    disposed: AtomicBool,
    teardown: Mutex<Option<Teardown>>,
}

/// Handle to an active subscription.
///
/// Cloning shares the same underlying subscription; the teardown runs at
/// most once no matter how many clones call [`dispose`](Self::dispose).
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    /// Creates a subscription that runs `teardown` on first disposal.
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                disposed: AtomicBool::new(false),
                teardown: Mutex::new(Some(Box::new(teardown))),
            }),
        }
    }

    /// A subscription with nothing to release.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                disposed: AtomicBool::new(false),
                teardown: Mutex::new(None),
            }),
        }
    }

    /// Groups several subscriptions behind one handle; disposing the
    /// group disposes every member.
    #[must_use]
    pub fn merge(subscriptions: Vec<Subscription>) -> Self {
        Self::new(move || {
            for sub in &subscriptions {
                sub.dispose();
            }
        })
    }

    /// Detaches the subscription and releases held resources.
    ///
    /// Idempotent: the second and later calls are no-ops.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let teardown = self.inner.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    /// Returns true once [`dispose`](Self::dispose) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

struct LinkState {
    disposed: AtomicBool,
    slot: Mutex<Option<Subscription>>,
}

/// Deferred subscription link.
///
/// Hands out a [`Subscription`] before the real upstream subscription
/// exists. If the handle is disposed first, the upstream subscription is
/// disposed the moment it is linked. Used by `subscribe_on` (activation
/// runs on a scheduler) and by operators that must detach their own
/// upstream from inside a delivery.
#[derive(Clone)]
pub(crate) struct SubscriptionLink {
    state: Arc<LinkState>,
}

impl SubscriptionLink {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(LinkState {
                disposed: AtomicBool::new(false),
                slot: Mutex::new(None),
            }),
        }
    }

    /// Stores the real subscription, or disposes it immediately if the
    /// handle was already disposed.
    pub(crate) fn link(&self, subscription: Subscription) {
        let mut slot = self.state.slot.lock();
        if self.state.disposed.load(Ordering::Acquire) {
            drop(slot);
            subscription.dispose();
        } else {
            *slot = Some(subscription);
        }
    }

    /// Disposes the linked subscription now, or marks the link so a later
    /// [`link`](Self::link) disposes immediately.
    pub(crate) fn dispose(&self) {
        let linked = {
            let mut slot = self.state.slot.lock();
            self.state.disposed.store(true, Ordering::Release);
            slot.take()
        };
        if let Some(sub) = linked {
            sub.dispose();
        }
    }

    /// A `Subscription` facade over this link.
    pub(crate) fn handle(&self) -> Subscription {
        let link = self.clone();
        Subscription::new(move || link.dispose())
    }
}
