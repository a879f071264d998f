// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The subscription protocol: the contract every stage (source, operator,
//! sink) obeys.
//!
//! Signals flow downstream (`on_subscribe`, then items, then at most one
//! terminal); cancellation flows upstream through [`Subscription`] handles.
//! Every operator subscription composes a small shared record — a
//! [`SubscriptionCore`] — holding the done flag and the upstream handle, so
//! that a cancel arriving re-entrantly (from user code running inside an
//! `on_item`) is observed at the next item boundary.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::StreamError;

/// A consumer of the four lifecycle signals.
///
/// Invariants the engine preserves (and the validator asserts):
/// - `on_subscribe` is delivered exactly once, strictly before any other
///   signal.
/// - `on_error` and `on_complete` are terminal and mutually exclusive; at
///   most one occurs.
/// - After a terminal signal, or after the subscription's `cancel` returns,
///   no further signal is observed.
pub trait Subscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription);
    fn on_item(&mut self, item: T);
    fn on_error(&mut self, error: StreamError);
    fn on_complete(&mut self);
}

pub type BoxSubscriber<T> = Box<dyn Subscriber<T>>;

/// Subscribers that must be reachable from a scheduled task body (hubs,
/// timer-driven operators) are shared behind an `Rc<RefCell>`.
pub type SharedSubscriber<T> = Rc<RefCell<BoxSubscriber<T>>>;

pub(crate) fn share_subscriber<T>(subscriber: BoxSubscriber<T>) -> SharedSubscriber<T> {
    Rc::new(RefCell::new(subscriber))
}

/// Which terminal signal a stage observed. Hubs latch this.
#[derive(Clone, Debug, PartialEq)]
pub enum Terminal {
    Complete,
    Error(StreamError),
}

/// The cancel side of a subscription, as seen by the engine. Implementors
/// must make `cancel` idempotent and must never call back into downstream
/// subscribers from it.
pub(crate) trait CancelSource {
    fn cancel(&self);
    fn is_cancelled(&self) -> bool;
}

/// The handle owned by a downstream subscriber granting the ability to
/// cancel. Cancellation is synchronous, idempotent, and propagates
/// upstream.
#[derive(Clone)]
pub struct Subscription {
    inner: Rc<dyn CancelSource>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.inner.is_cancelled())
            .finish()
    }
}

impl Subscription {
    pub(crate) fn from_cancel_source(inner: Rc<dyn CancelSource>) -> Self {
        Self { inner }
    }

    /// Wrap a scheduler timer so it can sit in an upstream slot: cancelling
    /// the subscription disarms the timer.
    pub(crate) fn from_timer(handle: crate::sched::TimerHandle) -> Self {
        Self::from_cancel_source(Rc::new(handle))
    }

    pub fn cancel(&self) { self.inner.cancel(); }

    /// True once cancelled *or* once the stage reached a terminal signal.
    #[must_use]
    pub fn is_cancelled(&self) -> bool { self.inner.is_cancelled() }
}

impl CancelSource for crate::sched::TimerHandle {
    fn cancel(&self) { Self::cancel(self); }

    fn is_cancelled(&self) -> bool { Self::is_cancelled(self) }
}

struct CoreInner {
    done: Cell<bool>,
    upstream: RefCell<Option<Subscription>>,
}

impl CancelSource for CoreInner {
    fn cancel(&self) {
        if self.done.replace(true) {
            return;
        }
        let upstream = self.upstream.borrow_mut().take();
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }

    fn is_cancelled(&self) -> bool { self.done.get() }
}

/// The shared per-stage state record: a done flag plus the upstream handle.
/// Cloning shares the record.
#[derive(Clone)]
pub struct SubscriptionCore {
    inner: Rc<CoreInner>,
}

impl std::fmt::Debug for SubscriptionCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionCore")
            .field("done", &self.inner.done.get())
            .finish()
    }
}

impl Default for SubscriptionCore {
    fn default() -> Self { Self::new() }
}

impl SubscriptionCore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(CoreInner {
                done: Cell::new(false),
                upstream: RefCell::new(None),
            }),
        }
    }

    /// True after cancel *or* after this stage delivered its terminal.
    /// Emitters must check this before every delivery.
    #[must_use]
    pub fn is_done(&self) -> bool { self.inner.done.get() }

    /// Terminal reached naturally: mark done and release the upstream
    /// handle *without* cancelling it.
    pub fn mark_done(&self) {
        self.inner.done.set(true);
        self.inner.upstream.borrow_mut().take();
    }

    /// Cancel: mark done and propagate the cancel upstream.
    pub fn cancel(&self) { self.inner.cancel(); }

    /// Record (or swap, for upstream-replacing operators) the upstream
    /// handle. A handle attached after this stage is already done is
    /// cancelled immediately.
    pub fn attach_upstream(&self, upstream: Subscription) {
        if self.is_done() {
            upstream.cancel();
            return;
        }
        *self.inner.upstream.borrow_mut() = Some(upstream);
    }

    /// A cancel handle for handing downstream.
    #[must_use]
    pub fn subscription(&self) -> Subscription {
        Subscription::from_cancel_source(Rc::clone(&self.inner) as Rc<dyn CancelSource>)
    }
}

/// The default terminal sink built by [`Stream::subscribe_fn`]: forwards
/// items to a callback and errors to the log.
///
/// [`Stream::subscribe_fn`]: crate::stream::Stream::subscribe_fn
pub(crate) struct FnSubscriber<T, F: FnMut(T)> {
    pub item_fn: F,
    pub subscription: Option<Subscription>,
    pub _marker: std::marker::PhantomData<fn(T)>,
}

impl<T, F: FnMut(T)> Subscriber<T> for FnSubscriber<T, F> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.subscription = Some(subscription);
    }

    fn on_item(&mut self, item: T) { (self.item_fn)(item); }

    fn on_error(&mut self, error: StreamError) {
        tracing::error!(%error, "stream terminated with an unhandled error");
    }

    fn on_complete(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_idempotent_and_observable() {
        let core = SubscriptionCore::new();
        let subscription = core.subscription();
        assert!(!subscription.is_cancelled());
        subscription.cancel();
        subscription.cancel();
        assert!(subscription.is_cancelled());
        assert!(core.is_done());
    }

    #[test]
    fn test_cancel_propagates_upstream() {
        let upstream_core = SubscriptionCore::new();
        let downstream_core = SubscriptionCore::new();
        downstream_core.attach_upstream(upstream_core.subscription());

        downstream_core.subscription().cancel();
        assert!(upstream_core.is_done());
    }

    #[test]
    fn test_mark_done_does_not_cancel_upstream() {
        let upstream_core = SubscriptionCore::new();
        let downstream_core = SubscriptionCore::new();
        downstream_core.attach_upstream(upstream_core.subscription());

        downstream_core.mark_done();
        assert!(downstream_core.is_done());
        assert!(!upstream_core.is_done());
    }

    #[test]
    fn test_attach_upstream_after_done_cancels_the_late_upstream() {
        let late_upstream = SubscriptionCore::new();
        let core = SubscriptionCore::new();
        core.cancel();
        core.attach_upstream(late_upstream.subscription());
        assert!(late_upstream.is_done());
    }
}
