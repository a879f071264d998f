// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Connectable streams: multicast with an explicit (or reference-counted)
//! upstream subscription.

use std::cell::Cell;
use std::rc::Rc;

use super::Hub;
use crate::error::StreamError;
use crate::stream::stream::StreamCore;
use crate::stream::subscriber::CancelSource;
use crate::stream::{BoxSubscriber, Stream, Subscriber, Subscription};

/// Wraps a source and a hub. Nothing flows until [`connect`] subscribes the
/// hub to the source; [`disconnect`] cancels that subscription.
///
/// [`connect`]: Self::connect
/// [`disconnect`]: Self::disconnect
pub struct Connectable<T: Clone + 'static> {
    source: Stream<T>,
    hub: Hub<T>,
}

impl<T: Clone + 'static> Clone for Connectable<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            hub: self.hub.clone(),
        }
    }
}

impl<T: Clone + 'static> std::fmt::Debug for Connectable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connectable")
            .field("connected", &self.hub.is_connected())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + 'static> Connectable<T> {
    pub(crate) fn new(source: Stream<T>, hub: Hub<T>) -> Self {
        Self { source, hub }
    }

    /// Subscribe the hub to the source. Idempotent while connected.
    pub fn connect(&self) {
        if self.hub.is_connected() || self.hub.is_terminated() {
            return;
        }
        self.source.subscribe_raw(Box::new(self.hub.upstream_adapter()));
    }

    /// Cancel the upstream subscription. Downstream subscribers stay
    /// registered and resume on the next [`connect`].
    ///
    /// [`connect`]: Self::connect
    pub fn disconnect(&self) { self.hub.disconnect_upstream(); }

    #[must_use]
    pub fn is_connected(&self) -> bool { self.hub.is_connected() }

    /// The multicast downstream side.
    #[must_use]
    pub fn stream(&self) -> Stream<T> { self.hub.stream() }

    /// Auto-connect on the first downstream subscriber and disconnect on
    /// the last. While the downstream count is zero, no upstream
    /// subscription exists.
    #[must_use]
    pub fn ref_count(&self) -> Stream<T> {
        Stream::from_core(
            "ref_count",
            RefCountStream {
                connectable: self.clone(),
                active: Rc::new(Cell::new(0)),
            },
        )
    }
}

// ┌─────────────────────────────────────────────┐
// │ ref_count                                   │
// └─────────────────────────────────────────────┘

struct RefCountStream<T: Clone + 'static> {
    connectable: Connectable<T>,
    active: Rc<Cell<usize>>,
}

impl<T: Clone + 'static> StreamCore<T> for RefCountStream<T> {
    fn subscribe_core(&self, downstream: BoxSubscriber<T>) {
        let shared = RefCountShared {
            connectable: self.connectable.clone(),
            active: Rc::clone(&self.active),
        };
        // Register with the hub first, so a source that emits synchronously
        // on connect is not missed, then bump the count and maybe connect.
        self.connectable.stream().subscribe_raw(Box::new(RefCountSubscriber {
            downstream,
            shared: shared.clone(),
            released: Rc::new(Cell::new(false)),
        }));
        shared.acquire();
    }
}

#[derive(Clone)]
struct RefCountShared<T: Clone + 'static> {
    connectable: Connectable<T>,
    active: Rc<Cell<usize>>,
}

impl<T: Clone + 'static> RefCountShared<T> {
    fn acquire(&self) {
        let count = self.active.get() + 1;
        self.active.set(count);
        if count == 1 {
            self.connectable.connect();
        }
    }

    fn release(&self) {
        let count = self.active.get().saturating_sub(1);
        self.active.set(count);
        if count == 0 {
            self.connectable.disconnect();
        }
    }
}

struct RefCountSubscriber<T: Clone + 'static> {
    downstream: BoxSubscriber<T>,
    shared: RefCountShared<T>,
    /// Set once this subscriber gave its count back (terminal or cancel).
    released: Rc<Cell<bool>>,
}

impl<T: Clone + 'static> Subscriber<T> for RefCountSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.downstream
            .on_subscribe(Subscription::from_cancel_source(Rc::new(
                RefCountSubscription {
                    inner: subscription,
                    shared: self.shared.clone(),
                    released: Rc::clone(&self.released),
                },
            )));
    }

    fn on_item(&mut self, item: T) { self.downstream.on_item(item); }

    fn on_error(&mut self, error: StreamError) {
        self.downstream.on_error(error);
        if !self.released.replace(true) {
            self.shared.release();
        }
    }

    fn on_complete(&mut self) {
        self.downstream.on_complete();
        if !self.released.replace(true) {
            self.shared.release();
        }
    }
}

struct RefCountSubscription<T: Clone + 'static> {
    inner: Subscription,
    shared: RefCountShared<T>,
    released: Rc<Cell<bool>>,
}

impl<T: Clone + 'static> CancelSource for RefCountSubscription<T> {
    fn cancel(&self) {
        self.inner.cancel();
        if !self.released.replace(true) {
            self.shared.release();
        }
    }

    fn is_cancelled(&self) -> bool { self.inner.is_cancelled() }
}

// ┌─────────────────────────────────────────────┐
// │ Fluent surface                              │
// └─────────────────────────────────────────────┘

impl<T: Clone + 'static> Stream<T> {
    /// Multicast through a plain subject; flow starts on `connect()`.
    #[must_use]
    pub fn publish(&self) -> Connectable<T> {
        Connectable::new(self.clone(), Hub::subject())
    }

    /// Multicast through a replay hub of the given capacity.
    #[must_use]
    pub fn publish_replay(&self, capacity: usize) -> Connectable<T> {
        Connectable::new(self.clone(), Hub::replay(capacity))
    }

    /// `publish().ref_count()`: connect while anyone is subscribed.
    #[must_use]
    pub fn share(&self) -> Stream<T> { self.publish().ref_count() }
}
