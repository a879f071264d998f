// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Multicast hub: fan-out with variant-specific caching and latching of
//! terminals.
//!
//! A hub is three things at once: a subject surface (`next` / `error` /
//! `complete` callable directly), a subscriber adapter for plugging into an
//! upstream (see [`Connectable`]), and a stream factory for the downstream
//! side.
//!
//! Broadcast iterates a *snapshot* of the registry taken at the start of
//! the signal: subscribers added mid-broadcast see items only from the next
//! item onward, and subscribers removed mid-broadcast receive nothing
//! further within that broadcast.
//!
//! [`Connectable`]: super::Connectable

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::core::RingBuffer;
use crate::error::StreamError;
use crate::stream::stream::StreamCore;
use crate::stream::subscriber::{share_subscriber, CancelSource};
use crate::stream::{
    BoxSubscriber, SharedSubscriber, Stream, Subscriber, Subscription, Terminal,
};

/// Which fan-out flavor a hub is. The caching behavior is the only
/// difference between them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HubKind {
    /// Items broadcast as-is; late subscribers after a terminal receive
    /// just that terminal.
    Subject,
    /// Ring buffer of the last n items; new subscribers catch up first.
    Replay,
    /// Replay of 1, seeded with an initial value at construction.
    Behavior,
    /// Holds only the last item; emits it ONLY on complete.
    Async,
}

enum HubCache<T> {
    None,
    Replay(RingBuffer<T>, usize),
    Last(Option<T>),
}

struct HubState<T> {
    kind: HubKind,
    cache: HubCache<T>,
    subscribers: Vec<(u64, SharedSubscriber<T>)>,
    terminal: Option<Terminal>,
    next_id: u64,
    upstream: Option<Subscription>,
}

/// See the [module docs](self). Cheap to clone; clones share the registry
/// and cache.
pub struct Hub<T: Clone + 'static> {
    state: Rc<RefCell<HubState<T>>>,
}

impl<T: Clone + 'static> Clone for Hub<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: Clone + 'static> std::fmt::Debug for Hub<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Hub")
            .field("kind", &state.kind)
            .field("subscribers", &state.subscribers.len())
            .field("terminal", &state.terminal.is_some())
            .finish()
    }
}

impl<T: Clone + 'static> Hub<T> {
    fn with_cache(kind: HubKind, cache: HubCache<T>) -> Self {
        Self {
            state: Rc::new(RefCell::new(HubState {
                kind,
                cache,
                subscribers: Vec::new(),
                terminal: None,
                next_id: 0,
                upstream: None,
            })),
        }
    }

    /// Plain subject: no caching.
    #[must_use]
    pub fn subject() -> Self { Self::with_cache(HubKind::Subject, HubCache::None) }

    /// Replays the last `capacity` items to every new subscriber.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn replay(capacity: usize) -> Self {
        Self::with_cache(
            HubKind::Replay,
            HubCache::Replay(RingBuffer::with_capacity(capacity), capacity),
        )
    }

    /// Replay of 1, pre-seeded with `initial`.
    #[must_use]
    pub fn behavior(initial: T) -> Self {
        let mut buffer = RingBuffer::with_capacity(1);
        buffer.add(initial);
        Self::with_cache(HubKind::Behavior, HubCache::Replay(buffer, 1))
    }

    /// Remembers only the last item and emits it on complete.
    #[must_use]
    pub fn async_last() -> Self {
        Self::with_cache(HubKind::Async, HubCache::Last(None))
    }

    /// Broadcast an item to the current subscribers, in registration order.
    /// After a terminal this is a tolerated protocol violation.
    pub fn next(&self, item: T) {
        let (kind, snapshot) = {
            let mut state = self.state.borrow_mut();
            if state.terminal.is_some() {
                tracing::warn!("hub.next() after terminal; item dropped");
                return;
            }
            match &mut state.cache {
                HubCache::Replay(buffer, capacity) => {
                    if buffer.len() == *capacity {
                        buffer.pop();
                    }
                    buffer.add(item.clone());
                }
                HubCache::Last(slot) => *slot = Some(item.clone()),
                HubCache::None => {}
            }
            (state.kind, state.subscribers.clone())
        };
        if kind == HubKind::Async {
            // Items are held back until complete.
            return;
        }
        for (id, subscriber) in snapshot {
            if self.is_registered(id) {
                self.deliver(&subscriber, |s| s.on_item(item.clone()));
            }
        }
    }

    /// Broadcast and latch completion. Async hubs flush their held item
    /// first.
    pub fn complete(&self) {
        let (flushed, snapshot) = {
            let mut state = self.state.borrow_mut();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(Terminal::Complete);
            state.upstream.take();
            let flushed = match &mut state.cache {
                HubCache::Last(slot) => slot.clone(),
                _ => None,
            };
            (flushed, state.subscribers.clone())
        };
        for (id, subscriber) in snapshot {
            if !self.is_registered(id) {
                continue;
            }
            if let Some(item) = &flushed {
                self.deliver(&subscriber, |s| s.on_item(item.clone()));
                if !self.is_registered(id) {
                    continue;
                }
            }
            self.deliver(&subscriber, |s| s.on_complete());
        }
        self.state.borrow_mut().subscribers.clear();
    }

    /// Broadcast and latch an error. Async hubs drop their held item.
    pub fn error(&self, error: StreamError) {
        let snapshot = {
            let mut state = self.state.borrow_mut();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(Terminal::Error(error.clone()));
            state.upstream.take();
            state.subscribers.clone()
        };
        for (id, subscriber) in snapshot {
            if self.is_registered(id) {
                self.deliver(&subscriber, |s| s.on_error(error.clone()));
            }
        }
        self.state.borrow_mut().subscribers.clear();
    }

    /// The downstream side: a stream that registers its subscriber with
    /// this hub.
    #[must_use]
    pub fn stream(&self) -> Stream<T> {
        Stream::from_core("hub", HubStreamCore { hub: self.clone() })
    }

    /// The upstream side: a subscriber adapter that forwards every signal
    /// into this hub. Its subscription is retained for [`disconnect`].
    ///
    /// [`disconnect`]: super::Connectable::disconnect
    #[must_use]
    pub(crate) fn upstream_adapter(&self) -> HubUpstreamAdapter<T> {
        HubUpstreamAdapter { hub: self.clone() }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state.borrow().upstream.is_some()
    }

    pub(crate) fn disconnect_upstream(&self) {
        let upstream = self.state.borrow_mut().upstream.take();
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize { self.state.borrow().subscribers.len() }

    #[must_use]
    pub fn is_terminated(&self) -> bool { self.state.borrow().terminal.is_some() }

    fn is_registered(&self, id: u64) -> bool {
        self.state
            .borrow()
            .subscribers
            .iter()
            .any(|(registered, _)| *registered == id)
    }

    fn unregister(&self, id: u64) {
        self.state
            .borrow_mut()
            .subscribers
            .retain(|(registered, _)| *registered != id);
    }

    /// Deliver one signal outside of any state borrow. A feedback loop that
    /// re-enters the subscriber currently being delivered to is dropped
    /// rather than allowed to alias.
    fn deliver(
        &self,
        subscriber: &SharedSubscriber<T>,
        signal: impl FnOnce(&mut BoxSubscriber<T>),
    ) {
        match subscriber.try_borrow_mut() {
            Ok(mut subscriber) => signal(&mut *subscriber),
            Err(_) => {
                tracing::warn!("re-entrant hub delivery to a busy subscriber dropped");
            }
        }
    }
}

// ┌─────────────────────────────────────────────┐
// │ Downstream registration                     │
// └─────────────────────────────────────────────┘

struct HubStreamCore<T: Clone + 'static> {
    hub: Hub<T>,
}

impl<T: Clone + 'static> StreamCore<T> for HubStreamCore<T> {
    fn subscribe_core(&self, downstream: BoxSubscriber<T>) {
        let hub = self.hub.clone();
        let shared = share_subscriber(downstream);

        let (id, latched) = {
            let mut state = hub.state.borrow_mut();
            let id = state.next_id;
            state.next_id += 1;
            state.subscribers.push((id, Rc::clone(&shared)));
            (id, state.terminal.clone())
        };
        let subscription = Subscription::from_cancel_source(Rc::new(HubSubscription {
            hub: hub.clone(),
            id,
            cancelled: Cell::new(false),
        }));
        shared.borrow_mut().on_subscribe(subscription);

        // Catch-up, per hub variant. The subscriber may cancel mid-way.
        let replayable: Vec<T> = {
            let state = hub.state.borrow();
            match (&state.cache, state.kind) {
                (HubCache::Replay(buffer, _), _) => buffer.iter().cloned().collect(),
                (HubCache::Last(slot), HubKind::Async)
                    if matches!(latched, Some(Terminal::Complete)) =>
                {
                    slot.clone().into_iter().collect()
                }
                _ => Vec::new(),
            }
        };
        for item in replayable {
            if !hub.is_registered(id) {
                return;
            }
            shared.borrow_mut().on_item(item);
        }
        if let Some(terminal) = latched {
            if !hub.is_registered(id) {
                return;
            }
            hub.unregister(id);
            match terminal {
                Terminal::Complete => shared.borrow_mut().on_complete(),
                Terminal::Error(error) => shared.borrow_mut().on_error(error),
            }
        }
    }
}

struct HubSubscription<T: Clone + 'static> {
    hub: Hub<T>,
    id: u64,
    cancelled: Cell<bool>,
}

impl<T: Clone + 'static> CancelSource for HubSubscription<T> {
    fn cancel(&self) {
        if self.cancelled.replace(true) {
            return;
        }
        self.hub.unregister(self.id);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.get() || !self.hub.is_registered(self.id)
    }
}

// ┌─────────────────────────────────────────────┐
// │ Upstream adapter                            │
// └─────────────────────────────────────────────┘

pub(crate) struct HubUpstreamAdapter<T: Clone + 'static> {
    hub: Hub<T>,
}

impl<T: Clone + 'static> Subscriber<T> for HubUpstreamAdapter<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.hub.state.borrow_mut().upstream = Some(subscription);
    }

    fn on_item(&mut self, item: T) { self.hub.next(item); }

    fn on_error(&mut self, error: StreamError) { self.hub.error(error); }

    fn on_complete(&mut self) { self.hub.complete(); }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::RecordingSubscriber;

    #[test]
    fn test_subject_fans_out_from_subscription_onwards() {
        let hub: Hub<i32> = Hub::subject();
        let (first, first_trace) = RecordingSubscriber::new();
        hub.stream().subscribe(first);

        hub.next(1);
        hub.next(2);

        let (second, second_trace) = RecordingSubscriber::new();
        hub.stream().subscribe(second);
        hub.next(3);

        assert_eq!(first_trace.items(), vec![1, 2, 3]);
        assert_eq!(second_trace.items(), vec![3]);
    }

    #[test]
    fn test_subject_latches_terminal_for_late_subscribers() {
        let hub: Hub<i32> = Hub::subject();
        hub.next(1);
        hub.complete();

        let (late, late_trace) = RecordingSubscriber::new();
        hub.stream().subscribe(late);
        assert!(late_trace.completed());
        assert!(late_trace.items().is_empty());
    }

    #[test]
    fn test_replay_catches_up_new_subscribers() {
        let hub: Hub<i32> = Hub::replay(2);
        hub.next(1);
        hub.next(2);
        hub.next(3);

        let (subscriber, trace) = RecordingSubscriber::new();
        hub.stream().subscribe(subscriber);
        assert_eq!(trace.items(), vec![2, 3]);

        hub.complete();
        let (late, late_trace) = RecordingSubscriber::new();
        hub.stream().subscribe(late);
        assert_eq!(late_trace.items(), vec![2, 3]);
        assert!(late_trace.completed());
    }

    #[test]
    fn test_behavior_seeds_the_first_subscriber() {
        let hub = Hub::behavior(0);
        let (subscriber, trace) = RecordingSubscriber::new();
        hub.stream().subscribe(subscriber);
        hub.next(1);
        assert_eq!(trace.items(), vec![0, 1]);

        let (second, second_trace) = RecordingSubscriber::new();
        hub.stream().subscribe(second);
        assert_eq!(second_trace.items(), vec![1]);
    }

    #[test]
    fn test_async_hub_emits_only_the_last_item_on_complete() {
        let hub: Hub<i32> = Hub::async_last();
        let (subscriber, trace) = RecordingSubscriber::new();
        hub.stream().subscribe(subscriber);

        hub.next(1);
        hub.next(2);
        assert!(trace.items().is_empty());

        hub.complete();
        assert_eq!(trace.items(), vec![2]);
        assert!(trace.completed());
    }

    #[test]
    fn test_async_hub_drops_the_item_on_error() {
        let hub: Hub<i32> = Hub::async_last();
        let (subscriber, trace) = RecordingSubscriber::new();
        hub.stream().subscribe(subscriber);
        hub.next(1);
        hub.error(StreamError::msg("boom"));
        assert!(trace.items().is_empty());
        assert_eq!(trace.error(), Some("boom".into()));
    }

    #[test]
    fn test_broadcast_order_is_registration_order() {
        let hub: Hub<i32> = Hub::subject();
        let order = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));

        for label in ["a", "b"] {
            let order_clone = std::rc::Rc::clone(&order);
            hub.stream()
                .subscribe_fn(move |item| order_clone.borrow_mut().push((label, item)));
        }
        hub.next(7);
        assert_eq!(*order.borrow(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_subscriber_added_during_broadcast_sees_only_later_items() {
        let hub: Hub<i32> = Hub::subject();
        let (late_trace_slot, late_slot_clone) = {
            let slot = std::rc::Rc::new(std::cell::RefCell::new(None));
            (std::rc::Rc::clone(&slot), slot)
        };

        let hub_clone = hub.clone();
        hub.stream().subscribe_fn(move |item| {
            if item == 1 {
                let (late, late_trace) = RecordingSubscriber::new();
                hub_clone.stream().subscribe(late);
                *late_slot_clone.borrow_mut() = Some(late_trace);
            }
        });

        hub.next(1);
        hub.next(2);

        let late_trace = late_trace_slot.borrow().clone().unwrap();
        assert_eq!(late_trace.items(), vec![2]);
    }

    #[test]
    fn test_subscriber_removed_during_broadcast_is_skipped_immediately() {
        let hub: Hub<i32> = Hub::subject();

        // First subscriber cancels the second one mid-broadcast.
        let (second, second_trace, second_subscription) =
            RecordingSubscriber::with_subscription_slot();

        let subscription_clone = std::rc::Rc::clone(&second_subscription);
        hub.stream().subscribe_fn(move |_item| {
            if let Some(subscription) = subscription_clone.borrow().as_ref() {
                subscription.cancel();
            }
        });
        hub.stream().subscribe(second);

        hub.next(1);
        assert!(second_trace.items().is_empty());
    }

    #[test]
    fn test_next_after_terminal_is_dropped() {
        let hub: Hub<i32> = Hub::subject();
        let (subscriber, trace) = RecordingSubscriber::new();
        hub.stream().subscribe(subscriber);
        hub.complete();
        hub.next(1);
        assert!(trace.items().is_empty());
        assert!(trace.completed());
    }
}
