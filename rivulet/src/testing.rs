// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Test fixtures: a subscriber that records the full signal trace, for
//! asserting the subscription protocol in operator tests.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::StreamError;
use crate::stream::{Subscriber, Subscription};

/// One observed lifecycle signal. Errors are recorded by rendering so that
/// traces stay `PartialEq`.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedSignal<T> {
    Subscribe,
    Item(T),
    Error(String),
    Complete,
}

/// Shared view of everything a [`RecordingSubscriber`] observed.
#[derive(Clone, Debug)]
pub struct SignalTrace<T> {
    signals: Rc<RefCell<Vec<RecordedSignal<T>>>>,
}

impl<T: Clone> SignalTrace<T> {
    #[must_use]
    pub fn signals(&self) -> Vec<RecordedSignal<T>> { self.signals.borrow().clone() }

    /// Just the items, in delivery order.
    #[must_use]
    pub fn items(&self) -> Vec<T> {
        self.signals
            .borrow()
            .iter()
            .filter_map(|signal| match signal {
                RecordedSignal::Item(item) => Some(item.clone()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn completed(&self) -> bool {
        self.signals
            .borrow()
            .iter()
            .any(|signal| matches!(signal, RecordedSignal::Complete))
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.signals.borrow().iter().find_map(|signal| match signal {
            RecordedSignal::Error(message) => Some(message.clone()),
            _ => None,
        })
    }

    #[must_use]
    pub fn subscribe_count(&self) -> usize {
        self.signals
            .borrow()
            .iter()
            .filter(|signal| matches!(signal, RecordedSignal::Subscribe))
            .count()
    }
}

/// Records every signal it receives. Optionally cancels its subscription
/// after a fixed number of items, to probe re-entrant cancellation.
pub struct RecordingSubscriber<T> {
    signals: Rc<RefCell<Vec<RecordedSignal<T>>>>,
    subscription: Rc<RefCell<Option<Subscription>>>,
    cancel_after_items: Option<usize>,
    items_seen: usize,
}

impl<T> std::fmt::Debug for RecordingSubscriber<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSubscriber")
            .field("items_seen", &self.items_seen)
            .finish_non_exhaustive()
    }
}

impl<T> RecordingSubscriber<T> {
    #[must_use]
    pub fn new() -> (Self, SignalTrace<T>) {
        let (subscriber, trace, _subscription) = Self::with_subscription_slot();
        (subscriber, trace)
    }

    /// Also returns a slot through which the test can reach the live
    /// [`Subscription`] (eg: to cancel from outside).
    #[must_use]
    pub fn with_subscription_slot(
    ) -> (Self, SignalTrace<T>, Rc<RefCell<Option<Subscription>>>) {
        let signals = Rc::new(RefCell::new(Vec::new()));
        let subscription = Rc::new(RefCell::new(None));
        (
            Self {
                signals: Rc::clone(&signals),
                subscription: Rc::clone(&subscription),
                cancel_after_items: None,
                items_seen: 0,
            },
            SignalTrace { signals },
            subscription,
        )
    }

    /// A subscriber that cancels itself from inside `on_item` once it has
    /// seen `count` items.
    #[must_use]
    pub fn cancelling_after(count: usize) -> (Self, SignalTrace<T>) {
        let (mut subscriber, trace) = Self::new();
        subscriber.cancel_after_items = Some(count);
        (subscriber, trace)
    }
}

impl<T> Subscriber<T> for RecordingSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.signals.borrow_mut().push(RecordedSignal::Subscribe);
        *self.subscription.borrow_mut() = Some(subscription);
    }

    fn on_item(&mut self, item: T) {
        self.signals.borrow_mut().push(RecordedSignal::Item(item));
        self.items_seen += 1;
        if Some(self.items_seen) == self.cancel_after_items {
            if let Some(subscription) = self.subscription.borrow().as_ref() {
                subscription.cancel();
            }
        }
    }

    fn on_error(&mut self, error: StreamError) {
        self.signals
            .borrow_mut()
            .push(RecordedSignal::Error(error.to_string()));
    }

    fn on_complete(&mut self) {
        self.signals.borrow_mut().push(RecordedSignal::Complete);
    }
}
