// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Asynchronous boundaries between operator stages: `observe_on` re-delivers
//! every signal from a task on the target unit; `subscribe_on` establishes
//! the upstream subscription from a task on the target unit.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::ContinuationSubscriber;
use crate::error::StreamError;
use crate::sched::{Task, TaskPriority, Unit};
use crate::stream::stream::StreamCore;
use crate::stream::subscriber::{share_subscriber, CancelSource};
use crate::stream::{
    BoxSubscriber, SharedSubscriber, Stream, Subscriber, Subscription,
    SubscriptionCore,
};

// ┌─────────────────────────────────────────────┐
// │ observe_on                                  │
// └─────────────────────────────────────────────┘

pub(crate) struct ObserveOnStream<T: 'static> {
    upstream: Stream<T>,
    unit: Unit,
}

struct ObserveOnState {
    done: Cell<bool>,
    upstream: RefCell<Option<Subscription>>,
}

impl CancelSource for ObserveOnState {
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

impl<T: 'static> StreamCore<T> for ObserveOnStream<T> {
    fn subscribe_core(&self, downstream: BoxSubscriber<T>) {
        let state = Rc::new(ObserveOnState {
            done: Cell::new(false),
            upstream: RefCell::new(None),
        });
        let downstream = share_subscriber(downstream);
        downstream.borrow_mut().on_subscribe(Subscription::from_cancel_source(
            Rc::clone(&state) as Rc<dyn CancelSource>,
        ));
        self.upstream.subscribe_raw(Box::new(ObserveOnSubscriber {
            state,
            downstream,
            unit: self.unit.clone(),
        }));
    }
}

/// Signals hop the unit boundary in queue order, so relative ordering is
/// preserved. Queued signals become no-ops once the subscription is done.
struct ObserveOnSubscriber<T: 'static> {
    state: Rc<ObserveOnState>,
    downstream: SharedSubscriber<T>,
    unit: Unit,
}

impl<T: 'static> Subscriber<T> for ObserveOnSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        if self.state.done.get() {
            subscription.cancel();
            return;
        }
        *self.state.upstream.borrow_mut() = Some(subscription);
    }

    fn on_item(&mut self, item: T) {
        if self.state.done.get() {
            return;
        }
        let state = Rc::clone(&self.state);
        let downstream = Rc::clone(&self.downstream);
        let mut slot = Some(item);
        self.unit.queue(Task::new("observe_on:item", TaskPriority::Default, move || {
            if state.done.get() {
                return;
            }
            if let Some(item) = slot.take() {
                downstream.borrow_mut().on_item(item);
            }
        }));
    }

    fn on_error(&mut self, error: StreamError) {
        if self.state.done.get() {
            return;
        }
        let state = Rc::clone(&self.state);
        let downstream = Rc::clone(&self.downstream);
        let mut slot = Some(error);
        self.unit.queue(Task::new("observe_on:error", TaskPriority::Default, move || {
            if state.done.replace(true) {
                return;
            }
            if let Some(error) = slot.take() {
                downstream.borrow_mut().on_error(error);
            }
        }));
    }

    fn on_complete(&mut self) {
        if self.state.done.get() {
            return;
        }
        let state = Rc::clone(&self.state);
        let downstream = Rc::clone(&self.downstream);
        self.unit.queue(Task::new(
            "observe_on:complete",
            TaskPriority::Default,
            move || {
                if state.done.replace(true) {
                    return;
                }
                downstream.borrow_mut().on_complete();
            },
        ));
    }
}

// ┌─────────────────────────────────────────────┐
// │ subscribe_on                                │
// └─────────────────────────────────────────────┘

pub(crate) struct SubscribeOnStream<T: 'static> {
    upstream: Stream<T>,
    unit: Unit,
}

impl<T: 'static> StreamCore<T> for SubscribeOnStream<T> {
    fn subscribe_core(&self, mut downstream: BoxSubscriber<T>) {
        let core = SubscriptionCore::new();
        downstream.on_subscribe(core.subscription());
        if core.is_done() {
            return;
        }
        let upstream = self.upstream.clone();
        let mut slot = Some((downstream, core.clone()));
        self.unit.queue(Task::new("subscribe_on", TaskPriority::Default, move || {
            if let Some((downstream, core)) = slot.take() {
                if core.is_done() {
                    return;
                }
                upstream.subscribe_raw(Box::new(ContinuationSubscriber {
                    downstream,
                    core,
                }));
            }
        }));
    }
}

// ┌─────────────────────────────────────────────┐
// │ Fluent surface                              │
// └─────────────────────────────────────────────┘

impl<T: 'static> Stream<T> {
    /// Re-deliver every signal from a task on the given unit.
    #[must_use]
    pub fn observe_on(&self, unit: &Unit) -> Stream<T> {
        Stream::from_core(
            "observe_on",
            ObserveOnStream {
                upstream: self.clone(),
                unit: unit.clone(),
            },
        )
    }

    /// Establish the upstream subscription from a task on the given unit.
    /// The downstream receives its subscription immediately and can cancel
    /// before the hop happens.
    #[must_use]
    pub fn subscribe_on(&self, unit: &Unit) -> Stream<T> {
        Stream::from_core(
            "subscribe_on",
            SubscribeOnStream {
                upstream: self.clone(),
                unit: unit.clone(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::sources::Emitter;
    use crate::testing::{RecordedSignal, RecordingSubscriber};

    #[test]
    fn test_observe_on_defers_signals_to_the_unit() {
        let unit = Unit::new("target");
        let (subscriber, trace) = RecordingSubscriber::new();
        Stream::of([1, 2]).observe_on(&unit).subscribe(subscriber);

        // Source already ran; the signals sit in the unit's queue.
        assert!(trace.items().is_empty());
        unit.activate();
        assert_eq!(trace.items(), vec![1, 2]);
        assert!(trace.completed());
    }

    #[test]
    fn test_observe_on_preserves_signal_order() {
        let unit = Unit::new("target");
        let (subscriber, trace) = RecordingSubscriber::new();
        Stream::of([1, 2, 3]).observe_on(&unit).subscribe(subscriber);
        unit.activate();
        assert_eq!(
            trace.signals(),
            vec![
                RecordedSignal::Subscribe,
                RecordedSignal::Item(1),
                RecordedSignal::Item(2),
                RecordedSignal::Item(3),
                RecordedSignal::Complete,
            ]
        );
    }

    #[test]
    fn test_subscribe_on_defers_the_subscription_itself() {
        let unit = Unit::new("target");
        let subscribed = std::rc::Rc::new(Cell::new(false));
        let subscribed_clone = std::rc::Rc::clone(&subscribed);
        let source = Stream::create(move |emitter| {
            subscribed_clone.set(true);
            emitter.next(1);
            emitter.complete();
        });

        let (subscriber, trace) = RecordingSubscriber::new();
        source.subscribe_on(&unit).subscribe(subscriber);

        assert!(!subscribed.get());
        assert_eq!(trace.subscribe_count(), 1);

        unit.activate();
        assert!(subscribed.get());
        assert_eq!(trace.items(), vec![1]);
        assert!(trace.completed());
    }

    #[test]
    fn test_cancel_before_the_hop_prevents_the_subscription() {
        let unit = Unit::new("target");
        let subscribed = std::rc::Rc::new(Cell::new(false));
        let subscribed_clone = std::rc::Rc::clone(&subscribed);
        let source = Stream::create(move |emitter: Emitter<i32>| {
            subscribed_clone.set(true);
            emitter.complete();
        });

        let (subscriber, _trace, subscription) =
            RecordingSubscriber::with_subscription_slot();
        source.subscribe_on(&unit).subscribe(subscriber);
        subscription.borrow().as_ref().unwrap().cancel();

        unit.activate();
        assert!(!subscribed.get());
    }
}
