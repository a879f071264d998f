// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! At-most-one-inner flattening: `switch_streams` replaces the active inner
//! on every outer item; `exhaust` drops outer items while an inner is
//! active. The two share one subscription machine, differing only in what
//! an outer item does when an inner is already running.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::StreamError;
use crate::stream::stream::StreamCore;
use crate::stream::subscriber::{share_subscriber, CancelSource};
use crate::stream::{BoxSubscriber, SharedSubscriber, Stream, Subscriber, Subscription};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InnerPolicy {
    /// Cancel the active inner and start the new one (switch).
    Replace,
    /// Drop the outer item while an inner is active (exhaust).
    Drop,
}

pub(crate) struct SwitchStream<T: 'static> {
    upstream: Stream<Stream<T>>,
    policy: InnerPolicy,
}

struct SwitchShared<T: 'static> {
    downstream: SharedSubscriber<T>,
    done: Cell<bool>,
    outer: RefCell<Option<Subscription>>,
    /// The active inner, if any: its generation and (once it subscribed)
    /// its subscription.
    current: RefCell<Option<(u64, Option<Subscription>)>>,
    next_generation: Cell<u64>,
    outer_complete: Cell<bool>,
    policy: InnerPolicy,
}

impl<T> SwitchShared<T> {
    fn current_generation(&self) -> Option<u64> {
        self.current.borrow().as_ref().map(|(generation, _)| *generation)
    }
}

impl<T> CancelSource for SwitchShared<T> {
    fn cancel(&self) {
        if self.done.replace(true) {
            return;
        }
        let outer = self.outer.borrow_mut().take();
        if let Some(outer) = outer {
            outer.cancel();
        }
        let inner = self.current.borrow_mut().take();
        if let Some((_, Some(inner))) = inner {
            inner.cancel();
        }
    }

    fn is_cancelled(&self) -> bool { self.done.get() }
}

fn switch_terminate<T: 'static>(shared: &Rc<SwitchShared<T>>, error: StreamError) {
    if shared.done.replace(true) {
        return;
    }
    let outer = shared.outer.borrow_mut().take();
    if let Some(outer) = outer {
        outer.cancel();
    }
    let inner = shared.current.borrow_mut().take();
    if let Some((_, Some(inner))) = inner {
        inner.cancel();
    }
    shared.downstream.borrow_mut().on_error(error);
}

impl<T: 'static> StreamCore<T> for SwitchStream<T> {
    fn subscribe_core(&self, downstream: BoxSubscriber<T>) {
        let shared = Rc::new(SwitchShared {
            downstream: share_subscriber(downstream),
            done: Cell::new(false),
            outer: RefCell::new(None),
            current: RefCell::new(None),
            next_generation: Cell::new(0),
            outer_complete: Cell::new(false),
            policy: self.policy,
        });
        let subscription = Subscription::from_cancel_source(
            Rc::clone(&shared) as Rc<dyn CancelSource>
        );
        shared.downstream.borrow_mut().on_subscribe(subscription);
        self.upstream.subscribe_raw(Box::new(SwitchOuterSubscriber { shared }));
    }
}

struct SwitchOuterSubscriber<T: 'static> {
    shared: Rc<SwitchShared<T>>,
}

impl<T: 'static> Subscriber<Stream<T>> for SwitchOuterSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        if self.shared.done.get() {
            subscription.cancel();
            return;
        }
        *self.shared.outer.borrow_mut() = Some(subscription);
    }

    fn on_item(&mut self, stream: Stream<T>) {
        if self.shared.done.get() {
            return;
        }
        let (displaced, generation) = {
            let mut current = self.shared.current.borrow_mut();
            if current.is_some() && self.shared.policy == InnerPolicy::Drop {
                return;
            }
            let generation = self.shared.next_generation.get();
            self.shared.next_generation.set(generation + 1);
            (current.replace((generation, None)), generation)
        };
        if let Some((_, Some(previous))) = displaced {
            previous.cancel();
        }
        stream.subscribe_raw(Box::new(SwitchInnerSubscriber {
            shared: Rc::clone(&self.shared),
            generation,
        }));
    }

    fn on_error(&mut self, error: StreamError) { switch_terminate(&self.shared, error); }

    fn on_complete(&mut self) {
        if self.shared.done.get() {
            return;
        }
        self.shared.outer_complete.set(true);
        if self.shared.current_generation().is_none() {
            self.shared.done.set(true);
            self.shared.downstream.borrow_mut().on_complete();
        }
    }
}

struct SwitchInnerSubscriber<T: 'static> {
    shared: Rc<SwitchShared<T>>,
    generation: u64,
}

impl<T: 'static> SwitchInnerSubscriber<T> {
    fn is_current(&self) -> bool {
        self.shared.current_generation() == Some(self.generation)
    }
}

impl<T: 'static> Subscriber<T> for SwitchInnerSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        if self.shared.done.get() || !self.is_current() {
            subscription.cancel();
            return;
        }
        if let Some((_, slot)) = self.shared.current.borrow_mut().as_mut() {
            *slot = Some(subscription);
        }
    }

    fn on_item(&mut self, item: T) {
        if self.shared.done.get() || !self.is_current() {
            return;
        }
        self.shared.downstream.borrow_mut().on_item(item);
    }

    fn on_error(&mut self, error: StreamError) {
        if self.shared.done.get() || !self.is_current() {
            return;
        }
        switch_terminate(&self.shared, error);
    }

    fn on_complete(&mut self) {
        if self.shared.done.get() || !self.is_current() {
            return;
        }
        self.shared.current.borrow_mut().take();
        if self.shared.outer_complete.get() {
            self.shared.done.set(true);
            self.shared.downstream.borrow_mut().on_complete();
        }
    }
}

// ┌─────────────────────────────────────────────┐
// │ Fluent surface                              │
// └─────────────────────────────────────────────┘

impl<T: 'static> Stream<Stream<T>> {
    /// Mirror only the most recent inner stream; a new outer item cancels
    /// the active inner.
    #[must_use]
    pub fn switch_streams(&self) -> Stream<T> {
        Stream::from_core(
            "switch",
            SwitchStream {
                upstream: self.clone(),
                policy: InnerPolicy::Replace,
            },
        )
    }

    /// Mirror the first inner stream to completion; outer items arriving
    /// while it is active are dropped.
    #[must_use]
    pub fn exhaust(&self) -> Stream<T> {
        Stream::from_core(
            "exhaust",
            SwitchStream {
                upstream: self.clone(),
                policy: InnerPolicy::Drop,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::hub::Hub;
    use crate::testing::RecordingSubscriber;

    #[test]
    fn test_switch_replaces_the_active_inner() {
        let outer: Hub<Stream<i32>> = Hub::subject();
        let first: Hub<i32> = Hub::subject();
        let second: Hub<i32> = Hub::subject();

        let (subscriber, trace) = RecordingSubscriber::new();
        outer.stream().switch_streams().subscribe(subscriber);

        outer.next(first.stream());
        first.next(1);
        outer.next(second.stream());
        // The first inner was cancelled; its items no longer flow.
        first.next(2);
        second.next(10);

        assert_eq!(trace.items(), vec![1, 10]);
    }

    #[test]
    fn test_switch_completes_after_outer_and_inner_complete() {
        let outer: Hub<Stream<i32>> = Hub::subject();
        let inner: Hub<i32> = Hub::subject();

        let (subscriber, trace) = RecordingSubscriber::new();
        outer.stream().switch_streams().subscribe(subscriber);

        outer.next(inner.stream());
        outer.complete();
        assert!(!trace.completed());

        inner.next(5);
        inner.complete();
        assert_eq!(trace.items(), vec![5]);
        assert!(trace.completed());
    }

    #[test]
    fn test_exhaust_drops_outer_items_while_an_inner_is_active() {
        let outer: Hub<Stream<i32>> = Hub::subject();
        let first: Hub<i32> = Hub::subject();
        let second: Hub<i32> = Hub::subject();

        let (subscriber, trace) = RecordingSubscriber::new();
        outer.stream().exhaust().subscribe(subscriber);

        outer.next(first.stream());
        first.next(1);
        // Dropped: first is still active.
        outer.next(second.stream());
        second.next(99);
        first.next(2);
        first.complete();

        // After the active inner completes, the next outer item may start.
        outer.next(second.stream());
        second.next(10);

        assert_eq!(trace.items(), vec![1, 2, 10]);
    }

    #[test]
    fn test_inner_error_terminates_the_switch() {
        let outer: Hub<Stream<i32>> = Hub::subject();
        let (subscriber, trace) = RecordingSubscriber::new();
        outer.stream().switch_streams().subscribe(subscriber);

        outer.next(Stream::fail(StreamError::msg("inner boom")));
        assert_eq!(trace.error(), Some("inner boom".into()));

        // Nothing flows after the terminal.
        outer.next(Stream::of([1]));
        assert!(trace.items().is_empty());
    }
}
