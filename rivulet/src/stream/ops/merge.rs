// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Flattening streams-of-streams with bounded concurrency: `merge`,
//! `concat` (a merge of width 1), and `flat_map`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::core::RingBuffer;
use crate::error::StreamError;
use crate::stream::stream::StreamCore;
use crate::stream::subscriber::{share_subscriber, CancelSource};
use crate::stream::{BoxSubscriber, SharedSubscriber, Stream, Subscriber, Subscription};

pub(crate) struct MergeStream<T: 'static> {
    upstream: Stream<Stream<T>>,
    max_concurrency: usize,
}

struct MergeControl<T: 'static> {
    /// Inners currently subscribed; the subscription slot fills when the
    /// inner delivers its `on_subscribe`.
    active: Vec<(u64, Option<Subscription>)>,
    /// Streams waiting for a concurrency slot. Unbounded.
    backlog: RingBuffer<Stream<T>>,
    max_concurrency: usize,
    outer_complete: bool,
    next_id: u64,
}

struct MergeShared<T: 'static> {
    downstream: SharedSubscriber<T>,
    done: Cell<bool>,
    outer: RefCell<Option<Subscription>>,
    control: RefCell<MergeControl<T>>,
}

impl<T> CancelSource for MergeShared<T> {
    fn cancel(&self) {
        if self.done.replace(true) {
            return;
        }
        let outer = self.outer.borrow_mut().take();
        if let Some(outer) = outer {
            outer.cancel();
        }
        let inners: Vec<Subscription> = {
            let mut control = self.control.borrow_mut();
            control.backlog.clear();
            control
                .active
                .drain(..)
                .filter_map(|(_, subscription)| subscription)
                .collect()
        };
        for inner in inners {
            inner.cancel();
        }
    }

    fn is_cancelled(&self) -> bool { self.done.get() }
}

/// Move backlogged streams into free concurrency slots. Runs after every
/// event that could open a slot.
fn merge_pump<T: 'static>(shared: &Rc<MergeShared<T>>) {
    loop {
        if shared.done.get() {
            return;
        }
        let next = {
            let mut control = shared.control.borrow_mut();
            if control.active.len() < control.max_concurrency {
                control.backlog.pop()
            } else {
                None
            }
        };
        match next {
            Some(stream) => merge_start(shared, stream),
            None => return,
        }
    }
}

/// Subscribe one inner. The id is registered first so the concurrency
/// count holds even when the inner completes synchronously mid-subscribe.
fn merge_start<T: 'static>(shared: &Rc<MergeShared<T>>, stream: Stream<T>) {
    let id = {
        let mut control = shared.control.borrow_mut();
        let id = control.next_id;
        control.next_id += 1;
        control.active.push((id, None));
        id
    };
    stream.subscribe_raw(Box::new(MergeInnerSubscriber {
        shared: Rc::clone(shared),
        id,
    }));
}

fn merge_maybe_complete<T: 'static>(shared: &Rc<MergeShared<T>>) {
    if shared.done.get() {
        return;
    }
    let finished = {
        let control = shared.control.borrow();
        control.outer_complete
            && control.active.is_empty()
            && control.backlog.is_empty()
    };
    if finished {
        shared.done.set(true);
        shared.downstream.borrow_mut().on_complete();
    }
}

/// An error anywhere cancels everything else and becomes the terminal.
fn merge_terminate<T: 'static>(shared: &Rc<MergeShared<T>>, error: StreamError) {
    if shared.done.replace(true) {
        return;
    }
    let outer = shared.outer.borrow_mut().take();
    if let Some(outer) = outer {
        outer.cancel();
    }
    let inners: Vec<Subscription> = {
        let mut control = shared.control.borrow_mut();
        control.backlog.clear();
        control
            .active
            .drain(..)
            .filter_map(|(_, subscription)| subscription)
            .collect()
    };
    for inner in inners {
        inner.cancel();
    }
    shared.downstream.borrow_mut().on_error(error);
}

impl<T: 'static> StreamCore<T> for MergeStream<T> {
    fn subscribe_core(&self, downstream: BoxSubscriber<T>) {
        let shared = Rc::new(MergeShared {
            downstream: share_subscriber(downstream),
            done: Cell::new(false),
            outer: RefCell::new(None),
            control: RefCell::new(MergeControl {
                active: Vec::new(),
                backlog: RingBuffer::new(),
                max_concurrency: self.max_concurrency,
                outer_complete: false,
                next_id: 0,
            }),
        });
        let subscription = Subscription::from_cancel_source(
            Rc::clone(&shared) as Rc<dyn CancelSource>
        );
        shared.downstream.borrow_mut().on_subscribe(subscription);
        self.upstream.subscribe_raw(Box::new(MergeOuterSubscriber { shared }));
    }
}

struct MergeOuterSubscriber<T: 'static> {
    shared: Rc<MergeShared<T>>,
}

impl<T: 'static> Subscriber<Stream<T>> for MergeOuterSubscriber<T> {
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
        self.shared.control.borrow_mut().backlog.add(stream);
        merge_pump(&self.shared);
    }

    fn on_error(&mut self, error: StreamError) { merge_terminate(&self.shared, error); }

    fn on_complete(&mut self) {
        if self.shared.done.get() {
            return;
        }
        self.shared.control.borrow_mut().outer_complete = true;
        merge_maybe_complete(&self.shared);
    }
}

struct MergeInnerSubscriber<T: 'static> {
    shared: Rc<MergeShared<T>>,
    id: u64,
}

impl<T: 'static> Subscriber<T> for MergeInnerSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        if self.shared.done.get() {
            subscription.cancel();
            return;
        }
        let mut control = self.shared.control.borrow_mut();
        match control.active.iter_mut().find(|(id, _)| *id == self.id) {
            Some((_, slot)) => *slot = Some(subscription),
            None => subscription.cancel(),
        }
    }

    fn on_item(&mut self, item: T) {
        if self.shared.done.get() {
            return;
        }
        self.shared.downstream.borrow_mut().on_item(item);
    }

    fn on_error(&mut self, error: StreamError) { merge_terminate(&self.shared, error); }

    fn on_complete(&mut self) {
        if self.shared.done.get() {
            return;
        }
        self.shared
            .control
            .borrow_mut()
            .active
            .retain(|(id, _)| *id != self.id);
        merge_pump(&self.shared);
        merge_maybe_complete(&self.shared);
    }
}

// ┌─────────────────────────────────────────────┐
// │ Fluent surface                              │
// └─────────────────────────────────────────────┘

impl<T: 'static> Stream<Stream<T>> {
    /// Run up to `max_concurrency` inner streams at once, interleaving
    /// their items. Extra streams queue in arrival order.
    ///
    /// # Panics
    ///
    /// Panics if `max_concurrency` is 0.
    #[must_use]
    pub fn merge(&self, max_concurrency: usize) -> Stream<T> {
        assert!(max_concurrency > 0, "merge needs at least one slot");
        Stream::from_core(
            "merge",
            MergeStream {
                upstream: self.clone(),
                max_concurrency,
            },
        )
    }

    /// Serialize inner streams one after another.
    #[must_use]
    pub fn concat(&self) -> Stream<T> { self.merge(1).with_name("concat") }
}

impl<T: 'static> Stream<T> {
    /// Map each item to a stream, then merge.
    #[must_use]
    pub fn flat_map<R: 'static>(
        &self,
        mapper: impl Fn(T) -> Stream<R> + 'static,
        max_concurrency: usize,
    ) -> Stream<R> {
        self.map(mapper).merge(max_concurrency).with_name("flat_map")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::Unit;
    use crate::stream::hub::Hub;
    use crate::testing::RecordingSubscriber;

    #[test]
    fn test_concat_serializes_inner_streams() {
        let (subscriber, trace) = RecordingSubscriber::new();
        Stream::of([Stream::of([1, 2]), Stream::of([3, 4])])
            .concat()
            .subscribe(subscriber);
        assert_eq!(trace.items(), vec![1, 2, 3, 4]);
        assert!(trace.completed());
        assert_eq!(trace.subscribe_count(), 1);
    }

    #[test]
    fn test_concat_waits_for_the_active_inner() {
        // The first inner stays open; the second must not start.
        let gate: Hub<i32> = Hub::subject();
        let started = std::rc::Rc::new(Cell::new(false));
        let started_clone = std::rc::Rc::clone(&started);
        let second = Stream::create(move |emitter| {
            started_clone.set(true);
            emitter.complete();
        });

        let (subscriber, trace) = RecordingSubscriber::new();
        Stream::of([gate.stream(), second]).concat().subscribe(subscriber);

        gate.next(1);
        assert!(!started.get());
        assert_eq!(trace.items(), vec![1]);

        gate.complete();
        assert!(started.get());
        assert!(trace.completed());
    }

    #[test]
    fn test_merge_interleaves_across_open_inners() {
        let first: Hub<i32> = Hub::subject();
        let second: Hub<i32> = Hub::subject();
        let (subscriber, trace) = RecordingSubscriber::new();
        Stream::of([first.stream(), second.stream()])
            .merge(2)
            .subscribe(subscriber);

        first.next(1);
        second.next(10);
        first.next(2);
        first.complete();
        second.next(20);
        second.complete();

        assert_eq!(trace.items(), vec![1, 10, 2, 20]);
        assert!(trace.completed());
    }

    #[test]
    fn test_merge_queues_streams_beyond_the_concurrency_limit() {
        let gate: Hub<i32> = Hub::subject();
        let (subscriber, trace) = RecordingSubscriber::new();
        Stream::of([gate.stream(), Stream::of([7, 8])])
            .merge(1)
            .subscribe(subscriber);

        // The second inner is backlogged until the gate completes.
        assert!(trace.items().is_empty());
        gate.next(1);
        gate.complete();
        assert_eq!(trace.items(), vec![1, 7, 8]);
        assert!(trace.completed());
    }

    #[test]
    fn test_inner_error_cancels_everything_and_wins() {
        let unit = Unit::new("test");
        let healthy = Stream::periodic(&unit, 10).map(|tick| i64::try_from(tick).unwrap());
        let failing = Stream::<i64>::fail(StreamError::msg("inner down"));

        let (subscriber, trace) = RecordingSubscriber::new();
        Stream::of([healthy, failing]).merge(2).subscribe(subscriber);

        assert_eq!(trace.error(), Some("inner down".into()));
        // The periodic inner was cancelled along the way.
        assert_eq!(unit.scheduler().pending_timers(), 0);
    }

    #[test]
    fn test_flat_map_expands_each_item() {
        let (subscriber, trace) = RecordingSubscriber::new();
        Stream::of([1, 2, 3])
            .flat_map(|v| Stream::of([v * 10, v * 10 + 1]), 1)
            .subscribe(subscriber);
        assert_eq!(trace.items(), vec![10, 11, 20, 21, 30, 31]);
        assert!(trace.completed());
    }

    #[test]
    fn test_outer_completing_last_still_completes_downstream() {
        let outer: Hub<Stream<i32>> = Hub::subject();
        let (subscriber, trace) = RecordingSubscriber::new();
        outer.stream().merge(2).subscribe(subscriber);

        outer.next(Stream::of([1]));
        assert_eq!(trace.items(), vec![1]);
        assert!(!trace.completed());
        outer.complete();
        assert!(trace.completed());
    }
}
