// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Operators that interpose the scheduler between upstream and downstream:
//! `debounce`, `throttle_latest`, `sample`, and `delay`. Each captures the
//! target unit's scheduler at construction; cancelling the subscription
//! disarms any timers it owns.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::StreamError;
use crate::sched::{Scheduler, TimerHandle, Unit};
use crate::stream::stream::StreamCore;
use crate::stream::subscriber::{share_subscriber, CancelSource};
use crate::stream::{BoxSubscriber, SharedSubscriber, Stream, Subscriber, Subscription};

/// Common state for one timed subscription: the shared done flag, the
/// upstream handle, and the timers owned by this stage.
struct TimedState {
    done: Cell<bool>,
    upstream: RefCell<Option<Subscription>>,
    timers: RefCell<SmallVec<[TimerHandle; 2]>>,
}

impl TimedState {
    fn new() -> Self {
        Self {
            done: Cell::new(false),
            upstream: RefCell::new(None),
            timers: RefCell::new(SmallVec::new()),
        }
    }

    fn attach_upstream(&self, upstream: Subscription) {
        if self.done.get() {
            upstream.cancel();
            return;
        }
        *self.upstream.borrow_mut() = Some(upstream);
    }

    /// Replace the armed timers with `handle` (timed operators own at most
    /// one live timer at a time; delay accumulates instead).
    fn rearm(&self, handle: TimerHandle) {
        let mut timers = self.timers.borrow_mut();
        for timer in timers.drain(..) {
            timer.cancel();
        }
        timers.push(handle);
    }

    fn track(&self, handle: TimerHandle) { self.timers.borrow_mut().push(handle); }

    fn disarm_all(&self) {
        for timer in self.timers.borrow_mut().drain(..) {
            timer.cancel();
        }
    }

    /// Terminal reached naturally: no upstream cancel, but timers die.
    fn settle(&self) {
        self.done.set(true);
        self.upstream.borrow_mut().take();
        self.disarm_all();
    }
}

impl CancelSource for TimedState {
    fn cancel(&self) {
        if self.done.replace(true) {
            return;
        }
        let upstream = self.upstream.borrow_mut().take();
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
        self.disarm_all();
    }

    fn is_cancelled(&self) -> bool { self.done.get() }
}

// ┌─────────────────────────────────────────────┐
// │ debounce                                    │
// └─────────────────────────────────────────────┘

pub(crate) struct DebounceStream<T: 'static, F> {
    upstream: Stream<T>,
    scheduler: Scheduler,
    delay_of: Rc<F>,
}

impl<T, F> StreamCore<T> for DebounceStream<T, F>
where
    T: 'static,
    F: Fn(&T) -> u64 + 'static,
{
    fn subscribe_core(&self, downstream: BoxSubscriber<T>) {
        let state = Rc::new(TimedState::new());
        let downstream = share_subscriber(downstream);
        downstream.borrow_mut().on_subscribe(Subscription::from_cancel_source(
            Rc::clone(&state) as Rc<dyn CancelSource>,
        ));
        self.upstream.subscribe_raw(Box::new(DebounceSubscriber {
            state,
            downstream,
            scheduler: self.scheduler.clone(),
            delay_of: Rc::clone(&self.delay_of),
            pending: Rc::new(RefCell::new(None)),
        }));
    }
}

/// Every item restarts the timer; only an item that survives its own delay
/// without a successor is emitted. Completion flushes the pending item.
struct DebounceSubscriber<T: 'static, F> {
    state: Rc<TimedState>,
    downstream: SharedSubscriber<T>,
    scheduler: Scheduler,
    delay_of: Rc<F>,
    pending: Rc<RefCell<Option<T>>>,
}

impl<T, F> Subscriber<T> for DebounceSubscriber<T, F>
where
    T: 'static,
    F: Fn(&T) -> u64 + 'static,
{
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.state.attach_upstream(subscription);
    }

    fn on_item(&mut self, item: T) {
        if self.state.done.get() {
            return;
        }
        let delay = (*self.delay_of)(&item);
        *self.pending.borrow_mut() = Some(item);

        let state = Rc::clone(&self.state);
        let downstream = Rc::clone(&self.downstream);
        let pending = Rc::clone(&self.pending);
        let handle = self.scheduler.schedule(
            "debounce",
            move || {
                if state.done.get() {
                    return;
                }
                if let Some(item) = pending.borrow_mut().take() {
                    downstream.borrow_mut().on_item(item);
                }
            },
            delay,
        );
        self.state.rearm(handle);
    }

    fn on_error(&mut self, error: StreamError) {
        if self.state.done.get() {
            return;
        }
        self.pending.borrow_mut().take();
        self.state.settle();
        self.downstream.borrow_mut().on_error(error);
    }

    fn on_complete(&mut self) {
        if self.state.done.get() {
            return;
        }
        self.state.disarm_all();
        let flushed = self.pending.borrow_mut().take();
        if let Some(item) = flushed {
            self.downstream.borrow_mut().on_item(item);
            if self.state.done.get() {
                return;
            }
        }
        self.state.settle();
        self.downstream.borrow_mut().on_complete();
    }
}

// ┌─────────────────────────────────────────────┐
// │ throttle_latest                             │
// └─────────────────────────────────────────────┘

pub(crate) struct ThrottleLatestStream<T: 'static> {
    upstream: Stream<T>,
    scheduler: Scheduler,
    period: u64,
}

impl<T: 'static> StreamCore<T> for ThrottleLatestStream<T> {
    fn subscribe_core(&self, downstream: BoxSubscriber<T>) {
        let state = Rc::new(TimedState::new());
        let downstream = share_subscriber(downstream);
        downstream.borrow_mut().on_subscribe(Subscription::from_cancel_source(
            Rc::clone(&state) as Rc<dyn CancelSource>,
        ));
        self.upstream.subscribe_raw(Box::new(ThrottleLatestSubscriber {
            state,
            downstream,
            scheduler: self.scheduler.clone(),
            period: self.period,
            pending: Rc::new(RefCell::new(None)),
            window_open: Rc::new(Cell::new(false)),
        }));
    }
}

/// The first item in a quiet stretch goes out immediately and opens a
/// window; while the window is open the latest item is parked. At the
/// window edge the parked item (if any) goes out and opens the next
/// window.
struct ThrottleLatestSubscriber<T: 'static> {
    state: Rc<TimedState>,
    downstream: SharedSubscriber<T>,
    scheduler: Scheduler,
    period: u64,
    pending: Rc<RefCell<Option<T>>>,
    window_open: Rc<Cell<bool>>,
}

fn open_throttle_window<T: 'static>(
    state: &Rc<TimedState>,
    downstream: &SharedSubscriber<T>,
    scheduler: &Scheduler,
    period: u64,
    pending: &Rc<RefCell<Option<T>>>,
    window_open: &Rc<Cell<bool>>,
) {
    window_open.set(true);
    let state_clone = Rc::clone(state);
    let downstream_clone = Rc::clone(downstream);
    let scheduler_clone = scheduler.clone();
    let pending_clone = Rc::clone(pending);
    let window_open_clone = Rc::clone(window_open);
    let handle = scheduler.schedule(
        "throttle_latest",
        move || {
            if state_clone.done.get() {
                return;
            }
            let parked = pending_clone.borrow_mut().take();
            match parked {
                Some(item) => {
                    downstream_clone.borrow_mut().on_item(item);
                    if state_clone.done.get() {
                        return;
                    }
                    open_throttle_window(
                        &state_clone,
                        &downstream_clone,
                        &scheduler_clone,
                        period,
                        &pending_clone,
                        &window_open_clone,
                    );
                }
                None => window_open_clone.set(false),
            }
        },
        period,
    );
    state.track(handle);
}

impl<T: 'static> Subscriber<T> for ThrottleLatestSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.state.attach_upstream(subscription);
    }

    fn on_item(&mut self, item: T) {
        if self.state.done.get() {
            return;
        }
        if self.window_open.get() {
            *self.pending.borrow_mut() = Some(item);
            return;
        }
        self.downstream.borrow_mut().on_item(item);
        if self.state.done.get() {
            return;
        }
        open_throttle_window(
            &self.state,
            &self.downstream,
            &self.scheduler,
            self.period,
            &self.pending,
            &self.window_open,
        );
    }

    fn on_error(&mut self, error: StreamError) {
        if self.state.done.get() {
            return;
        }
        self.state.settle();
        self.downstream.borrow_mut().on_error(error);
    }

    fn on_complete(&mut self) {
        if self.state.done.get() {
            return;
        }
        self.state.settle();
        self.downstream.borrow_mut().on_complete();
    }
}

// ┌─────────────────────────────────────────────┐
// │ sample                                      │
// └─────────────────────────────────────────────┘

pub(crate) struct SampleStream<T: 'static> {
    upstream: Stream<T>,
    scheduler: Scheduler,
    period: u64,
}

impl<T: 'static> StreamCore<T> for SampleStream<T> {
    fn subscribe_core(&self, downstream: BoxSubscriber<T>) {
        let state = Rc::new(TimedState::new());
        let downstream = share_subscriber(downstream);
        downstream.borrow_mut().on_subscribe(Subscription::from_cancel_source(
            Rc::clone(&state) as Rc<dyn CancelSource>,
        ));

        let pending: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        let tick_state = Rc::clone(&state);
        let tick_downstream = Rc::clone(&downstream);
        let tick_pending = Rc::clone(&pending);
        let handle = self.scheduler.schedule_at_fixed_rate(
            "sample",
            move || {
                if tick_state.done.get() {
                    return;
                }
                if let Some(item) = tick_pending.borrow_mut().take() {
                    tick_downstream.borrow_mut().on_item(item);
                }
            },
            self.period,
        );
        state.track(handle);

        self.upstream.subscribe_raw(Box::new(SampleSubscriber {
            state,
            downstream,
            pending,
        }));
    }
}

/// Parks the newest item; the periodic tick emits it if anything new
/// arrived during the interval.
struct SampleSubscriber<T: 'static> {
    state: Rc<TimedState>,
    downstream: SharedSubscriber<T>,
    pending: Rc<RefCell<Option<T>>>,
}

impl<T: 'static> Subscriber<T> for SampleSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.state.attach_upstream(subscription);
    }

    fn on_item(&mut self, item: T) {
        if self.state.done.get() {
            return;
        }
        *self.pending.borrow_mut() = Some(item);
    }

    fn on_error(&mut self, error: StreamError) {
        if self.state.done.get() {
            return;
        }
        self.state.settle();
        self.downstream.borrow_mut().on_error(error);
    }

    fn on_complete(&mut self) {
        if self.state.done.get() {
            return;
        }
        self.state.settle();
        self.downstream.borrow_mut().on_complete();
    }
}

// ┌─────────────────────────────────────────────┐
// │ delay                                       │
// └─────────────────────────────────────────────┘

pub(crate) struct DelayStream<T: 'static> {
    upstream: Stream<T>,
    scheduler: Scheduler,
    delay: u64,
}

impl<T: 'static> StreamCore<T> for DelayStream<T> {
    fn subscribe_core(&self, downstream: BoxSubscriber<T>) {
        let state = Rc::new(TimedState::new());
        let downstream = share_subscriber(downstream);
        downstream.borrow_mut().on_subscribe(Subscription::from_cancel_source(
            Rc::clone(&state) as Rc<dyn CancelSource>,
        ));
        self.upstream.subscribe_raw(Box::new(DelaySubscriber {
            state,
            downstream,
            scheduler: self.scheduler.clone(),
            delay: self.delay,
        }));
    }
}

/// Items and completion are re-delivered `delay` units later; an error
/// jumps the queue and cancels everything still in flight.
struct DelaySubscriber<T: 'static> {
    state: Rc<TimedState>,
    downstream: SharedSubscriber<T>,
    scheduler: Scheduler,
    delay: u64,
}

impl<T: 'static> Subscriber<T> for DelaySubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.state.attach_upstream(subscription);
    }

    fn on_item(&mut self, item: T) {
        if self.state.done.get() {
            return;
        }
        let state = Rc::clone(&self.state);
        let downstream = Rc::clone(&self.downstream);
        let mut slot = Some(item);
        let handle = self.scheduler.schedule(
            "delay",
            move || {
                if state.done.get() {
                    return;
                }
                if let Some(item) = slot.take() {
                    downstream.borrow_mut().on_item(item);
                }
            },
            self.delay,
        );
        self.state.track(handle);
    }

    fn on_error(&mut self, error: StreamError) {
        if self.state.done.get() {
            return;
        }
        self.state.settle();
        self.downstream.borrow_mut().on_error(error);
    }

    fn on_complete(&mut self) {
        if self.state.done.get() {
            return;
        }
        let state = Rc::clone(&self.state);
        let downstream = Rc::clone(&self.downstream);
        let handle = self.scheduler.schedule(
            "delay_complete",
            move || {
                if state.done.get() {
                    return;
                }
                state.settle();
                downstream.borrow_mut().on_complete();
            },
            self.delay,
        );
        self.state.track(handle);
    }
}

// ┌─────────────────────────────────────────────┐
// │ Fluent surface                              │
// └─────────────────────────────────────────────┘

impl<T: 'static> Stream<T> {
    /// Emit an item only after `delay_of(item)` clock units pass with no
    /// newer item. Completion flushes the pending item.
    #[must_use]
    pub fn debounce(&self, unit: &Unit, delay_of: impl Fn(&T) -> u64 + 'static) -> Stream<T> {
        Stream::from_core(
            "debounce",
            DebounceStream {
                upstream: self.clone(),
                scheduler: unit.scheduler(),
                delay_of: Rc::new(delay_of),
            },
        )
    }

    /// First item immediately, then at most one item per `period`: the
    /// most recent one, if any arrived during the window.
    #[must_use]
    pub fn throttle_latest(&self, unit: &Unit, period: u64) -> Stream<T> {
        Stream::from_core(
            "throttle_latest",
            ThrottleLatestStream {
                upstream: self.clone(),
                scheduler: unit.scheduler(),
                period,
            },
        )
    }

    /// Every `period`, emit the newest item if one arrived since the last
    /// tick.
    #[must_use]
    pub fn sample(&self, unit: &Unit, period: u64) -> Stream<T> {
        Stream::from_core(
            "sample",
            SampleStream {
                upstream: self.clone(),
                scheduler: unit.scheduler(),
                period,
            },
        )
    }

    /// Re-deliver items and completion `delay` clock units later. Errors
    /// are not delayed.
    #[must_use]
    pub fn delay(&self, unit: &Unit, delay: u64) -> Stream<T> {
        Stream::from_core(
            "delay",
            DelayStream {
                upstream: self.clone(),
                scheduler: unit.scheduler(),
                delay,
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
    fn test_debounce_emits_only_items_that_outlive_their_delay() {
        let unit = Unit::new("test");
        let hub: Hub<i32> = Hub::subject();
        let (subscriber, trace) = RecordingSubscriber::new();
        hub.stream().debounce(&unit, |_| 50).subscribe(subscriber);

        hub.next(1);
        unit.advance_by(20);
        hub.next(2); // supersedes 1
        unit.advance_by(50);
        assert_eq!(trace.items(), vec![2]);

        hub.next(3);
        unit.advance_by(50);
        assert_eq!(trace.items(), vec![2, 3]);
    }

    #[test]
    fn test_debounce_flushes_the_pending_item_on_complete() {
        let unit = Unit::new("test");
        let hub: Hub<i32> = Hub::subject();
        let (subscriber, trace) = RecordingSubscriber::new();
        hub.stream().debounce(&unit, |_| 100).subscribe(subscriber);

        hub.next(1);
        hub.complete();
        assert_eq!(trace.items(), vec![1]);
        assert!(trace.completed());
        assert_eq!(unit.scheduler().pending_timers(), 0);
    }

    /// periodic(100).filter(v < 5).debounce(v * 50).take(2): the first two
    /// debounced items terminate the chain, and the terminal cancels the
    /// periodic source cleanly.
    #[test]
    fn test_debounce_over_periodic_with_take_cancels_the_source() {
        let unit = Unit::new("test");
        let (subscriber, trace) = RecordingSubscriber::new();
        Stream::periodic(&unit, 100)
            .filter(|tick| *tick < 5)
            .debounce(&unit, |tick| *tick * 50)
            .take(2)
            .subscribe(subscriber);

        // t=100: tick 0 arrives, debounce delay 0 fires the same instant.
        // t=200: tick 1 arrives, fires at t=250 with nothing to supersede
        // it; take(2) then completes and tears the whole chain down.
        unit.advance_to(300);
        assert_eq!(trace.items(), vec![0, 1]);
        assert!(trace.completed());
        assert_eq!(unit.scheduler().pending_timers(), 0);
    }

    #[test]
    fn test_throttle_latest_emits_first_then_latest_per_window() {
        let unit = Unit::new("test");
        let hub: Hub<i32> = Hub::subject();
        let (subscriber, trace) = RecordingSubscriber::new();
        hub.stream().throttle_latest(&unit, 100).subscribe(subscriber);

        hub.next(1); // immediate
        hub.next(2);
        hub.next(3); // latest in window
        assert_eq!(trace.items(), vec![1]);

        unit.advance_by(100);
        assert_eq!(trace.items(), vec![1, 3]);

        // Quiet window: nothing emitted, window closes.
        unit.advance_by(100);
        hub.next(4); // immediate again
        assert_eq!(trace.items(), vec![1, 3, 4]);
    }

    #[test]
    fn test_sample_emits_the_newest_item_per_tick() {
        let unit = Unit::new("test");
        let hub: Hub<i32> = Hub::subject();
        let (subscriber, trace) = RecordingSubscriber::new();
        hub.stream().sample(&unit, 100).subscribe(subscriber);

        hub.next(1);
        hub.next(2);
        unit.advance_by(100);
        assert_eq!(trace.items(), vec![2]);

        // No new items: the tick stays silent.
        unit.advance_by(100);
        assert_eq!(trace.items(), vec![2]);

        hub.next(3);
        unit.advance_by(100);
        assert_eq!(trace.items(), vec![2, 3]);
    }

    #[test]
    fn test_delay_shifts_items_and_completion() {
        let unit = Unit::new("test");
        let (subscriber, trace) = RecordingSubscriber::new();
        Stream::of([1, 2]).delay(&unit, 30).subscribe(subscriber);

        assert!(trace.items().is_empty());
        unit.advance_by(30);
        assert_eq!(trace.items(), vec![1, 2]);
        assert!(trace.completed());
    }

    #[test]
    fn test_delay_cancel_disarms_pending_deliveries() {
        let unit = Unit::new("test");
        let (subscriber, trace, subscription) =
            RecordingSubscriber::with_subscription_slot();
        Stream::of([1, 2]).delay(&unit, 30).subscribe(subscriber);

        subscription.borrow().as_ref().unwrap().cancel();
        unit.advance_by(100);
        assert!(trace.items().is_empty());
        assert!(!trace.completed());
        assert_eq!(unit.scheduler().pending_timers(), 0);
    }
}
