// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Source primitives. Synchronous sources check done-state before every
//! emission, so a cancel arriving re-entrantly (from user code inside
//! `on_item`) halts the loop at the next item boundary.

use std::marker::PhantomData;
use std::rc::Rc;

use super::stream::StreamCore;
use super::subscriber::share_subscriber;
use super::{BoxSubscriber, Stream, Subscription, SubscriptionCore};
use crate::error::StreamError;
use crate::sched::{Scheduler, Unit};

// ┌─────────────────────────────────────────────┐
// │ Immediate sources: empty, never, fail       │
// └─────────────────────────────────────────────┘

struct EmptyStream<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> StreamCore<T> for EmptyStream<T> {
    fn subscribe_core(&self, mut downstream: BoxSubscriber<T>) {
        let core = SubscriptionCore::new();
        downstream.on_subscribe(core.subscription());
        if core.is_done() {
            return;
        }
        downstream.on_complete();
        core.mark_done();
    }
}

struct NeverStream<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> StreamCore<T> for NeverStream<T> {
    fn subscribe_core(&self, mut downstream: BoxSubscriber<T>) {
        downstream.on_subscribe(SubscriptionCore::new().subscription());
    }
}

struct FailStream<T> {
    error: StreamError,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> StreamCore<T> for FailStream<T> {
    fn subscribe_core(&self, mut downstream: BoxSubscriber<T>) {
        let core = SubscriptionCore::new();
        downstream.on_subscribe(core.subscription());
        if core.is_done() {
            return;
        }
        downstream.on_error(self.error.clone());
        core.mark_done();
    }
}

// ┌─────────────────────────────────────────────┐
// │ Collection sources: of, from_iter, range    │
// └─────────────────────────────────────────────┘

struct IterStream<I> {
    items: I,
}

impl<T, I> StreamCore<T> for IterStream<I>
where
    T: 'static,
    I: IntoIterator<Item = T> + Clone + 'static,
{
    fn subscribe_core(&self, mut downstream: BoxSubscriber<T>) {
        let core = SubscriptionCore::new();
        downstream.on_subscribe(core.subscription());
        for item in self.items.clone() {
            if core.is_done() {
                return;
            }
            downstream.on_item(item);
        }
        if core.is_done() {
            return;
        }
        downstream.on_complete();
        core.mark_done();
    }
}

struct RangeStream {
    start: i64,
    count: u32,
}

impl StreamCore<i64> for RangeStream {
    fn subscribe_core(&self, mut downstream: BoxSubscriber<i64>) {
        let core = SubscriptionCore::new();
        downstream.on_subscribe(core.subscription());
        for offset in 0..self.count {
            if core.is_done() {
                return;
            }
            downstream.on_item(self.start + i64::from(offset));
        }
        if core.is_done() {
            return;
        }
        downstream.on_complete();
        core.mark_done();
    }
}

// ┌─────────────────────────────────────────────┐
// │ Supplier sources                            │
// └─────────────────────────────────────────────┘

struct FallibleStream<F> {
    supplier: Rc<F>,
}

impl<T, F> StreamCore<T> for FallibleStream<F>
where
    T: 'static,
    F: Fn() -> Result<T, StreamError> + 'static,
{
    fn subscribe_core(&self, mut downstream: BoxSubscriber<T>) {
        let core = SubscriptionCore::new();
        downstream.on_subscribe(core.subscription());
        if core.is_done() {
            return;
        }
        match (*self.supplier)() {
            Ok(item) => {
                downstream.on_item(item);
                if core.is_done() {
                    return;
                }
                downstream.on_complete();
            }
            Err(error) => downstream.on_error(error),
        }
        core.mark_done();
    }
}

// ┌─────────────────────────────────────────────┐
// │ create: hand the subscriber to user code    │
// └─────────────────────────────────────────────┘

/// The emission surface handed to a [`Stream::create`] producer. Every call
/// checks done-state, so a producer that keeps emitting after a cancel or a
/// terminal is harmless.
pub struct Emitter<T> {
    downstream: super::SharedSubscriber<T>,
    core: SubscriptionCore,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            downstream: Rc::clone(&self.downstream),
            core: self.core.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<T> Emitter<T> {
    pub fn next(&self, item: T) {
        if self.core.is_done() {
            return;
        }
        self.downstream.borrow_mut().on_item(item);
    }

    pub fn error(&self, error: StreamError) {
        if self.core.is_done() {
            return;
        }
        self.downstream.borrow_mut().on_error(error);
        self.core.mark_done();
    }

    pub fn complete(&self) {
        if self.core.is_done() {
            return;
        }
        self.downstream.borrow_mut().on_complete();
        self.core.mark_done();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool { self.core.is_done() }
}

struct CreateStream<F> {
    producer: Rc<F>,
}

impl<T, F> StreamCore<T> for CreateStream<F>
where
    T: 'static,
    F: Fn(Emitter<T>) + 'static,
{
    fn subscribe_core(&self, downstream: BoxSubscriber<T>) {
        let core = SubscriptionCore::new();
        let downstream = share_subscriber(downstream);
        downstream.borrow_mut().on_subscribe(core.subscription());
        (*self.producer)(Emitter { downstream, core });
    }
}

// ┌─────────────────────────────────────────────┐
// │ Scheduler-driven sources                    │
// └─────────────────────────────────────────────┘

struct PeriodicStream {
    scheduler: Scheduler,
    period: u64,
}

impl StreamCore<u64> for PeriodicStream {
    fn subscribe_core(&self, downstream: BoxSubscriber<u64>) {
        let core = SubscriptionCore::new();
        let downstream = share_subscriber(downstream);
        downstream.borrow_mut().on_subscribe(core.subscription());

        let tick_core = core.clone();
        let tick_downstream = Rc::clone(&downstream);
        let mut tick: u64 = 0;
        let handle = self.scheduler.schedule_at_fixed_rate(
            "periodic",
            move || {
                if tick_core.is_done() {
                    return;
                }
                let current = tick;
                tick += 1;
                tick_downstream.borrow_mut().on_item(current);
            },
            self.period,
        );
        // Cancelling the subscription must also disarm the timer. If the
        // subscriber cancelled during on_subscribe, attach_upstream cancels
        // the freshly armed timer right here.
        core.attach_upstream(Subscription::from_timer(handle));
    }
}

struct GenerateStream<F> {
    scheduler: Scheduler,
    supplier: Rc<F>,
    period: u64,
}

impl<T, F> StreamCore<T> for GenerateStream<F>
where
    T: 'static,
    F: Fn() -> T + 'static,
{
    fn subscribe_core(&self, downstream: BoxSubscriber<T>) {
        let core = SubscriptionCore::new();
        let downstream = share_subscriber(downstream);
        downstream.borrow_mut().on_subscribe(core.subscription());

        let tick_core = core.clone();
        let tick_downstream = Rc::clone(&downstream);
        let supplier = Rc::clone(&self.supplier);
        let handle = self.scheduler.schedule_at_fixed_rate(
            "generate",
            move || {
                if tick_core.is_done() {
                    return;
                }
                let item = (*supplier)();
                tick_downstream.borrow_mut().on_item(item);
            },
            self.period,
        );
        core.attach_upstream(Subscription::from_timer(handle));
    }
}

// ┌─────────────────────────────────────────────┐
// │ Factory surface                             │
// └─────────────────────────────────────────────┘

impl<T: 'static> Stream<T> {
    /// Completes immediately on subscribe.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_core("empty", EmptyStream { _marker: PhantomData })
    }

    /// Emits nothing, ever.
    #[must_use]
    pub fn never() -> Self {
        Self::from_core("never", NeverStream { _marker: PhantomData })
    }

    /// Errors immediately on subscribe.
    #[must_use]
    pub fn fail(error: StreamError) -> Self {
        Self::from_core(
            "fail",
            FailStream {
                error,
                _marker: PhantomData,
            },
        )
    }

    /// Emits the given items in order, then completes.
    #[must_use]
    pub fn of(items: impl IntoIterator<Item = T> + Clone + 'static) -> Self {
        Self::from_core("of", IterStream { items })
    }

    /// Iterates the collection afresh on every subscription.
    #[must_use]
    pub fn from_iter(items: impl IntoIterator<Item = T> + Clone + 'static) -> Self {
        Self::from_core("from_iter", IterStream { items })
    }

    /// Emits one item from the supplier, then completes.
    #[must_use]
    pub fn from_supplier(supplier: impl Fn() -> T + 'static) -> Self {
        Self::from_core(
            "from_supplier",
            FallibleStream {
                supplier: Rc::new(move || Ok(supplier())),
            },
        )
    }

    /// Like [`from_supplier`], but the supplier may fail, which errors the
    /// stream.
    ///
    /// [`from_supplier`]: Self::from_supplier
    #[must_use]
    pub fn from_fallible(
        supplier: impl Fn() -> Result<T, StreamError> + 'static,
    ) -> Self {
        Self::from_core(
            "from_fallible",
            FallibleStream {
                supplier: Rc::new(supplier),
            },
        )
    }

    /// Hands an [`Emitter`] to user code on every subscription.
    #[must_use]
    pub fn create(producer: impl Fn(Emitter<T>) + 'static) -> Self {
        Self::from_core(
            "create",
            CreateStream {
                producer: Rc::new(producer),
            },
        )
    }

    /// Emits `supplier()` every `period` clock units of the unit's
    /// scheduler. Never completes; cancel to stop.
    #[must_use]
    pub fn generate(
        unit: &Unit,
        supplier: impl Fn() -> T + 'static,
        period: u64,
    ) -> Self {
        Self::from_core(
            "generate",
            GenerateStream {
                scheduler: unit.scheduler(),
                supplier: Rc::new(supplier),
                period,
            },
        )
    }
}

impl Stream<i64> {
    /// Emits `start..start + count - 1`, then completes.
    #[must_use]
    pub fn range(start: i64, count: u32) -> Self {
        Self::from_core("range", RangeStream { start, count })
    }
}

impl Stream<u64> {
    /// Emits 0, 1, 2, … every `period` clock units of the unit's scheduler.
    /// Never completes; cancel to stop.
    #[must_use]
    pub fn periodic(unit: &Unit, period: u64) -> Self {
        Self::from_core(
            "periodic",
            PeriodicStream {
                scheduler: unit.scheduler(),
                period,
            },
        )
    }
}
