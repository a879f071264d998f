// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Pass-through transforms. Each subscription adds at most a handful of
//! fields on top of the shared upstream subscription.

use std::marker::PhantomData;
use std::rc::Rc;

use rustc_hash::FxHashSet;

use crate::error::StreamError;
use crate::stream::stream::StreamCore;
use crate::stream::{BoxSubscriber, Stream, Subscriber, Subscription};

// ┌─────────────────────────────────────────────┐
// │ map                                         │
// └─────────────────────────────────────────────┘

pub(crate) struct MapStream<T: 'static, R, F> {
    upstream: Stream<T>,
    mapper: Rc<F>,
    _marker: PhantomData<fn() -> R>,
}

impl<T, R, F> StreamCore<R> for MapStream<T, R, F>
where
    T: 'static,
    R: 'static,
    F: Fn(T) -> R + 'static,
{
    fn subscribe_core(&self, downstream: BoxSubscriber<R>) {
        self.upstream.subscribe_raw(Box::new(MapSubscriber {
            downstream,
            mapper: Rc::clone(&self.mapper),
            upstream: None,
            _marker: PhantomData,
        }));
    }
}

struct MapSubscriber<T, R, F> {
    downstream: BoxSubscriber<R>,
    mapper: Rc<F>,
    upstream: Option<Subscription>,
    _marker: PhantomData<fn(T) -> R>,
}

impl<T, R, F: Fn(T) -> R> Subscriber<T> for MapSubscriber<T, R, F> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.upstream = Some(subscription.clone());
        self.downstream.on_subscribe(subscription);
    }

    fn on_item(&mut self, item: T) {
        if self.upstream.as_ref().is_some_and(Subscription::is_cancelled) {
            return;
        }
        let mapped = (*self.mapper)(item);
        self.downstream.on_item(mapped);
    }

    fn on_error(&mut self, error: StreamError) { self.downstream.on_error(error); }

    fn on_complete(&mut self) { self.downstream.on_complete(); }
}

// ┌─────────────────────────────────────────────┐
// │ try_map                                     │
// └─────────────────────────────────────────────┘

pub(crate) struct TryMapStream<T: 'static, R, F> {
    upstream: Stream<T>,
    mapper: Rc<F>,
    _marker: PhantomData<fn() -> R>,
}

impl<T, R, F> StreamCore<R> for TryMapStream<T, R, F>
where
    T: 'static,
    R: 'static,
    F: Fn(T) -> Result<R, StreamError> + 'static,
{
    fn subscribe_core(&self, downstream: BoxSubscriber<R>) {
        self.upstream.subscribe_raw(Box::new(TryMapSubscriber {
            downstream,
            mapper: Rc::clone(&self.mapper),
            upstream: None,
            done: false,
            _marker: PhantomData,
        }));
    }
}

/// A failed mapping cancels upstream and becomes the terminal error.
struct TryMapSubscriber<T, R, F> {
    downstream: BoxSubscriber<R>,
    mapper: Rc<F>,
    upstream: Option<Subscription>,
    done: bool,
    _marker: PhantomData<fn(T) -> R>,
}

impl<T, R, F: Fn(T) -> Result<R, StreamError>> Subscriber<T>
    for TryMapSubscriber<T, R, F>
{
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.upstream = Some(subscription.clone());
        self.downstream.on_subscribe(subscription);
    }

    fn on_item(&mut self, item: T) {
        if self.done
            || self.upstream.as_ref().is_some_and(Subscription::is_cancelled)
        {
            return;
        }
        match (*self.mapper)(item) {
            Ok(mapped) => self.downstream.on_item(mapped),
            Err(error) => {
                self.done = true;
                if let Some(upstream) = &self.upstream {
                    upstream.cancel();
                }
                self.downstream.on_error(error);
            }
        }
    }

    fn on_error(&mut self, error: StreamError) {
        if self.done {
            return;
        }
        self.done = true;
        self.downstream.on_error(error);
    }

    fn on_complete(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.downstream.on_complete();
    }
}

// ┌─────────────────────────────────────────────┐
// │ filter                                      │
// └─────────────────────────────────────────────┘

pub(crate) struct FilterStream<T: 'static, P> {
    upstream: Stream<T>,
    predicate: Rc<P>,
}

impl<T, P> StreamCore<T> for FilterStream<T, P>
where
    T: 'static,
    P: Fn(&T) -> bool + 'static,
{
    fn subscribe_core(&self, downstream: BoxSubscriber<T>) {
        self.upstream.subscribe_raw(Box::new(FilterSubscriber {
            downstream,
            predicate: Rc::clone(&self.predicate),
            upstream: None,
        }));
    }
}

struct FilterSubscriber<T, P> {
    downstream: BoxSubscriber<T>,
    predicate: Rc<P>,
    upstream: Option<Subscription>,
}

impl<T, P: Fn(&T) -> bool> Subscriber<T> for FilterSubscriber<T, P> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.upstream = Some(subscription.clone());
        self.downstream.on_subscribe(subscription);
    }

    fn on_item(&mut self, item: T) {
        if self.upstream.as_ref().is_some_and(Subscription::is_cancelled) {
            return;
        }
        if (*self.predicate)(&item) {
            self.downstream.on_item(item);
        }
    }

    fn on_error(&mut self, error: StreamError) { self.downstream.on_error(error); }

    fn on_complete(&mut self) { self.downstream.on_complete(); }
}

// ┌─────────────────────────────────────────────┐
// │ scan                                        │
// └─────────────────────────────────────────────┘

pub(crate) struct ScanStream<T: 'static, A, F> {
    upstream: Stream<T>,
    seed: A,
    accumulate: Rc<F>,
}

impl<T, A, F> StreamCore<A> for ScanStream<T, A, F>
where
    T: 'static,
    A: Clone + 'static,
    F: Fn(A, T) -> A + 'static,
{
    fn subscribe_core(&self, downstream: BoxSubscriber<A>) {
        self.upstream.subscribe_raw(Box::new(ScanSubscriber {
            downstream,
            accumulator: self.seed.clone(),
            accumulate: Rc::clone(&self.accumulate),
            upstream: None,
            _marker: PhantomData,
        }));
    }
}

/// Emits the running accumulation for every upstream item. The seed itself
/// is not emitted.
struct ScanSubscriber<T, A, F> {
    downstream: BoxSubscriber<A>,
    accumulator: A,
    accumulate: Rc<F>,
    upstream: Option<Subscription>,
    _marker: PhantomData<fn(T)>,
}

impl<T, A: Clone, F: Fn(A, T) -> A> Subscriber<T> for ScanSubscriber<T, A, F> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.upstream = Some(subscription.clone());
        self.downstream.on_subscribe(subscription);
    }

    fn on_item(&mut self, item: T) {
        if self.upstream.as_ref().is_some_and(Subscription::is_cancelled) {
            return;
        }
        let next = (*self.accumulate)(self.accumulator.clone(), item);
        self.accumulator = next.clone();
        self.downstream.on_item(next);
    }

    fn on_error(&mut self, error: StreamError) { self.downstream.on_error(error); }

    fn on_complete(&mut self) { self.downstream.on_complete(); }
}

// ┌─────────────────────────────────────────────┐
// │ distinct, filter_successive                 │
// └─────────────────────────────────────────────┘

pub(crate) struct DistinctStream<T: 'static> {
    upstream: Stream<T>,
}

impl<T> StreamCore<T> for DistinctStream<T>
where
    T: Clone + Eq + std::hash::Hash + 'static,
{
    fn subscribe_core(&self, downstream: BoxSubscriber<T>) {
        self.upstream.subscribe_raw(Box::new(DistinctSubscriber {
            downstream,
            seen: FxHashSet::default(),
            upstream: None,
        }));
    }
}

struct DistinctSubscriber<T> {
    downstream: BoxSubscriber<T>,
    seen: FxHashSet<T>,
    upstream: Option<Subscription>,
}

impl<T: Clone + Eq + std::hash::Hash> Subscriber<T> for DistinctSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.upstream = Some(subscription.clone());
        self.downstream.on_subscribe(subscription);
    }

    fn on_item(&mut self, item: T) {
        if self.upstream.as_ref().is_some_and(Subscription::is_cancelled) {
            return;
        }
        if self.seen.insert(item.clone()) {
            self.downstream.on_item(item);
        }
    }

    fn on_error(&mut self, error: StreamError) { self.downstream.on_error(error); }

    fn on_complete(&mut self) { self.downstream.on_complete(); }
}

pub(crate) struct FilterSuccessiveStream<T: 'static, P> {
    upstream: Stream<T>,
    predicate: Rc<P>,
}

impl<T, P> StreamCore<T> for FilterSuccessiveStream<T, P>
where
    T: Clone + 'static,
    P: Fn(&T, &T) -> bool + 'static,
{
    fn subscribe_core(&self, downstream: BoxSubscriber<T>) {
        self.upstream.subscribe_raw(Box::new(FilterSuccessiveSubscriber {
            downstream,
            predicate: Rc::clone(&self.predicate),
            last_emitted: None,
            upstream: None,
        }));
    }
}

/// Passes the current item only when `predicate(last_emitted, current)`
/// holds. The first item always passes.
struct FilterSuccessiveSubscriber<T, P> {
    downstream: BoxSubscriber<T>,
    predicate: Rc<P>,
    last_emitted: Option<T>,
    upstream: Option<Subscription>,
}

impl<T: Clone, P: Fn(&T, &T) -> bool> Subscriber<T>
    for FilterSuccessiveSubscriber<T, P>
{
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.upstream = Some(subscription.clone());
        self.downstream.on_subscribe(subscription);
    }

    fn on_item(&mut self, item: T) {
        if self.upstream.as_ref().is_some_and(Subscription::is_cancelled) {
            return;
        }
        let passes = match &self.last_emitted {
            Some(last) => (*self.predicate)(last, &item),
            None => true,
        };
        if passes {
            self.last_emitted = Some(item.clone());
            self.downstream.on_item(item);
        }
    }

    fn on_error(&mut self, error: StreamError) { self.downstream.on_error(error); }

    fn on_complete(&mut self) { self.downstream.on_complete(); }
}

// ┌─────────────────────────────────────────────┐
// │ Fluent surface                              │
// └─────────────────────────────────────────────┘

impl<T: 'static> Stream<T> {
    #[must_use]
    pub fn map<R: 'static>(&self, mapper: impl Fn(T) -> R + 'static) -> Stream<R> {
        Stream::from_core(
            "map",
            MapStream {
                upstream: self.clone(),
                mapper: Rc::new(mapper),
                _marker: PhantomData,
            },
        )
    }

    /// Like [`map`], but a failed mapping cancels upstream and errors the
    /// stream.
    ///
    /// [`map`]: Self::map
    #[must_use]
    pub fn try_map<R: 'static>(
        &self,
        mapper: impl Fn(T) -> Result<R, StreamError> + 'static,
    ) -> Stream<R> {
        Stream::from_core(
            "try_map",
            TryMapStream {
                upstream: self.clone(),
                mapper: Rc::new(mapper),
                _marker: PhantomData,
            },
        )
    }

    #[must_use]
    pub fn filter(&self, predicate: impl Fn(&T) -> bool + 'static) -> Stream<T> {
        Stream::from_core(
            "filter",
            FilterStream {
                upstream: self.clone(),
                predicate: Rc::new(predicate),
            },
        )
    }

    /// Emits the running accumulation for every item.
    #[must_use]
    pub fn scan<A: Clone + 'static>(
        &self,
        seed: A,
        accumulate: impl Fn(A, T) -> A + 'static,
    ) -> Stream<A> {
        Stream::from_core(
            "scan",
            ScanStream {
                upstream: self.clone(),
                seed,
                accumulate: Rc::new(accumulate),
            },
        )
    }

    /// Drops items already seen (value equality).
    #[must_use]
    pub fn distinct(&self) -> Stream<T>
    where
        T: Clone + Eq + std::hash::Hash,
    {
        Stream::from_core(
            "distinct",
            DistinctStream {
                upstream: self.clone(),
            },
        )
    }

    /// Passes an item only when `predicate(last_emitted, current)` holds.
    #[must_use]
    pub fn filter_successive(
        &self,
        predicate: impl Fn(&T, &T) -> bool + 'static,
    ) -> Stream<T>
    where
        T: Clone,
    {
        Stream::from_core(
            "filter_successive",
            FilterSuccessiveStream {
                upstream: self.clone(),
                predicate: Rc::new(predicate),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSubscriber;

    #[test]
    fn test_map_transforms_every_item() {
        let (subscriber, trace) = RecordingSubscriber::new();
        Stream::range(1, 3).map(|v| v * 10).subscribe(subscriber);
        assert_eq!(trace.items(), vec![10, 20, 30]);
        assert!(trace.completed());
    }

    #[test]
    fn test_map_with_identity_is_identity() {
        let (subscriber, trace) = RecordingSubscriber::new();
        Stream::of([1, 2, 3]).map(|v| v).subscribe(subscriber);
        assert_eq!(trace.items(), vec![1, 2, 3]);
        assert!(trace.completed());
    }

    #[test]
    fn test_try_map_error_cancels_upstream_and_errors_downstream() {
        let (subscriber, trace) = RecordingSubscriber::new();
        Stream::of([1, 2, 3, 4])
            .try_map(|v| {
                if v < 3 {
                    Ok(v)
                } else {
                    Err(StreamError::msg("too big"))
                }
            })
            .subscribe(subscriber);
        assert_eq!(trace.items(), vec![1, 2]);
        assert_eq!(trace.error(), Some("too big".into()));
        assert!(!trace.completed());
    }

    #[test]
    fn test_filter_drops_non_matching_items() {
        let (subscriber, trace) = RecordingSubscriber::new();
        Stream::range(1, 6).filter(|v| v % 2 == 0).subscribe(subscriber);
        assert_eq!(trace.items(), vec![2, 4, 6]);
    }

    #[test]
    fn test_filter_with_always_true_is_identity() {
        let (subscriber, trace) = RecordingSubscriber::new();
        Stream::of([1, 2, 3]).filter(|_| true).subscribe(subscriber);
        assert_eq!(trace.items(), vec![1, 2, 3]);
        assert!(trace.completed());
    }

    #[test]
    fn test_scan_emits_running_accumulation() {
        let (subscriber, trace) = RecordingSubscriber::new();
        Stream::of([1, 2, 3, 4])
            .scan(0, |accumulator, item| accumulator + item)
            .subscribe(subscriber);
        assert_eq!(trace.items(), vec![1, 3, 6, 10]);
    }

    #[test]
    fn test_distinct_drops_repeats_by_value() {
        let (subscriber, trace) = RecordingSubscriber::new();
        Stream::of([1, 2, 1, 3, 2, 4]).distinct().subscribe(subscriber);
        assert_eq!(trace.items(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_filter_successive_compares_against_last_emitted() {
        let (subscriber, trace) = RecordingSubscriber::new();
        // Strictly ascending only.
        Stream::of([1, 3, 2, 5, 4, 6])
            .filter_successive(|last, current| current > last)
            .subscribe(subscriber);
        assert_eq!(trace.items(), vec![1, 3, 5, 6]);
    }
}
