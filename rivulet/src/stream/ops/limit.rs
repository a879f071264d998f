// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Prefix and suffix shaping: `take`, `skip`, `default_if_empty`,
//! `start_with`.

use super::ContinuationSubscriber;
use crate::error::StreamError;
use crate::stream::stream::StreamCore;
use crate::stream::{BoxSubscriber, Stream, Subscriber, Subscription, SubscriptionCore};

// ┌─────────────────────────────────────────────┐
// │ take                                        │
// └─────────────────────────────────────────────┘

pub(crate) struct TakeStream<T: 'static> {
    upstream: Stream<T>,
    count: usize,
}

impl<T: 'static> StreamCore<T> for TakeStream<T> {
    fn subscribe_core(&self, downstream: BoxSubscriber<T>) {
        self.upstream.subscribe_raw(Box::new(TakeSubscriber {
            downstream,
            remaining: self.count,
            upstream: None,
            done: false,
        }));
    }
}

/// After the nth item: deliver it, complete downstream, cancel upstream.
struct TakeSubscriber<T> {
    downstream: BoxSubscriber<T>,
    remaining: usize,
    upstream: Option<Subscription>,
    done: bool,
}

impl<T> Subscriber<T> for TakeSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.upstream = Some(subscription.clone());
        self.downstream.on_subscribe(subscription);
        if self.remaining == 0 {
            self.done = true;
            self.downstream.on_complete();
            if let Some(upstream) = &self.upstream {
                upstream.cancel();
            }
        }
    }

    fn on_item(&mut self, item: T) {
        if self.done
            || self.upstream.as_ref().is_some_and(Subscription::is_cancelled)
        {
            return;
        }
        self.remaining -= 1;
        self.downstream.on_item(item);
        if self.remaining > 0 {
            return;
        }
        // The nth item is out. Unless the subscriber cancelled while
        // handling it, complete downstream and cancel upstream.
        if self.upstream.as_ref().is_some_and(Subscription::is_cancelled) {
            self.done = true;
            return;
        }
        self.done = true;
        self.downstream.on_complete();
        if let Some(upstream) = &self.upstream {
            upstream.cancel();
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
// │ skip                                        │
// └─────────────────────────────────────────────┘

pub(crate) struct SkipStream<T: 'static> {
    upstream: Stream<T>,
    count: usize,
}

impl<T: 'static> StreamCore<T> for SkipStream<T> {
    fn subscribe_core(&self, downstream: BoxSubscriber<T>) {
        self.upstream.subscribe_raw(Box::new(SkipSubscriber {
            downstream,
            to_skip: self.count,
            upstream: None,
        }));
    }
}

struct SkipSubscriber<T> {
    downstream: BoxSubscriber<T>,
    to_skip: usize,
    upstream: Option<Subscription>,
}

impl<T> Subscriber<T> for SkipSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.upstream = Some(subscription.clone());
        self.downstream.on_subscribe(subscription);
    }

    fn on_item(&mut self, item: T) {
        if self.upstream.as_ref().is_some_and(Subscription::is_cancelled) {
            return;
        }
        if self.to_skip > 0 {
            self.to_skip -= 1;
            return;
        }
        self.downstream.on_item(item);
    }

    fn on_error(&mut self, error: StreamError) { self.downstream.on_error(error); }

    fn on_complete(&mut self) { self.downstream.on_complete(); }
}

// ┌─────────────────────────────────────────────┐
// │ default_if_empty                            │
// └─────────────────────────────────────────────┘

pub(crate) struct DefaultIfEmptyStream<T: 'static> {
    upstream: Stream<T>,
    default_value: T,
}

impl<T: Clone + 'static> StreamCore<T> for DefaultIfEmptyStream<T> {
    fn subscribe_core(&self, downstream: BoxSubscriber<T>) {
        self.upstream.subscribe_raw(Box::new(DefaultIfEmptySubscriber {
            downstream,
            default_value: self.default_value.clone(),
            saw_item: false,
            core: SubscriptionCore::new(),
        }));
    }
}

struct DefaultIfEmptySubscriber<T> {
    downstream: BoxSubscriber<T>,
    default_value: T,
    saw_item: bool,
    core: SubscriptionCore,
}

impl<T: Clone> Subscriber<T> for DefaultIfEmptySubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.core.attach_upstream(subscription);
        self.downstream.on_subscribe(self.core.subscription());
    }

    fn on_item(&mut self, item: T) {
        if self.core.is_done() {
            return;
        }
        self.saw_item = true;
        self.downstream.on_item(item);
    }

    fn on_error(&mut self, error: StreamError) {
        if self.core.is_done() {
            return;
        }
        self.downstream.on_error(error);
        self.core.mark_done();
    }

    fn on_complete(&mut self) {
        if self.core.is_done() {
            return;
        }
        if !self.saw_item {
            self.downstream.on_item(self.default_value.clone());
            if self.core.is_done() {
                return;
            }
        }
        self.downstream.on_complete();
        self.core.mark_done();
    }
}

// ┌─────────────────────────────────────────────┐
// │ start_with                                  │
// └─────────────────────────────────────────────┘

pub(crate) struct StartWithStream<T: 'static> {
    upstream: Stream<T>,
    prefix: Vec<T>,
}

impl<T: Clone + 'static> StreamCore<T> for StartWithStream<T> {
    fn subscribe_core(&self, mut downstream: BoxSubscriber<T>) {
        let core = SubscriptionCore::new();
        downstream.on_subscribe(core.subscription());
        for item in self.prefix.clone() {
            if core.is_done() {
                return;
            }
            downstream.on_item(item);
        }
        if core.is_done() {
            return;
        }
        self.upstream
            .subscribe_raw(Box::new(ContinuationSubscriber { downstream, core }));
    }
}

// ┌─────────────────────────────────────────────┐
// │ Fluent surface                              │
// └─────────────────────────────────────────────┘

impl<T: 'static> Stream<T> {
    /// Delivers the first `count` items, then completes downstream and
    /// cancels upstream.
    #[must_use]
    pub fn take(&self, count: usize) -> Stream<T> {
        Stream::from_core(
            "take",
            TakeStream {
                upstream: self.clone(),
                count,
            },
        )
    }

    /// Swallows the first `count` items.
    #[must_use]
    pub fn skip(&self, count: usize) -> Stream<T> {
        Stream::from_core(
            "skip",
            SkipStream {
                upstream: self.clone(),
                count,
            },
        )
    }

    /// On complete without any item, emits `default_value` first.
    #[must_use]
    pub fn default_if_empty(&self, default_value: T) -> Stream<T>
    where
        T: Clone,
    {
        Stream::from_core(
            "default_if_empty",
            DefaultIfEmptyStream {
                upstream: self.clone(),
                default_value,
            },
        )
    }

    /// Emits the given items before anything from this stream.
    #[must_use]
    pub fn start_with(&self, prefix: impl IntoIterator<Item = T>) -> Stream<T>
    where
        T: Clone,
    {
        Stream::from_core(
            "start_with",
            StartWithStream {
                upstream: self.clone(),
                prefix: prefix.into_iter().collect(),
            },
        )
    }
}
