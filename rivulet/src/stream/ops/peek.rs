// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Side-effect taps around each lifecycle signal.

use std::rc::Rc;

use crate::error::StreamError;
use crate::stream::stream::StreamCore;
use crate::stream::{BoxSubscriber, Stream, Subscriber, Subscription};

type ItemCallback<T> = Rc<dyn Fn(&T)>;
type ErrorCallback = Rc<dyn Fn(&StreamError)>;
type UnitCallback = Rc<dyn Fn()>;

pub(crate) struct PeekCallbacks<T> {
    before_item: Option<ItemCallback<T>>,
    after_item: Option<ItemCallback<T>>,
    before_error: Option<ErrorCallback>,
    after_error: Option<ErrorCallback>,
    before_complete: Option<UnitCallback>,
    after_complete: Option<UnitCallback>,
    /// Runs before either terminal signal is forwarded.
    on_terminate: Option<UnitCallback>,
}

impl<T> Default for PeekCallbacks<T> {
    fn default() -> Self {
        Self {
            before_item: None,
            after_item: None,
            before_error: None,
            after_error: None,
            before_complete: None,
            after_complete: None,
            on_terminate: None,
        }
    }
}

impl<T> Clone for PeekCallbacks<T> {
    fn clone(&self) -> Self {
        Self {
            before_item: self.before_item.clone(),
            after_item: self.after_item.clone(),
            before_error: self.before_error.clone(),
            after_error: self.after_error.clone(),
            before_complete: self.before_complete.clone(),
            after_complete: self.after_complete.clone(),
            on_terminate: self.on_terminate.clone(),
        }
    }
}

pub(crate) struct PeekStream<T: 'static> {
    upstream: Stream<T>,
    callbacks: PeekCallbacks<T>,
}

impl<T: Clone + 'static> StreamCore<T> for PeekStream<T> {
    fn subscribe_core(&self, downstream: BoxSubscriber<T>) {
        self.upstream.subscribe_raw(Box::new(PeekSubscriber {
            downstream,
            callbacks: self.callbacks.clone(),
            upstream: None,
        }));
    }
}

struct PeekSubscriber<T> {
    downstream: BoxSubscriber<T>,
    callbacks: PeekCallbacks<T>,
    upstream: Option<Subscription>,
}

impl<T> PeekSubscriber<T> {
    fn is_cancelled(&self) -> bool {
        self.upstream.as_ref().is_some_and(Subscription::is_cancelled)
    }
}

impl<T: Clone> Subscriber<T> for PeekSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.upstream = Some(subscription.clone());
        self.downstream.on_subscribe(subscription);
    }

    fn on_item(&mut self, item: T) {
        if self.is_cancelled() {
            return;
        }
        if let Some(callback) = &self.callbacks.before_item {
            (**callback)(&item);
        }
        let after = self
            .callbacks
            .after_item
            .clone()
            .map(|callback| (callback, item.clone()));
        self.downstream.on_item(item);
        if let Some((callback, delivered)) = after {
            if !self.is_cancelled() {
                (*callback)(&delivered);
            }
        }
    }

    fn on_error(&mut self, error: StreamError) {
        if let Some(callback) = &self.callbacks.before_error {
            (**callback)(&error);
        }
        if let Some(callback) = &self.callbacks.on_terminate {
            (**callback)();
        }
        self.downstream.on_error(error.clone());
        if let Some(callback) = &self.callbacks.after_error {
            (**callback)(&error);
        }
    }

    fn on_complete(&mut self) {
        if let Some(callback) = &self.callbacks.before_complete {
            (**callback)();
        }
        if let Some(callback) = &self.callbacks.on_terminate {
            (**callback)();
        }
        self.downstream.on_complete();
        if let Some(callback) = &self.callbacks.after_complete {
            (**callback)();
        }
    }
}

// ┌─────────────────────────────────────────────┐
// │ Fluent surface                              │
// └─────────────────────────────────────────────┘

impl<T: Clone + 'static> Stream<T> {
    fn peek_with(&self, name: &str, callbacks: PeekCallbacks<T>) -> Stream<T> {
        Stream::from_core(
            name,
            PeekStream {
                upstream: self.clone(),
                callbacks,
            },
        )
    }

    /// Observes each item before it is forwarded downstream.
    #[must_use]
    pub fn peek(&self, callback: impl Fn(&T) + 'static) -> Stream<T> {
        self.peek_with(
            "peek",
            PeekCallbacks {
                before_item: Some(Rc::new(callback)),
                ..PeekCallbacks::default()
            },
        )
    }

    /// Observes each item after the downstream handled it.
    #[must_use]
    pub fn after_next(&self, callback: impl Fn(&T) + 'static) -> Stream<T> {
        self.peek_with(
            "after_next",
            PeekCallbacks {
                after_item: Some(Rc::new(callback)),
                ..PeekCallbacks::default()
            },
        )
    }

    /// Observes the error before it is forwarded.
    #[must_use]
    pub fn peek_on_error(
        &self,
        callback: impl Fn(&StreamError) + 'static,
    ) -> Stream<T> {
        self.peek_with(
            "peek_on_error",
            PeekCallbacks {
                before_error: Some(Rc::new(callback)),
                ..PeekCallbacks::default()
            },
        )
    }

    /// Observes the error after the downstream handled it.
    #[must_use]
    pub fn after_error(
        &self,
        callback: impl Fn(&StreamError) + 'static,
    ) -> Stream<T> {
        self.peek_with(
            "after_error",
            PeekCallbacks {
                after_error: Some(Rc::new(callback)),
                ..PeekCallbacks::default()
            },
        )
    }

    /// Observes completion before it is forwarded.
    #[must_use]
    pub fn peek_on_complete(&self, callback: impl Fn() + 'static) -> Stream<T> {
        self.peek_with(
            "peek_on_complete",
            PeekCallbacks {
                before_complete: Some(Rc::new(callback)),
                ..PeekCallbacks::default()
            },
        )
    }

    /// Observes completion after the downstream handled it.
    #[must_use]
    pub fn after_complete(&self, callback: impl Fn() + 'static) -> Stream<T> {
        self.peek_with(
            "after_complete",
            PeekCallbacks {
                after_complete: Some(Rc::new(callback)),
                ..PeekCallbacks::default()
            },
        )
    }

    /// Observes either terminal, before it is forwarded.
    #[must_use]
    pub fn on_terminate(&self, callback: impl Fn() + 'static) -> Stream<T> {
        self.peek_with(
            "on_terminate",
            PeekCallbacks {
                on_terminate: Some(Rc::new(callback)),
                ..PeekCallbacks::default()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::testing::RecordingSubscriber;

    #[test]
    fn test_peek_observes_every_forwarded_item() {
        let peeked = Rc::new(RefCell::new(Vec::new()));
        let peeked_clone = Rc::clone(&peeked);
        let (subscriber, trace) = RecordingSubscriber::new();
        Stream::range(1, 3)
            .peek(move |item| peeked_clone.borrow_mut().push(*item))
            .subscribe(subscriber);
        assert_eq!(*peeked.borrow(), vec![1, 2, 3]);
        assert_eq!(trace.items(), vec![1, 2, 3]);
    }

    #[test]
    fn test_peeks_on_both_sides_of_a_take() {
        // range(42, 20).peek(P1).take(5).peek(P2): both taps see exactly the
        // five delivered items; upstream is cancelled at the fifth.
        let first = Rc::new(RefCell::new(Vec::new()));
        let second = Rc::new(RefCell::new(Vec::new()));
        let first_clone = Rc::clone(&first);
        let second_clone = Rc::clone(&second);
        let (subscriber, trace) = RecordingSubscriber::new();

        Stream::range(42, 20)
            .peek(move |item| first_clone.borrow_mut().push(*item))
            .take(5)
            .peek(move |item| second_clone.borrow_mut().push(*item))
            .subscribe(subscriber);

        assert_eq!(*first.borrow(), vec![42, 43, 44, 45, 46]);
        assert_eq!(*second.borrow(), vec![42, 43, 44, 45, 46]);
        assert_eq!(trace.items(), vec![42, 43, 44, 45, 46]);
        assert!(trace.completed());
    }

    #[test]
    fn test_after_next_runs_after_the_downstream_handled_the_item() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let order_after = Rc::clone(&order);
        let order_sink = Rc::clone(&order);
        Stream::of([1])
            .after_next(move |item| order_after.borrow_mut().push(format!("after {item}")))
            .subscribe_fn(move |item| order_sink.borrow_mut().push(format!("sink {item}")));
        assert_eq!(*order.borrow(), vec!["sink 1", "after 1"]);
    }

    #[test]
    fn test_terminate_tap_fires_for_error_and_complete() {
        let count = Rc::new(RefCell::new(0));

        let count_clone = Rc::clone(&count);
        let (subscriber, _trace) = RecordingSubscriber::new();
        Stream::of([1])
            .on_terminate(move || *count_clone.borrow_mut() += 1)
            .subscribe(subscriber);

        let count_clone = Rc::clone(&count);
        let (subscriber, _trace) = RecordingSubscriber::<i32>::new();
        Stream::fail(StreamError::msg("boom"))
            .on_terminate(move || *count_clone.borrow_mut() += 1)
            .subscribe(subscriber);

        assert_eq!(*count.borrow(), 2);
    }

    #[test]
    fn test_error_taps_bracket_the_forwarded_error() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let before = Rc::clone(&order);
        let after = Rc::clone(&order);
        let (subscriber, trace) = RecordingSubscriber::<i32>::new();
        Stream::fail(StreamError::msg("boom"))
            .peek_on_error(move |error| before.borrow_mut().push(format!("before {error}")))
            .after_error(move |error| after.borrow_mut().push(format!("after {error}")))
            .subscribe(subscriber);
        assert_eq!(trace.error(), Some("boom".into()));
        assert_eq!(*order.borrow(), vec!["before boom", "after boom"]);
    }
}
