// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Recovery operators: swap the upstream on error so the downstream
//! observes a single uninterrupted sequence.

use std::rc::Rc;

use crate::error::StreamError;
use crate::stream::stream::StreamCore;
use crate::stream::subscriber::share_subscriber;
use crate::stream::{
    BoxSubscriber, SharedSubscriber, Stream, Subscriber, Subscription,
    SubscriptionCore,
};

pub(crate) struct ResumeStream<T: 'static, F> {
    upstream: Stream<T>,
    handler: Rc<F>,
}

impl<T, F> StreamCore<T> for ResumeStream<T, F>
where
    T: 'static,
    F: Fn(&StreamError) -> Option<Stream<T>> + 'static,
{
    fn subscribe_core(&self, downstream: BoxSubscriber<T>) {
        let core = SubscriptionCore::new();
        let downstream = share_subscriber(downstream);
        downstream.borrow_mut().on_subscribe(core.subscription());
        self.upstream.subscribe_raw(Box::new(ResumePrimarySubscriber {
            core,
            downstream,
            handler: Rc::clone(&self.handler),
        }));
    }
}

/// Faces the original upstream. On error it consults the handler: `Some`
/// swaps in the replacement stream (no re-subscribe downstream), `None`
/// forwards the original error.
struct ResumePrimarySubscriber<T: 'static, F> {
    core: SubscriptionCore,
    downstream: SharedSubscriber<T>,
    handler: Rc<F>,
}

impl<T, F> Subscriber<T> for ResumePrimarySubscriber<T, F>
where
    T: 'static,
    F: Fn(&StreamError) -> Option<Stream<T>> + 'static,
{
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.core.attach_upstream(subscription);
    }

    fn on_item(&mut self, item: T) {
        if self.core.is_done() {
            return;
        }
        self.downstream.borrow_mut().on_item(item);
    }

    fn on_error(&mut self, error: StreamError) {
        if self.core.is_done() {
            return;
        }
        match (*self.handler)(&error) {
            Some(replacement) => {
                replacement.subscribe_raw(Box::new(ResumeReplacementSubscriber {
                    core: self.core.clone(),
                    downstream: Rc::clone(&self.downstream),
                }));
            }
            None => {
                self.downstream.borrow_mut().on_error(error);
                self.core.mark_done();
            }
        }
    }

    fn on_complete(&mut self) {
        if self.core.is_done() {
            return;
        }
        self.downstream.borrow_mut().on_complete();
        self.core.mark_done();
    }
}

/// Faces the replacement upstream. A second failure is final: the
/// replacement's error forwards as-is.
struct ResumeReplacementSubscriber<T: 'static> {
    core: SubscriptionCore,
    downstream: SharedSubscriber<T>,
}

impl<T: 'static> Subscriber<T> for ResumeReplacementSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.core.attach_upstream(subscription);
    }

    fn on_item(&mut self, item: T) {
        if self.core.is_done() {
            return;
        }
        self.downstream.borrow_mut().on_item(item);
    }

    fn on_error(&mut self, error: StreamError) {
        if self.core.is_done() {
            return;
        }
        self.downstream.borrow_mut().on_error(error);
        self.core.mark_done();
    }

    fn on_complete(&mut self) {
        if self.core.is_done() {
            return;
        }
        self.downstream.borrow_mut().on_complete();
        self.core.mark_done();
    }
}

// ┌─────────────────────────────────────────────┐
// │ Fluent surface                              │
// └─────────────────────────────────────────────┘

impl<T: 'static> Stream<T> {
    /// On error, continue with the stream the handler returns. Returning
    /// [`None`] forwards the original error unchanged.
    #[must_use]
    pub fn on_error_resume_with(
        &self,
        handler: impl Fn(&StreamError) -> Option<Stream<T>> + 'static,
    ) -> Stream<T> {
        Stream::from_core(
            "on_error_resume_with",
            ResumeStream {
                upstream: self.clone(),
                handler: Rc::new(handler),
            },
        )
    }

    /// On error, emit `value` and complete.
    #[must_use]
    pub fn rescue_then_return(&self, value: T) -> Stream<T>
    where
        T: Clone,
    {
        self.on_error_resume_with(move |_| Some(Stream::of([value.clone()])))
            .with_name("rescue_then_return")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSubscriber;

    fn items_then_failure() -> Stream<i32> {
        Stream::of([
            Stream::of([1, 2, 3]),
            Stream::fail(StreamError::msg("wire dropped")),
        ])
        .concat()
    }

    #[test]
    fn test_rescue_then_return_continues_with_the_fallback_value() {
        let (subscriber, trace) = RecordingSubscriber::new();
        items_then_failure().rescue_then_return(22).subscribe(subscriber);
        assert_eq!(trace.items(), vec![1, 2, 3, 22]);
        assert!(trace.completed());
        assert_eq!(trace.error(), None);
        assert_eq!(trace.subscribe_count(), 1);
    }

    #[test]
    fn test_resume_with_swaps_in_the_replacement_stream() {
        let (subscriber, trace) = RecordingSubscriber::new();
        items_then_failure()
            .on_error_resume_with(|_| Some(Stream::of([7, 8])))
            .subscribe(subscriber);
        assert_eq!(trace.items(), vec![1, 2, 3, 7, 8]);
        assert!(trace.completed());
    }

    #[test]
    fn test_resume_with_none_forwards_the_original_error() {
        let (subscriber, trace) = RecordingSubscriber::new();
        items_then_failure()
            .on_error_resume_with(|_| None)
            .subscribe(subscriber);
        assert_eq!(trace.items(), vec![1, 2, 3]);
        assert_eq!(trace.error(), Some("wire dropped".into()));
    }

    #[test]
    fn test_replacement_failure_is_final() {
        let calls = std::rc::Rc::new(std::cell::Cell::new(0));
        let calls_clone = std::rc::Rc::clone(&calls);
        let (subscriber, trace) = RecordingSubscriber::<i32>::new();
        Stream::fail(StreamError::msg("first"))
            .on_error_resume_with(move |_| {
                calls_clone.set(calls_clone.get() + 1);
                Some(Stream::fail(StreamError::msg("second")))
            })
            .subscribe(subscriber);
        assert_eq!(calls.get(), 1);
        assert_eq!(trace.error(), Some("second".into()));
    }

    #[test]
    fn test_errors_are_invisible_when_recovery_is_in_place() {
        let (subscriber, trace) = RecordingSubscriber::new();
        Stream::<i32>::fail(StreamError::msg("boom"))
            .rescue_then_return(0)
            .subscribe(subscriber);
        assert_eq!(trace.items(), vec![0]);
        assert!(trace.completed());
    }
}
