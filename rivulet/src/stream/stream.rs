// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! [`Stream`]: a lazy description of how to produce items.
//!
//! A stream is pure until subscribed: it holds only its construction
//! parameters (and an optional debug name), and may be subscribed any
//! number of times, each subscription being independent. The fluent
//! operator surface is spread across the `sources`, `ops`, and `hub`
//! modules — each contributes its own `impl Stream` block.

use std::rc::Rc;

use super::{BoxSubscriber, Subscriber};
use super::subscriber::FnSubscriber;
use super::validator::ValidatingSubscriber;
use crate::config;

/// What a stream description knows how to do: wire a subscriber to a fresh
/// subscription.
pub(crate) trait StreamCore<T> {
    fn subscribe_core(&self, downstream: BoxSubscriber<T>);
}

/// A lazy, lifecycle-managed sequence of items terminated by either a
/// completion or an error signal. Cheap to clone; clones share the
/// description, never live state.
pub struct Stream<T: 'static> {
    core: Rc<dyn StreamCore<T>>,
    name: Option<Rc<str>>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            name: self.name.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").field("name", &self.name).finish_non_exhaustive()
    }
}

impl<T: 'static> Stream<T> {
    /// The name is recorded only when [`names_enabled`].
    ///
    /// [`names_enabled`]: crate::Config::names_enabled
    pub(crate) fn from_core(name: &str, core: impl StreamCore<T> + 'static) -> Self {
        Self {
            core: Rc::new(core),
            name: config().names_enabled.then(|| Rc::from(name)),
        }
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> { self.name.as_deref() }

    /// Override the recorded debug name.
    #[must_use]
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = config().names_enabled.then(|| Rc::from(name));
        self
    }

    /// Operator-to-operator subscription; no validator interposed.
    pub(crate) fn subscribe_raw(&self, downstream: BoxSubscriber<T>) {
        self.core.subscribe_core(downstream);
    }

    /// Subscribe a sink. When [`validate_subscriptions`] is on, the sink is
    /// wrapped in a lifecycle validator first.
    ///
    /// [`validate_subscriptions`]: crate::Config::validate_subscriptions
    pub fn subscribe(&self, subscriber: impl Subscriber<T> + 'static) {
        let boxed: BoxSubscriber<T> = Box::new(subscriber);
        if config().validate_subscriptions {
            self.subscribe_raw(Box::new(ValidatingSubscriber::new(boxed)));
        } else {
            self.subscribe_raw(boxed);
        }
    }

    /// Subscribe the default terminal sink: items go to `on_item`, errors
    /// go to the log.
    pub fn subscribe_fn(&self, on_item: impl FnMut(T) + 'static) {
        self.subscribe(FnSubscriber {
            item_fn: on_item,
            subscription: None,
            _marker: std::marker::PhantomData,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSubscriber;

    #[test]
    fn test_streams_are_pure_until_subscribed_and_reusable() {
        let stream = Stream::range(1, 3);

        let (first, first_trace) = RecordingSubscriber::new();
        let (second, second_trace) = RecordingSubscriber::new();
        stream.subscribe(first);
        stream.subscribe(second);

        assert_eq!(first_trace.items(), vec![1, 2, 3]);
        assert_eq!(second_trace.items(), vec![1, 2, 3]);
        assert!(first_trace.completed());
        assert!(second_trace.completed());
    }

    #[test]
    fn test_with_name_overrides_the_recorded_name() {
        if !crate::config().names_enabled {
            return;
        }
        let stream = Stream::range(1, 3).with_name("answers");
        assert_eq!(stream.name(), Some("answers"));
    }

    #[test]
    fn test_subscribe_fn_receives_items() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        Stream::range(10, 2).subscribe_fn(move |item| seen_clone.borrow_mut().push(item));
        assert_eq!(*seen.borrow(), vec![10, 11]);
    }
}
