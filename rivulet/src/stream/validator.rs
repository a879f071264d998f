// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Lifecycle validator wrapped around user subscribers when
//! [`validate_subscriptions`] is on.
//!
//! [`validate_subscriptions`]: crate::Config::validate_subscriptions

use super::{BoxSubscriber, Subscriber, Subscription};
use crate::error::{raise_protocol_violation, ProtocolViolation, StreamError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Initial,
    Subscribed,
    Done,
}

/// Asserts the subscription protocol on behalf of a wrapped subscriber:
/// exactly one `on_subscribe` first, at most one terminal, nothing after a
/// terminal. Violating signals are raised via [`raise_protocol_violation`]
/// and, when tolerated, swallowed rather than forwarded.
pub(crate) struct ValidatingSubscriber<T> {
    downstream: BoxSubscriber<T>,
    phase: Phase,
}

impl<T> ValidatingSubscriber<T> {
    pub fn new(downstream: BoxSubscriber<T>) -> Self {
        Self {
            downstream,
            phase: Phase::Initial,
        }
    }

    fn check_live(&self, signal: &'static str) -> bool {
        match self.phase {
            Phase::Initial => {
                raise_protocol_violation(&ProtocolViolation::SignalBeforeSubscribe {
                    signal,
                });
                false
            }
            Phase::Subscribed => true,
            Phase::Done => {
                raise_protocol_violation(&ProtocolViolation::SignalAfterTerminal {
                    signal,
                });
                false
            }
        }
    }
}

impl<T> Subscriber<T> for ValidatingSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        if self.phase != Phase::Initial {
            raise_protocol_violation(&ProtocolViolation::DoubleSubscribe);
            return;
        }
        self.phase = Phase::Subscribed;
        self.downstream.on_subscribe(subscription);
    }

    fn on_item(&mut self, item: T) {
        if self.check_live("on_item") {
            self.downstream.on_item(item);
        }
    }

    fn on_error(&mut self, error: StreamError) {
        if self.check_live("on_error") {
            self.phase = Phase::Done;
            self.downstream.on_error(error);
        }
    }

    fn on_complete(&mut self) {
        if self.check_live("on_complete") {
            self.phase = Phase::Done;
            self.downstream.on_complete();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::SubscriptionCore;
    use crate::testing::{RecordedSignal, RecordingSubscriber, SignalTrace};

    fn subscribed_validator() -> (ValidatingSubscriber<i32>, SignalTrace<i32>) {
        let (subscriber, trace) = RecordingSubscriber::new();
        let mut validator = ValidatingSubscriber::new(Box::new(subscriber));
        validator.on_subscribe(SubscriptionCore::new().subscription());
        (validator, trace)
    }

    #[test]
    fn test_signals_pass_through_in_order() {
        let (mut validator, trace) = subscribed_validator();
        validator.on_item(1);
        validator.on_complete();
        assert_eq!(
            trace.signals(),
            vec![
                RecordedSignal::Subscribe,
                RecordedSignal::Item(1),
                RecordedSignal::Complete,
            ]
        );
    }

    #[test]
    #[should_panic(expected = "protocol violation")]
    fn test_item_after_complete_is_a_violation() {
        let (mut validator, _trace) = subscribed_validator();
        validator.on_complete();
        validator.on_item(1);
    }

    #[test]
    #[should_panic(expected = "protocol violation")]
    fn test_double_terminal_is_a_violation() {
        let (mut validator, _trace) = subscribed_validator();
        validator.on_complete();
        validator.on_error(StreamError::msg("late"));
    }

    #[test]
    #[should_panic(expected = "protocol violation")]
    fn test_item_before_subscribe_is_a_violation() {
        let (subscriber, _trace) = RecordingSubscriber::new();
        let mut validator = ValidatingSubscriber::new(Box::new(subscriber));
        validator.on_item(1);
    }

    #[test]
    #[should_panic(expected = "protocol violation")]
    fn test_double_subscribe_is_a_violation() {
        let (mut validator, _trace) = subscribed_validator();
        validator.on_subscribe(SubscriptionCore::new().subscription());
    }
}
