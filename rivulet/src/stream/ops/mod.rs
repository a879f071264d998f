// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Operator implementations. Each file contributes its own `impl Stream`
//! block to the fluent surface.

// Attach sources.
pub mod boundary;
pub mod collect;
pub mod limit;
pub mod merge;
pub mod peek;
pub mod recover;
pub mod switch;
pub mod timed;
pub mod transform;

// Re-export.
pub use boundary::*;
pub use collect::*;
pub use limit::*;
pub use merge::*;
pub use peek::*;
pub use recover::*;
pub use switch::*;
pub use timed::*;
pub use transform::*;

use crate::error::StreamError;
use crate::stream::{BoxSubscriber, Subscriber, Subscription, SubscriptionCore};

/// Forwards signals from a late-attached upstream into a downstream whose
/// `on_subscribe` already happened. Used wherever an operator splices a new
/// upstream into an existing logical sequence (`start_with` after its
/// prefix, `subscribe_on` after the hop).
pub(crate) struct ContinuationSubscriber<T> {
    pub downstream: BoxSubscriber<T>,
    pub core: SubscriptionCore,
}

impl<T> Subscriber<T> for ContinuationSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        // The downstream already holds this stage's subscription; only the
        // upstream slot moves.
        self.core.attach_upstream(subscription);
    }

    fn on_item(&mut self, item: T) {
        if self.core.is_done() {
            return;
        }
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
        self.downstream.on_complete();
        self.core.mark_done();
    }
}
