// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Error types for the engine.
//!
//! Two families live here:
//!
//! 1. [`StreamError`] — the terminal error *signal* that travels downstream
//!    through a subscription chain. It is cheap to clone because multicast
//!    hubs latch it and replay it to late subscribers.
//! 2. [`ProtocolViolation`] — engine misuse (double subscribe, signal after
//!    terminal, nested activation). These are bugs in the calling code, not
//!    data-plane errors. When [`check_invariants`] is on they panic; otherwise
//!    they are logged and tolerated, forfeiting the protocol guarantees.
//!
//! [`check_invariants`]: crate::Config::check_invariants

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::rc::Rc;

/// The error signal delivered to [`Subscriber::on_error`]. Clonable so that
/// hubs can latch and re-deliver it.
///
/// [`Subscriber::on_error`]: crate::stream::Subscriber::on_error
#[derive(Clone, Debug)]
pub struct StreamError {
    inner: Rc<dyn Error + 'static>,
}

impl StreamError {
    pub fn new(source: impl Error + 'static) -> Self {
        Self {
            inner: Rc::new(source),
        }
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(MessageError {
            message: message.into(),
        })
    }

    #[must_use]
    pub fn as_dyn(&self) -> &(dyn Error + 'static) { &*self.inner }
}

impl Display for StreamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult { self.inner.fmt(f) }
}

/// For tests and simple comparisons; two errors are equal when they render
/// the same.
impl PartialEq for StreamError {
    fn eq(&self, other: &Self) -> bool { self.to_string() == other.to_string() }
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
struct MessageError {
    message: String,
}

/// Engine misuse. Each variant carries a diagnostic code and actionable help
/// text.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ProtocolViolation {
    /// A subscriber received a second `on_subscribe`.
    #[error("subscriber received on_subscribe twice")]
    #[diagnostic(
        code(rivulet::protocol::double_subscribe),
        help(
            "A subscriber instance binds to exactly one subscription. \
             Subscribe a fresh subscriber instead of reusing this one."
        )
    )]
    DoubleSubscribe,

    /// An `on_item`, `on_error`, or `on_complete` arrived before
    /// `on_subscribe`.
    #[error("{signal} delivered before on_subscribe")]
    #[diagnostic(
        code(rivulet::protocol::signal_before_subscribe),
        help("Every stage must deliver on_subscribe strictly first.")
    )]
    SignalBeforeSubscribe {
        /// Which signal jumped the gun.
        signal: &'static str,
    },

    /// A signal arrived after `on_error`, `on_complete`, or a cancel.
    #[error("{signal} delivered after the subscription was already done")]
    #[diagnostic(
        code(rivulet::protocol::signal_after_terminal),
        help(
            "error and complete are terminal and mutually exclusive, and \
             nothing may be delivered after cancel. The upstream stage is \
             not honoring done-state checks."
        )
    )]
    SignalAfterTerminal {
        /// Which signal arrived late.
        signal: &'static str,
    },

    /// [`Unit::activate`] called while another unit is already current on
    /// this thread.
    ///
    /// [`Unit::activate`]: crate::sched::Unit::activate
    #[error("unit '{unit}' activated while '{current}' is already current")]
    #[diagnostic(
        code(rivulet::sched::nested_activation),
        help(
            "Only one processor unit may be active on a thread, and \
             activation must not nest. Schedule a task on the other unit \
             instead of activating it from inside a task body."
        )
    )]
    NestedActivation {
        unit: String,
        current: String,
    },

    /// A task was enqueued while it was already sitting in a queue.
    #[error("task '{task}' enqueued while already queued")]
    #[diagnostic(
        code(rivulet::sched::task_already_queued),
        help(
            "A task may not be enqueued twice concurrently. Wait for it to \
             run (or cancel it) before enqueueing it again."
        )
    )]
    TaskAlreadyQueued {
        task: String,
    },
}

/// Raise a protocol violation: panic under [`check_invariants`], warn
/// otherwise.
///
/// # Panics
///
/// Panics when [`check_invariants`] is enabled.
///
/// [`check_invariants`]: crate::Config::check_invariants
pub fn raise_protocol_violation(violation: &ProtocolViolation) {
    if crate::config().check_invariants {
        panic!("protocol violation: {violation}");
    }
    tracing::warn!(%violation, "protocol violation tolerated");
}
