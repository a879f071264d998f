// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! # rivulet
//!
//! A push-based reactive dataflow engine: programs describe computations as
//! compositions of [`Stream`]s — lazy, lifecycle-managed sequences of items
//! terminated by either a completion or an error signal — and execute them
//! under a cooperative, single-threaded scheduler that interposes
//! asynchronous boundaries between operator stages.
//!
//! Three subsystems carry the weight:
//!
//! 1. **The subscription protocol** ([`stream::subscriber`]): the contract
//!    every stage obeys about signal ordering, cancellation propagation,
//!    and mutual exclusion of terminals.
//! 2. **The operators** ([`stream::ops`], [`stream::hub`]): per-subscription
//!    bookkeeping for mapping, limiting, merging, switching, throttling,
//!    debouncing, buffering, and multicasting.
//! 3. **The scheduler core** ([`sched`]): priority task queues drained in
//!    rounds with runaway detection, a virtual monotonic clock with delayed
//!    and periodic timers, and processor units whose activation protocol
//!    makes a single current unit observable from task bodies.
//!
//! ## Synchronous composition
//!
//! ```
//! use std::{cell::RefCell, rc::Rc};
//! use rivulet::Stream;
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let seen_clone = Rc::clone(&seen);
//! Stream::range(1, 5)
//!     .map(|v| v * 2)
//!     .take(3)
//!     .subscribe_fn(move |v| seen_clone.borrow_mut().push(v));
//! assert_eq!(*seen.borrow(), vec![2, 4, 6]);
//! ```
//!
//! ## Driving the virtual clock
//!
//! ```
//! use std::{cell::RefCell, rc::Rc};
//! use rivulet::{Stream, Unit};
//!
//! let unit = Unit::new("main");
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let seen_clone = Rc::clone(&seen);
//! Stream::periodic(&unit, 100)
//!     .take(2)
//!     .subscribe_fn(move |tick| seen_clone.borrow_mut().push(tick));
//!
//! unit.advance_by(250);
//! assert_eq!(*seen.borrow(), vec![0, 1]);
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_in_result))]

// Attach sources.
pub mod config;
pub mod core;
pub mod error;
pub mod sched;
pub mod stream;
pub mod testing;

// Re-export. `self::core` disambiguates from the `core` crate in the
// extern prelude.
pub use self::core::*;
pub use config::*;
pub use error::*;
pub use sched::*;
pub use stream::*;
