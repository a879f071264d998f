// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Virtual monotonic clock plus a timer queue for delayed and periodic
//! tasks.
//!
//! The clock unit is intended to be milliseconds, but nothing relates it to
//! wall-clock time: the owning [`Unit`] advances it programmatically and
//! fires due timers along the way. A delayed task fires at `now() + delay`;
//! the firing time may drift forward (the clock only moves when the driver
//! moves it) but never earlier.
//!
//! [`Unit`]: crate::sched::Unit

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use smallvec::SmallVec;

use super::{Task, TaskPriority};

struct TimerFlags {
    cancelled: Cell<bool>,
}

#[derive(Clone)]
struct TimerRecord {
    flags: Rc<TimerFlags>,
    runnable: Rc<RefCell<dyn FnMut()>>,
    /// 0 = one-shot; p >= 1 re-fires at `last_fire + p`.
    period: u64,
    name: Option<Rc<str>>,
}

struct TimerEntry {
    due: u64,
    /// Insertion order; ties on `due` fire in insertion order.
    seq: u64,
    record: TimerRecord,
}

struct SchedulerState {
    now: u64,
    next_seq: u64,
    timers: Vec<TimerEntry>,
    is_shut_down: bool,
}

/// See the [module docs](self). Cheap to clone; clones share the clock and
/// the timer queue.
#[derive(Clone)]
pub struct Scheduler {
    state: Rc<RefCell<SchedulerState>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Scheduler")
            .field("now", &state.now)
            .field("pending_timers", &state.timers.len())
            .field("is_shut_down", &state.is_shut_down)
            .finish()
    }
}

impl Default for Scheduler {
    fn default() -> Self { Self::new() }
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(SchedulerState {
                now: 0,
                next_seq: 0,
                timers: Vec::new(),
                is_shut_down: false,
            })),
        }
    }

    /// The current virtual time. Monotonically non-decreasing.
    #[must_use]
    pub fn now(&self) -> u64 { self.state.borrow().now }

    /// Run `runnable` once, `delay` clock units from now.
    pub fn schedule(
        &self,
        name: &str,
        runnable: impl FnMut() + 'static,
        delay: u64,
    ) -> TimerHandle {
        self.insert(name, runnable, delay, 0)
    }

    /// Run `runnable` every `period` clock units, first firing at
    /// `now() + period`. A period of 0 degenerates to a one-shot that fires
    /// on the next clock advance.
    pub fn schedule_at_fixed_rate(
        &self,
        name: &str,
        runnable: impl FnMut() + 'static,
        period: u64,
    ) -> TimerHandle {
        self.insert(name, runnable, period, period)
    }

    fn insert(
        &self,
        name: &str,
        runnable: impl FnMut() + 'static,
        delay: u64,
        period: u64,
    ) -> TimerHandle {
        let flags = Rc::new(TimerFlags {
            cancelled: Cell::new(false),
        });
        let mut state = self.state.borrow_mut();
        if state.is_shut_down {
            // Late arrivals after shutdown are born cancelled.
            flags.cancelled.set(true);
            return TimerHandle { flags };
        }
        let record = TimerRecord {
            flags: Rc::clone(&flags),
            runnable: Rc::new(RefCell::new(runnable)),
            period,
            name: crate::config().names_enabled.then(|| Rc::from(name)),
        };
        let due = state.now + delay;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.timers.push(TimerEntry { due, seq, record });
        TimerHandle { flags }
    }

    /// Earliest due time among live timers.
    #[must_use]
    pub fn next_due(&self) -> Option<u64> {
        self.state
            .borrow()
            .timers
            .iter()
            .filter(|entry| !entry.record.flags.cancelled.get())
            .map(|entry| entry.due)
            .min()
    }

    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.state
            .borrow()
            .timers
            .iter()
            .filter(|entry| !entry.record.flags.cancelled.get())
            .count()
    }

    /// Move the clock to `instant` and convert every timer due by then into
    /// a runnable [`Task`], in (due, insertion) order. Periodic timers are
    /// re-armed at `due + period` before their task runs, so the next fire
    /// time never depends on how long the body takes.
    pub(crate) fn take_due(&self, instant: u64) -> SmallVec<[Task; 4]> {
        let mut state = self.state.borrow_mut();
        state.now = state.now.max(instant);

        let mut due_entries: Vec<TimerEntry> = Vec::new();
        let mut index = 0;
        while index < state.timers.len() {
            let entry = &state.timers[index];
            if entry.record.flags.cancelled.get() {
                state.timers.swap_remove(index);
            } else if entry.due <= instant {
                due_entries.push(state.timers.swap_remove(index));
            } else {
                index += 1;
            }
        }
        due_entries.sort_by_key(|entry| (entry.due, entry.seq));

        let mut tasks = SmallVec::new();
        for entry in due_entries {
            if entry.record.period >= 1 {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.timers.push(TimerEntry {
                    due: entry.due + entry.record.period,
                    seq,
                    record: entry.record.clone(),
                });
            }
            let record = entry.record;
            let name = record.name.as_deref().unwrap_or("timer").to_string();
            tasks.push(Task::new(&name, TaskPriority::Default, move || {
                if record.flags.cancelled.get() {
                    return;
                }
                (*record.runnable.borrow_mut())();
            }));
        }
        tasks
    }

    /// Move the clock forward without firing anything. Used by the driver
    /// after all due timers have been dispatched.
    pub(crate) fn advance_clock_to(&self, instant: u64) {
        let mut state = self.state.borrow_mut();
        state.now = state.now.max(instant);
    }

    /// Cancel every timer whose fire time has not passed. A task already
    /// handed to the executor runs to completion; new schedule calls are
    /// rejected.
    pub fn shutdown(&self) {
        let mut state = self.state.borrow_mut();
        state.is_shut_down = true;
        for entry in state.timers.drain(..) {
            entry.record.flags.cancelled.set(true);
        }
        tracing::debug!("scheduler shut down; pending timers cancelled");
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool { self.state.borrow().is_shut_down }
}

/// Cancel capability for a scheduled timer. Idempotent.
#[derive(Clone)]
pub struct TimerHandle {
    flags: Rc<TimerFlags>,
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancelled", &self.flags.cancelled.get())
            .finish()
    }
}

impl TimerHandle {
    pub fn cancel(&self) { self.flags.cancelled.set(true); }

    #[must_use]
    pub fn is_cancelled(&self) -> bool { self.flags.cancelled.get() }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    fn run_all(tasks: SmallVec<[Task; 4]>) {
        for task in tasks {
            task.run();
        }
    }

    #[test]
    fn test_one_shot_fires_at_now_plus_delay() {
        let scheduler = Scheduler::new();
        let fired = Rc::new(RefCell::new(Vec::new()));
        let fired_clone = Rc::clone(&fired);
        scheduler.schedule("t", move || fired_clone.borrow_mut().push("t"), 50);

        assert_eq!(scheduler.next_due(), Some(50));
        run_all(scheduler.take_due(49));
        assert!(fired.borrow().is_empty());
        run_all(scheduler.take_due(50));
        assert_eq!(*fired.borrow(), vec!["t"]);
        assert_eq!(scheduler.now(), 50);
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[test]
    fn test_periodic_re_fires_at_last_fire_plus_period() {
        let scheduler = Scheduler::new();
        let count = Rc::new(RefCell::new(0));
        let count_clone = Rc::clone(&count);
        scheduler.schedule_at_fixed_rate("p", move || *count_clone.borrow_mut() += 1, 100);

        run_all(scheduler.take_due(100));
        assert_eq!(*count.borrow(), 1);
        assert_eq!(scheduler.next_due(), Some(200));
        run_all(scheduler.take_due(200));
        assert_eq!(*count.borrow(), 2);
        assert_eq!(scheduler.next_due(), Some(300));
    }

    #[test]
    fn test_cancelled_timer_does_not_fire() {
        let scheduler = Scheduler::new();
        let count = Rc::new(RefCell::new(0));
        let count_clone = Rc::clone(&count);
        let handle =
            scheduler.schedule("t", move || *count_clone.borrow_mut() += 1, 10);
        handle.cancel();
        handle.cancel();
        run_all(scheduler.take_due(10));
        assert_eq!(*count.borrow(), 0);
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[test]
    fn test_ties_on_due_time_fire_in_insertion_order() {
        let scheduler = Scheduler::new();
        let fired = Rc::new(RefCell::new(Vec::new()));
        for label in ["a", "b", "c"] {
            let fired_clone = Rc::clone(&fired);
            scheduler.schedule(label, move || fired_clone.borrow_mut().push(label), 5);
        }
        run_all(scheduler.take_due(5));
        assert_eq!(*fired.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_shutdown_cancels_pending_and_rejects_new_timers() {
        let scheduler = Scheduler::new();
        let count = Rc::new(RefCell::new(0));
        let count_clone = Rc::clone(&count);
        scheduler.schedule("t", move || *count_clone.borrow_mut() += 1, 10);
        scheduler.shutdown();
        assert_eq!(scheduler.pending_timers(), 0);

        let count_clone = Rc::clone(&count);
        let late =
            scheduler.schedule("late", move || *count_clone.borrow_mut() += 1, 1);
        assert!(late.is_cancelled());
        run_all(scheduler.take_due(100));
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn test_clock_is_monotonic() {
        let scheduler = Scheduler::new();
        scheduler.advance_clock_to(100);
        scheduler.advance_clock_to(50);
        assert_eq!(scheduler.now(), 100);
    }
}
