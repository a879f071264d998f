// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Processor unit: owns an executor and a scheduler, and is the only place
//! where task bodies run.
//!
//! # Activation protocol
//!
//! [`Unit::activate`] installs the unit into a thread-local *current unit*
//! slot, drains the executor, and clears the slot on the way out (panic
//! included, via a drop guard). Exactly one unit may be active on a thread
//! at a time; nesting is a protocol violation. Because activation is the
//! only place task bodies run, any code running inside a task body can call
//! [`current_unit`] and rely on it being non-null and consistent.
//!
//! Units are thread-confined (the engine is single-threaded cooperative).
//! Foreign threads hand work to a unit through [`Unit::remote`], a `Send`
//! handle whose runnables are drained into the task queue at the next
//! activation.

use std::cell::RefCell;
use std::rc::Rc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::{Executor, Scheduler, Task, TaskPriority};
use crate::error::{raise_protocol_violation, ProtocolViolation};

type RemoteRunnable = Box<dyn FnOnce() + Send>;

thread_local! {
    static CURRENT_UNIT: RefCell<Option<Unit>> = const { RefCell::new(None) };
}

/// The unit currently activated on this thread, if any. Non-null from
/// inside any task body.
#[must_use]
pub fn current_unit() -> Option<Unit> {
    CURRENT_UNIT.with(|slot| slot.borrow().clone())
}

struct UnitInner {
    name: Rc<str>,
    executor: RefCell<Executor>,
    scheduler: Scheduler,
    inbox_tx: UnboundedSender<RemoteRunnable>,
    inbox_rx: RefCell<UnboundedReceiver<RemoteRunnable>>,
}

/// See the [module docs](self). Cheap to clone; clones share the executor,
/// scheduler, and inbox.
#[derive(Clone)]
pub struct Unit {
    inner: Rc<UnitInner>,
}

impl std::fmt::Debug for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unit")
            .field("name", &self.inner.name)
            .field("queue_len", &self.inner.executor.borrow().queue_len())
            .field("now", &self.inner.scheduler.now())
            .finish()
    }
}

impl Unit {
    #[must_use]
    pub fn new(name: &str) -> Self {
        let (inbox_tx, inbox_rx) = unbounded_channel();
        Self {
            inner: Rc::new(UnitInner {
                name: Rc::from(name),
                executor: RefCell::new(Executor::new()),
                scheduler: Scheduler::new(),
                inbox_tx,
                inbox_rx: RefCell::new(inbox_rx),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str { &self.inner.name }

    #[must_use]
    pub fn scheduler(&self) -> Scheduler { self.inner.scheduler.clone() }

    /// Current virtual time of this unit's scheduler.
    #[must_use]
    pub fn now(&self) -> u64 { self.inner.scheduler.now() }

    pub fn queue(&self, task: Task) { self.inner.executor.borrow_mut().enqueue(task); }

    /// Insert at the head of the priority-0 buffer, ahead of everything
    /// already queued.
    pub fn queue_next(&self, task: Task) {
        self.inner.executor.borrow_mut().enqueue_next(task);
    }

    /// A `Send + Clone` handle for posting runnables from other threads.
    #[must_use]
    pub fn remote(&self) -> RemoteHandle {
        RemoteHandle {
            sender: self.inner.inbox_tx.clone(),
        }
    }

    /// Install this unit as current, drain the executor, clear the slot.
    ///
    /// Returns once the executor reports no work (queue empty or round
    /// budget exhausted).
    pub fn activate(&self) {
        if let Some(current) = current_unit() {
            raise_protocol_violation(&ProtocolViolation::NestedActivation {
                unit: self.inner.name.to_string(),
                current: current.name().to_string(),
            });
            return;
        }
        let _guard = ActivationGuard::install(self.clone());
        self.drain_inbox();
        loop {
            let next = self.inner.executor.borrow_mut().poll_next();
            match next {
                Some(task) => task.run(),
                None => break,
            }
        }
    }

    /// Advance the virtual clock to `instant`, firing due timers in order.
    /// The unit activates between distinct fire times, so a timer body
    /// observes every earlier timer's effects and can schedule new, earlier
    /// work of its own.
    pub fn advance_to(&self, instant: u64) {
        loop {
            let Some(due) = self.inner.scheduler.next_due() else { break };
            if due > instant {
                break;
            }
            for task in self.inner.scheduler.take_due(due) {
                self.queue(task);
            }
            self.activate();
        }
        self.inner.scheduler.advance_clock_to(instant);
        // Work enqueued at or before the final instant still needs a drain.
        self.activate();
    }

    /// Advance the virtual clock by `delta`. See [`advance_to`].
    ///
    /// [`advance_to`]: Self::advance_to
    pub fn advance_by(&self, delta: u64) { self.advance_to(self.now() + delta); }

    fn drain_inbox(&self) {
        let mut inbox = self.inner.inbox_rx.borrow_mut();
        while let Ok(runnable) = inbox.try_recv() {
            let mut runnable = Some(runnable);
            self.inner.executor.borrow_mut().enqueue(Task::new(
                "remote",
                TaskPriority::Default,
                move || {
                    if let Some(runnable) = runnable.take() {
                        runnable();
                    }
                },
            ));
        }
    }
}

/// Posting side of a unit's cross-thread inbox.
#[derive(Clone, Debug)]
pub struct RemoteHandle {
    sender: UnboundedSender<RemoteRunnable>,
}

impl RemoteHandle {
    /// Post a runnable; it runs during the unit's next activation. Returns
    /// whether the unit still exists.
    pub fn post(&self, runnable: impl FnOnce() + Send + 'static) -> bool {
        self.sender.send(Box::new(runnable)).is_ok()
    }
}

/// Clears the current-unit slot even when a task body panics.
struct ActivationGuard;

impl ActivationGuard {
    fn install(unit: Unit) -> Self {
        CURRENT_UNIT.with(|slot| *slot.borrow_mut() = Some(unit));
        Self
    }
}

impl Drop for ActivationGuard {
    fn drop(&mut self) {
        CURRENT_UNIT.with(|slot| *slot.borrow_mut() = None);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;

    #[test]
    fn test_activate_runs_queued_tasks() {
        let unit = Unit::new("main");
        let count = Rc::new(Cell::new(0));
        let count_clone = Rc::clone(&count);
        unit.queue(Task::new("t", TaskPriority::Default, move || {
            count_clone.set(count_clone.get() + 1);
        }));
        unit.activate();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_current_unit_is_visible_inside_task_bodies_only() {
        let unit = Unit::new("main");
        assert!(current_unit().is_none());

        let observed: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));
        let observed_clone = Rc::clone(&observed);
        unit.queue(Task::new("t", TaskPriority::Default, move || {
            *observed_clone.borrow_mut() =
                current_unit().map(|unit| unit.name().to_string());
        }));
        unit.activate();

        assert_eq!(observed.borrow().as_deref(), Some("main"));
        assert!(current_unit().is_none());
    }

    #[test]
    fn test_advance_fires_timers_in_due_order() {
        let unit = Unit::new("main");
        let fired = Rc::new(RefCell::new(Vec::new()));
        let scheduler = unit.scheduler();
        for (label, delay) in [("late", 30_u64), ("early", 10), ("middle", 20)] {
            let fired_clone = Rc::clone(&fired);
            scheduler.schedule(label, move || fired_clone.borrow_mut().push(label), delay);
        }
        unit.advance_to(30);
        assert_eq!(*fired.borrow(), vec!["early", "middle", "late"]);
        assert_eq!(unit.now(), 30);
    }

    #[test]
    fn test_advance_by_drives_periodic_timers() {
        let unit = Unit::new("main");
        let ticks = Rc::new(Cell::new(0));
        let ticks_clone = Rc::clone(&ticks);
        unit.scheduler().schedule_at_fixed_rate(
            "tick",
            move || ticks_clone.set(ticks_clone.get() + 1),
            100,
        );
        unit.advance_by(350);
        assert_eq!(ticks.get(), 3);
        assert_eq!(unit.now(), 350);
    }

    #[test]
    fn test_timer_body_can_schedule_earlier_work() {
        let unit = Unit::new("main");
        let fired = Rc::new(RefCell::new(Vec::new()));
        let scheduler = unit.scheduler();

        let fired_outer = Rc::clone(&fired);
        let scheduler_clone = scheduler.clone();
        scheduler.schedule(
            "outer",
            move || {
                fired_outer.borrow_mut().push("outer");
                let fired_inner = Rc::clone(&fired_outer);
                scheduler_clone.schedule(
                    "inner",
                    move || fired_inner.borrow_mut().push("inner"),
                    5,
                );
            },
            10,
        );

        unit.advance_to(20);
        assert_eq!(*fired.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_remote_runnables_run_at_next_activation() {
        let unit = Unit::new("main");
        let count = Rc::new(Cell::new(0));
        let remote = unit.remote();

        let handle = std::thread::spawn(move || {
            remote.post(|| {
                // Runs on the unit's thread, inside an activation.
                assert!(current_unit().is_some());
            })
        });
        assert!(handle.join().unwrap());

        let count_clone = Rc::clone(&count);
        unit.queue(Task::new("local", TaskPriority::Default, move || {
            count_clone.set(count_clone.get() + 1);
        }));
        unit.activate();
        assert_eq!(count.get(), 1);
    }
}
