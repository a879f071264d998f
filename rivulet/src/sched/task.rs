// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A schedulable unit of work. See [`Task`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use strum_macros::{Display, EnumCount, VariantArray};

use crate::config;

/// Priority index of a task; lower index runs first. The queue keeps one
/// buffer per variant ([`strum::EnumCount`] supplies the buffer count,
/// [`strum::VariantArray`] the ordered variants).
#[derive(
    Clone, Copy, Debug, Display, EnumCount, VariantArray, PartialEq, Eq, PartialOrd, Ord,
)]
pub enum TaskPriority {
    High = 0,
    Default = 1,
    Background = 2,
}

impl TaskPriority {
    #[must_use]
    pub fn index(self) -> usize { self as usize }
}

/// Lifecycle of a task.
///
/// ```text
/// Idle ──enqueue──► Queued ──dequeue──► Executing ──body returns──► Idle
///   ▲                                      │
///   └──────────────────────────────────────┘
/// any state ──cancel──► Disposed (sticky)
/// ```
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Queued,
    Executing,
    Disposed,
}

struct TaskInner {
    name: Option<Rc<str>>,
    priority: TaskPriority,
    state: Cell<TaskState>,
    body: RefCell<Box<dyn FnMut()>>,
}

/// A runnable body plus queue bookkeeping. Cheap to clone; clones share
/// state, so the queue and a [`TaskHandle`] observe the same lifecycle.
#[derive(Clone)]
pub struct Task {
    inner: Rc<TaskInner>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.inner.name)
            .field("priority", &self.inner.priority)
            .field("state", &self.inner.state.get())
            .finish_non_exhaustive()
    }
}

impl Task {
    /// The name is recorded only when [`names_enabled`].
    ///
    /// [`names_enabled`]: crate::Config::names_enabled
    pub fn new(name: &str, priority: TaskPriority, body: impl FnMut() + 'static) -> Self {
        Self {
            inner: Rc::new(TaskInner {
                name: config().names_enabled.then(|| Rc::from(name)),
                priority,
                state: Cell::new(TaskState::Idle),
                body: RefCell::new(Box::new(body)),
            }),
        }
    }

    #[must_use]
    pub fn priority(&self) -> TaskPriority { self.inner.priority }

    #[must_use]
    pub fn state(&self) -> TaskState { self.inner.state.get() }

    pub(crate) fn set_state(&self, state: TaskState) { self.inner.state.set(state); }

    /// The recorded name, or `"anonymous"` when names are disabled.
    #[must_use]
    pub fn debug_name(&self) -> &str {
        self.inner.name.as_deref().unwrap_or("anonymous")
    }

    #[must_use]
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Run the body once. Disposed tasks are skipped. The body may enqueue
    /// this task again (state moves to `Queued` under our feet); only an
    /// undisturbed `Executing` state falls back to `Idle` afterwards.
    pub fn run(&self) {
        if self.state() == TaskState::Disposed {
            return;
        }
        self.set_state(TaskState::Executing);
        (*self.inner.body.borrow_mut())();
        if self.state() == TaskState::Executing {
            self.set_state(TaskState::Idle);
        }
    }
}

/// Cancel capability for a [`Task`]. Cancellation is idempotent; the
/// executor skips disposed tasks it pops.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Rc<TaskInner>,
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("state", &self.inner.state.get())
            .finish_non_exhaustive()
    }
}

impl TaskHandle {
    pub fn cancel(&self) { self.inner.state.set(TaskState::Disposed); }

    #[must_use]
    pub fn is_disposed(&self) -> bool { self.inner.state.get() == TaskState::Disposed }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn test_run_executes_body_and_returns_to_idle() {
        let runs = Rc::new(Cell::new(0));
        let runs_clone = Rc::clone(&runs);
        let task = Task::new("t", TaskPriority::Default, move || {
            runs_clone.set(runs_clone.get() + 1);
        });
        assert_eq!(task.state(), TaskState::Idle);
        task.run();
        assert_eq!(runs.get(), 1);
        assert_eq!(task.state(), TaskState::Idle);
    }

    #[test]
    fn test_cancelled_task_does_not_run() {
        let runs = Rc::new(Cell::new(0));
        let runs_clone = Rc::clone(&runs);
        let task = Task::new("t", TaskPriority::Default, move || {
            runs_clone.set(runs_clone.get() + 1);
        });
        task.handle().cancel();
        task.run();
        assert_eq!(runs.get(), 0);
        assert_eq!(task.state(), TaskState::Disposed);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let task = Task::new("t", TaskPriority::High, || {});
        let handle = task.handle();
        handle.cancel();
        handle.cancel();
        assert!(handle.is_disposed());
    }

    #[test]
    fn test_priority_indices_cover_the_queue_range() {
        use strum::{EnumCount, VariantArray};

        assert_eq!(TaskPriority::VARIANTS.len(), TaskPriority::COUNT);
        for (expected_index, priority) in TaskPriority::VARIANTS.iter().enumerate() {
            assert_eq!(priority.index(), expected_index);
        }
    }
}
