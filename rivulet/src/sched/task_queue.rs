// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Multi-priority FIFO of tasks. Strict highest-priority-first dequeue.

use smallvec::SmallVec;
use strum::EnumCount;

use super::{Task, TaskPriority, TaskState};
use crate::core::RingBuffer;
use crate::error::{raise_protocol_violation, ProtocolViolation};

/// One ring buffer per [`TaskPriority`]. `dequeue` scans priorities
/// low-index to high-index and pops the head of the first non-empty buffer.
#[derive(Debug, Default)]
pub struct TaskQueue {
    buffers: [RingBuffer<Task>; TaskPriority::COUNT],
}

impl TaskQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffers: std::array::from_fn(|_| RingBuffer::new()),
        }
    }

    /// Place the task at the tail of its priority's buffer and mark it
    /// queued.
    ///
    /// A task already sitting in a queue may not be enqueued again; that is
    /// a [`ProtocolViolation::TaskAlreadyQueued`]. Disposed tasks are
    /// silently ignored.
    pub fn enqueue(&mut self, task: Task) {
        match task.state() {
            TaskState::Queued => {
                raise_protocol_violation(&ProtocolViolation::TaskAlreadyQueued {
                    task: task.debug_name().to_string(),
                });
            }
            TaskState::Disposed => {}
            TaskState::Idle | TaskState::Executing => {
                task.set_state(TaskState::Queued);
                self.buffers[task.priority().index()].add(task);
            }
        }
    }

    /// Place the task at the *head* of the priority-0 buffer, ahead of
    /// everything else. Same state rules as [`enqueue`].
    ///
    /// [`enqueue`]: Self::enqueue
    pub fn enqueue_next(&mut self, task: Task) {
        match task.state() {
            TaskState::Queued => {
                raise_protocol_violation(&ProtocolViolation::TaskAlreadyQueued {
                    task: task.debug_name().to_string(),
                });
            }
            TaskState::Disposed => {}
            TaskState::Idle | TaskState::Executing => {
                task.set_state(TaskState::Queued);
                self.buffers[TaskPriority::High.index()].add_first(task);
            }
        }
    }

    /// Pop the highest-priority task and mark it executing. Disposed tasks
    /// encountered along the way are dropped.
    pub fn dequeue(&mut self) -> Option<Task> {
        for buffer in &mut self.buffers {
            while let Some(task) = buffer.pop() {
                if task.state() == TaskState::Disposed {
                    continue;
                }
                task.set_state(TaskState::Executing);
                return Some(task);
            }
        }
        None
    }

    /// Total queued tasks across all priority buffers (disposed-but-not-yet
    /// -dropped tasks included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.iter().map(RingBuffer::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Empty all buffers. Removed tasks move back to idle (disposed ones
    /// stay disposed) and are returned so the caller can report them.
    pub fn clear(&mut self) -> SmallVec<[Task; 8]> {
        let mut drained = SmallVec::new();
        for buffer in &mut self.buffers {
            while let Some(task) = buffer.pop() {
                if task.state() == TaskState::Queued {
                    task.set_state(TaskState::Idle);
                }
                drained.push(task);
            }
        }
        drained
    }

    /// Names of everything still queued, for runaway diagnostics.
    #[must_use]
    pub fn pending_names(&self) -> Vec<String> {
        self.buffers
            .iter()
            .flat_map(|buffer| buffer.iter())
            .map(|task| task.debug_name().to_string())
            .collect()
    }
}
