// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Round-based task executor with runaway detection.
//!
//! Tasks are drained in *rounds*: at the start of a round the executor
//! snapshots the queue size and runs exactly that many dequeues before
//! re-measuring. Tasks enqueued while a round is running therefore land in
//! the next round, so a task that re-enqueues itself cannot monopolize
//! execution — and a chain of such rounds longer than the round budget is a
//! runaway.

use super::{Task, TaskQueue};
use crate::config;

#[derive(Debug)]
pub struct Executor {
    queue: TaskQueue,
    max_rounds: usize,
    purge_on_runaway: bool,
    current_round: usize,
    remaining_in_round: usize,
    tasks_run: usize,
    runaways_detected: usize,
}

impl Default for Executor {
    fn default() -> Self {
        let config = config();
        Self::with_policy(config.max_rounds, config.purge_tasks_when_runaway_detected)
    }
}

impl Executor {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Mostly for tests; production code takes both knobs from [`config`].
    #[must_use]
    pub fn with_policy(max_rounds: usize, purge_on_runaway: bool) -> Self {
        Self {
            queue: TaskQueue::new(),
            max_rounds,
            purge_on_runaway,
            current_round: 0,
            remaining_in_round: 0,
            tasks_run: 0,
            runaways_detected: 0,
        }
    }

    pub fn enqueue(&mut self, task: Task) { self.queue.enqueue(task); }

    pub fn enqueue_next(&mut self, task: Task) { self.queue.enqueue_next(task); }

    /// Round bookkeeping plus dequeue. Returns the task the driver must run,
    /// or [`None`] when there is no work (queue empty, or the round budget
    /// was just exhausted by a runaway).
    ///
    /// The task body is *not* run here: the driver runs it outside of any
    /// borrow of the executor, so that the body can freely enqueue more
    /// work.
    pub fn poll_next(&mut self) -> Option<Task> {
        if self.remaining_in_round == 0 {
            if self.queue.is_empty() {
                self.current_round = 0;
                return None;
            }
            if self.current_round + 1 > self.max_rounds {
                self.current_round = 0;
                self.on_runaway_detected();
                return None;
            }
            self.current_round += 1;
            self.remaining_in_round = self.queue.len();
        }
        self.remaining_in_round -= 1;
        match self.queue.dequeue() {
            Some(task) => {
                self.tasks_run += 1;
                Some(task)
            }
            None => {
                // Everything left in the round was disposed.
                self.remaining_in_round = 0;
                self.current_round = 0;
                None
            }
        }
    }

    /// Raise the runaway diagnostic, naming the still-pending tasks, and
    /// optionally drain the queue.
    fn on_runaway_detected(&mut self) {
        self.runaways_detected += 1;
        let pending = self.queue.pending_names();
        tracing::error!(
            max_rounds = self.max_rounds,
            pending_tasks = ?pending,
            "executor exceeded its round budget; tasks keep re-enqueueing themselves"
        );
        if self.purge_on_runaway {
            let drained = self.queue.clear();
            tracing::warn!(purged = drained.len(), "task queue purged after runaway");
        }
    }

    #[must_use]
    pub fn is_idle(&self) -> bool { self.queue.is_empty() }

    #[must_use]
    pub fn queue_len(&self) -> usize { self.queue.len() }

    /// Total tasks handed out to the driver since creation.
    #[must_use]
    pub fn tasks_run(&self) -> usize { self.tasks_run }

    #[must_use]
    pub fn runaways_detected(&self) -> usize { self.runaways_detected }
}
