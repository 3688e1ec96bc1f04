// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Units of pool work and the executor contract.
//!
//! A subsystem cuts its frame workload into batches, wraps each batch in a
//! [`Task`] and hands them to a [`BatchExecutor`]. Execution is a barrier: the
//! call returns only once every batch has finished, successfully or not.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use crate::utils::timer::Stopwatch;

/// One batch of work. Batches of a submission must not share mutable state
/// unless the submitting subsystem synchronizes it itself.
pub type Task = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// Boxes a closure into a [`Task`].
pub fn task<F>(work: F) -> Task
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    Box::new(work)
}

/// Order in which queued submissions are picked up by the workers.
///
/// Workers always take the oldest job of the most urgent non-empty queue.
/// Jobs already running are never preempted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum TaskPriority {
    /// Frame-critical work such as input or render preparation.
    Critical,
    /// Simulation steps the frame waits on.
    High,
    /// Default for most subsystems.
    #[default]
    Normal,
    /// Background work that can trail behind.
    Low,
}

impl TaskPriority {
    /// Every priority, most urgent first.
    pub const ALL: [TaskPriority; 4] = [
        TaskPriority::Critical,
        TaskPriority::High,
        TaskPriority::Normal,
        TaskPriority::Low,
    ];

    /// Position in [`TaskPriority::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskPriority::Critical => "critical",
            TaskPriority::High => "high",
            TaskPriority::Normal => "normal",
            TaskPriority::Low => "low",
        };
        f.write_str(name)
    }
}

/// How a batch failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFailureKind {
    /// The batch returned an error.
    Error(String),
    /// The batch panicked.
    Panic(String),
}

/// A failed batch within a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Position of the batch in the submitted sequence.
    pub batch_index: usize,
    /// What went wrong.
    pub kind: TaskFailureKind,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TaskFailureKind::Error(msg) => write!(f, "batch {} failed: {}", self.batch_index, msg),
            TaskFailureKind::Panic(msg) => {
                write!(f, "batch {} panicked: {}", self.batch_index, msg)
            }
        }
    }
}

/// Result of a resolved submission.
#[derive(Debug, Clone, Default)]
pub struct SubmissionReport {
    /// Batches handed to the executor.
    pub submitted: usize,
    /// Batches that returned `Ok`.
    pub completed: usize,
    /// Batches that returned `Err` or panicked.
    pub failed: usize,
    /// Details of every failed batch.
    pub failures: Vec<TaskFailure>,
    /// Workers that ran batches concurrently (0 = inline on the caller).
    pub workers_used: usize,
    /// Wall time from submission to the barrier.
    pub elapsed: Duration,
}

impl SubmissionReport {
    /// Returns `true` if at least one batch failed.
    pub fn is_partial_failure(&self) -> bool {
        self.failed > 0
    }

    /// Returns `true` if every batch completed.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.completed == self.submitted
    }

    /// Folds the outcome of one batch into the report.
    pub fn absorb(&mut self, outcome: Result<(), TaskFailure>) {
        match outcome {
            Ok(()) => self.completed += 1,
            Err(failure) => {
                self.failed += 1;
                self.failures.push(failure);
            }
        }
    }
}

/// Runs one batch, turning errors and panics into a [`TaskFailure`].
pub fn run_task(batch_index: usize, task: Task) -> Result<(), TaskFailure> {
    let kind = match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(err)) => TaskFailureKind::Error(format!("{err:#}")),
        Err(payload) => TaskFailureKind::Panic(panic_message(payload.as_ref())),
    };
    let failure = TaskFailure { batch_index, kind };
    log::error!("Task: {}", failure);
    Err(failure)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Something able to run a submission of batches with bounded parallelism.
pub trait BatchExecutor: Send + Sync {
    /// Runs `batches` using at most `max_workers` concurrent workers and
    /// blocks until all of them have finished. `max_workers == 0` runs the
    /// batches inline on the calling thread.
    ///
    /// `priority` orders the submission against work already queued by other
    /// submitters.
    fn submit(
        &self,
        batches: Vec<Task>,
        max_workers: usize,
        priority: TaskPriority,
    ) -> SubmissionReport;

    /// Number of worker threads behind this executor.
    fn worker_count(&self) -> usize;

    /// Queued work relative to queue capacity, in `[0, 1]`.
    fn queue_pressure(&self) -> f32 {
        0.0
    }

    /// Stops accepting work and releases the workers. Idempotent.
    fn shutdown(&self) {}
}

/// Executor without threads: runs every batch on the caller, in order.
///
/// Used when the host has a single hardware thread and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl InlineExecutor {
    /// Runs the batches sequentially on the current thread.
    pub fn run_inline(batches: Vec<Task>) -> SubmissionReport {
        let stopwatch = Stopwatch::new();
        let mut report = SubmissionReport {
            submitted: batches.len(),
            ..Default::default()
        };
        for (index, task) in batches.into_iter().enumerate() {
            report.absorb(run_task(index, task));
        }
        report.elapsed = stopwatch.elapsed();
        report
    }
}

impl BatchExecutor for InlineExecutor {
    fn submit(
        &self,
        batches: Vec<Task>,
        _max_workers: usize,
        _priority: TaskPriority,
    ) -> SubmissionReport {
        Self::run_inline(batches)
    }

    fn worker_count(&self) -> usize {
        0
    }
}
