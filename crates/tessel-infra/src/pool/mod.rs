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

//! Fixed-size pool of OS worker threads.
//!
//! Workers pull jobs from bounded MPMC queues, one per [`TaskPriority`], and
//! always take from the most urgent non-empty queue. A submission is split
//! into *lanes*: `min(max_workers, workers, batches)` jobs that each drain the
//! submission's own batch channel. At most `max_workers` batches of a
//! submission therefore run at the same time, whatever the pool size.

mod handle;
mod worker;

pub use handle::WaitHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tessel_core::{
    BatchExecutor, HardwareProfile, InlineExecutor, SchedulerError, Stopwatch, SubmissionReport,
    Task, TaskPriority,
};
use worker::{lane, spawn_worker, Job};

/// Lifetime counters of a pool.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub(crate) submissions: AtomicU64,
    pub(crate) tasks_completed: AtomicU64,
    pub(crate) tasks_failed: AtomicU64,
}

/// Snapshot of a pool's activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Worker threads.
    pub workers: usize,
    /// Submissions resolved so far.
    pub submissions: u64,
    /// Batches that returned `Ok`.
    pub tasks_completed: u64,
    /// Batches that returned `Err` or panicked.
    pub tasks_failed: u64,
    /// Jobs waiting across every priority queue.
    pub queued_jobs: usize,
}

/// Sending ends of the job queues, indexed by [`TaskPriority::index`].
#[derive(Clone)]
struct JobQueues {
    senders: Vec<Sender<Job>>,
}

impl JobQueues {
    fn bounded(capacity: usize) -> (Self, Vec<Receiver<Job>>) {
        let (senders, receivers) = TaskPriority::ALL
            .iter()
            .map(|_| crossbeam_channel::bounded::<Job>(capacity))
            .unzip();
        (Self { senders }, receivers)
    }

    fn queue(&self, priority: TaskPriority) -> &Sender<Job> {
        &self.senders[priority.index()]
    }

    fn queued(&self) -> usize {
        self.senders.iter().map(Sender::len).sum()
    }
}

/// Fixed-size worker pool. Sized once and never resized.
pub struct WorkerPool {
    workers: usize,
    queue_capacity: usize,
    jobs: Mutex<Option<JobQueues>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    /// Starts `workers` threads sharing one queue of `queue_capacity` jobs
    /// per priority.
    ///
    /// Fails if a thread cannot be spawned; the threads already started are
    /// stopped before returning.
    pub fn new(workers: usize, queue_capacity: usize) -> Result<Self, SchedulerError> {
        let queue_capacity = queue_capacity.max(1);
        let (queues, receivers) = JobQueues::bounded(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            match spawn_worker(index, receivers.clone()) {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    log::error!("Pool: Failed to spawn worker {}: {}", index, source);
                    drop(queues);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(SchedulerError::PoolSpawn { index, source });
                }
            }
        }

        log::info!(
            "Pool: Started {} worker(s), queue capacity {} per priority",
            workers,
            queue_capacity
        );
        Ok(Self {
            workers,
            queue_capacity,
            jobs: Mutex::new(Some(queues)),
            handles: Mutex::new(handles),
            counters: Arc::new(PoolCounters::default()),
        })
    }

    /// Starts one worker per logical hardware thread.
    pub fn from_profile(profile: HardwareProfile, queue_capacity: usize) -> Result<Self, SchedulerError> {
        Self::new(profile.logical_threads(), queue_capacity)
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Starts a submission and returns immediately.
    ///
    /// Its lanes are queued behind work of the same or higher `priority` and
    /// ahead of anything less urgent. `max_workers == 0`, an empty submission
    /// or a shut-down pool runs the batches inline on the caller before
    /// returning.
    pub fn dispatch(
        &self,
        batches: Vec<Task>,
        max_workers: usize,
        priority: TaskPriority,
    ) -> WaitHandle {
        let started = Stopwatch::new();
        let submitted = batches.len();
        let lanes = max_workers.min(self.workers).min(submitted);

        let queues = self.queues();
        let Some(queues) = queues.filter(|_| lanes > 0) else {
            return WaitHandle::ready(InlineExecutor::run_inline(batches), self.counters.clone());
        };

        let (batch_tx, batch_rx) = crossbeam_channel::unbounded();
        for indexed in batches.into_iter().enumerate() {
            // The receiver is alive until the lanes are built.
            let _ = batch_tx.send(indexed);
        }
        drop(batch_tx);

        let sender = queues.queue(priority);
        let (result_tx, result_rx) = crossbeam_channel::bounded(lanes);
        for _ in 0..lanes {
            let job = lane(batch_rx.clone(), result_tx.clone());
            let job = match sender.try_send(job) {
                Ok(()) => continue,
                Err(TrySendError::Full(job)) => {
                    log::debug!("Pool: {} job queue full, waiting for room", priority);
                    match sender.send(job) {
                        Ok(()) => continue,
                        Err(err) => err.into_inner(),
                    }
                }
                Err(TrySendError::Disconnected(job)) => job,
            };
            // The pool shut down under us; run the lane here.
            job();
        }

        WaitHandle::pending(result_rx, lanes, submitted, started, self.counters.clone())
    }

    /// Runs a submission and blocks until every batch has finished.
    pub fn submit(
        &self,
        batches: Vec<Task>,
        max_workers: usize,
        priority: TaskPriority,
    ) -> SubmissionReport {
        self.dispatch(batches, max_workers, priority).wait()
    }

    /// Jobs queued at any priority relative to the per-queue capacity, in
    /// `[0, 1]`.
    pub fn queue_pressure(&self) -> f32 {
        let queued = self.queues().map_or(0, |q| q.queued());
        (queued as f32 / self.queue_capacity as f32).min(1.0)
    }

    /// Activity counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers,
            submissions: self.counters.submissions.load(Ordering::Relaxed),
            tasks_completed: self.counters.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.counters.tasks_failed.load(Ordering::Relaxed),
            queued_jobs: self.queues().map_or(0, |q| q.queued()),
        }
    }

    /// Closes the queues and joins every worker. Queued jobs still run.
    pub fn shutdown(&self) {
        let queues = match self.jobs.lock() {
            Ok(mut jobs) => jobs.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if queues.is_none() {
            return;
        }
        drop(queues);

        let handles = match self.handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            if handle.join().is_err() {
                log::error!("Pool: A worker thread panicked");
            }
        }
        log::info!("Pool: Stopped {} worker(s)", self.workers);
    }

    fn queues(&self) -> Option<JobQueues> {
        self.jobs.lock().ok().and_then(|jobs| jobs.clone())
    }
}

impl BatchExecutor for WorkerPool {
    fn submit(
        &self,
        batches: Vec<Task>,
        max_workers: usize,
        priority: TaskPriority,
    ) -> SubmissionReport {
        WorkerPool::submit(self, batches, max_workers, priority)
    }

    fn worker_count(&self) -> usize {
        self.workers
    }

    fn queue_pressure(&self) -> f32 {
        WorkerPool::queue_pressure(self)
    }

    fn shutdown(&self) {
        WorkerPool::shutdown(self)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
