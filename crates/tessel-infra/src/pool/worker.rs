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

//! Worker threads and the lanes they run.

use crossbeam_channel::{Receiver, Select, Sender, TryRecvError};
use std::io;
use std::thread::{self, JoinHandle};
use tessel_core::task::{run_task, Task, TaskFailure};

/// A unit of work on one of the shared job queues.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// A batch tagged with its position in the submission.
pub(crate) type IndexedTask = (usize, Task);

/// What one lane achieved.
#[derive(Debug, Default)]
pub(crate) struct LaneReport {
    pub(crate) completed: usize,
    pub(crate) failures: Vec<TaskFailure>,
}

/// Spawns a named worker that runs jobs until every queue is closed.
///
/// `queues` are ordered most urgent first.
pub(crate) fn spawn_worker(index: usize, queues: Vec<Receiver<Job>>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("tessel-worker-{index}"))
        .spawn(move || {
            log::trace!("Pool: Worker {} started", index);
            while let Some(job) = next_job(&queues) {
                job();
            }
            log::trace!("Pool: Worker {} stopped", index);
        })
}

/// Takes the oldest job of the most urgent non-empty queue, blocking while
/// all of them are empty. Returns `None` once every queue is closed and
/// drained.
fn next_job(queues: &[Receiver<Job>]) -> Option<Job> {
    loop {
        let mut open = Vec::with_capacity(queues.len());
        for queue in queues {
            match queue.try_recv() {
                Ok(job) => return Some(job),
                Err(TryRecvError::Empty) => open.push(queue),
                Err(TryRecvError::Disconnected) => {}
            }
        }
        if open.is_empty() {
            return None;
        }

        // Wake on any open queue, then rescan from the most urgent one.
        let mut select = Select::new();
        for queue in open {
            select.recv(queue);
        }
        select.ready();
    }
}

/// Builds a lane: drains the submission's batch channel one batch at a time
/// and reports back once the channel is empty.
///
/// Batch failures are caught by [`run_task`], so a lane always reports.
pub(crate) fn lane(batches: Receiver<IndexedTask>, results: Sender<LaneReport>) -> Job {
    Box::new(move || {
        let mut report = LaneReport::default();
        while let Ok((index, task)) = batches.recv() {
            match run_task(index, task) {
                Ok(()) => report.completed += 1,
                Err(failure) => report.failures.push(failure),
            }
        }
        // The submitter may have dropped its handle without waiting.
        let _ = results.send(report);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn push(label: &'static str, order: &Arc<Mutex<Vec<&'static str>>>) -> Job {
        let order = order.clone();
        Box::new(move || order.lock().unwrap().push(label))
    }

    #[test]
    fn test_next_job_prefers_urgent_queue_then_drains() {
        let (senders, receivers): (Vec<Sender<Job>>, Vec<Receiver<Job>>) =
            (0..4).map(|_| crossbeam_channel::unbounded()).unzip();
        let order = Arc::new(Mutex::new(Vec::new()));

        senders[3].send(push("low-1", &order)).unwrap();
        senders[3].send(push("low-2", &order)).unwrap();
        senders[1].send(push("high", &order)).unwrap();
        senders[2].send(push("normal", &order)).unwrap();
        drop(senders);

        while let Some(job) = next_job(&receivers) {
            job();
        }
        assert_eq!(*order.lock().unwrap(), vec!["high", "normal", "low-1", "low-2"]);
    }
}
