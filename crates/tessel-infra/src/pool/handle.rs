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

//! Pending submissions.

use super::worker::LaneReport;
use super::PoolCounters;
use crossbeam_channel::Receiver;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tessel_core::{Stopwatch, SubmissionReport};

enum State {
    Ready(SubmissionReport),
    Pending {
        results: Receiver<LaneReport>,
        lanes: usize,
        submitted: usize,
    },
}

/// Handle on a dispatched submission.
///
/// [`WaitHandle::wait`] is the barrier: it returns once every batch of the
/// submission has finished.
pub struct WaitHandle {
    state: State,
    started: Stopwatch,
    counters: Arc<PoolCounters>,
}

impl WaitHandle {
    pub(crate) fn ready(report: SubmissionReport, counters: Arc<PoolCounters>) -> Self {
        Self {
            started: Stopwatch::new(),
            state: State::Ready(report),
            counters,
        }
    }

    pub(crate) fn pending(
        results: Receiver<LaneReport>,
        lanes: usize,
        submitted: usize,
        started: Stopwatch,
        counters: Arc<PoolCounters>,
    ) -> Self {
        Self {
            state: State::Pending {
                results,
                lanes,
                submitted,
            },
            started,
            counters,
        }
    }

    /// Returns `true` if every lane has reported, so `wait` will not block.
    pub fn is_finished(&self) -> bool {
        match &self.state {
            State::Ready(_) => true,
            State::Pending { results, lanes, .. } => results.len() >= *lanes,
        }
    }

    /// Blocks until every batch has finished and returns the outcome.
    pub fn wait(self) -> SubmissionReport {
        let report = match self.state {
            State::Ready(report) => report,
            State::Pending {
                results,
                lanes,
                submitted,
            } => {
                let mut report = SubmissionReport {
                    submitted,
                    workers_used: lanes,
                    ..Default::default()
                };
                for _ in 0..lanes {
                    let Ok(lane) = results.recv() else {
                        break;
                    };
                    report.completed += lane.completed;
                    report.failed += lane.failures.len();
                    report.failures.extend(lane.failures);
                }

                let accounted = report.completed + report.failed;
                if accounted < submitted {
                    log::error!(
                        "Pool: {} batch(es) lost without a result",
                        submitted - accounted
                    );
                    report.failed += submitted - accounted;
                }
                report.failures.sort_by_key(|f| f.batch_index);
                report.elapsed = self.started.elapsed();
                report
            }
        };

        self.counters.submissions.fetch_add(1, Ordering::Relaxed);
        self.counters
            .tasks_completed
            .fetch_add(report.completed as u64, Ordering::Relaxed);
        self.counters
            .tasks_failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        report
    }
}
