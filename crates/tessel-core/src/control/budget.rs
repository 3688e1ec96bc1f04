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

//! Worker budgets, per-frame grants and starvation counters.

use crate::subsystem::SubsystemId;
use serde::{Deserialize, Serialize};

/// The session-wide share of the worker pool a subsystem is entitled to.
///
/// Owned by the budget allocator. The sum of `allocated_threads` over all
/// registered subsystems never exceeds the hardware thread count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkerBudget {
    /// The subsystem this budget belongs to.
    pub subsystem_id: SubsystemId,
    /// Number of workers reserved for the subsystem. Zero means the subsystem
    /// runs single-threaded for the session unless it borrows spare capacity.
    pub allocated_threads: usize,
    /// Effective percentage of the hardware threads after clamping.
    pub allocated_percent: f32,
}

impl WorkerBudget {
    /// Returns `true` if the subsystem owns at least one worker.
    pub fn is_parallel(&self) -> bool {
        self.allocated_threads > 0
    }
}

/// Workers a subsystem asks for in the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerDemand {
    /// The requesting subsystem.
    pub subsystem_id: SubsystemId,
    /// Number of workers wanted. Zero means no pending pool work.
    pub workers: usize,
}

/// Workers granted to a subsystem for the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerGrant {
    /// The subsystem the grant is for.
    pub subsystem_id: SubsystemId,
    /// Workers requested.
    pub demanded: usize,
    /// Workers granted. Never above `demanded`.
    pub granted: usize,
    /// `true` if the grant was forced by the starvation guard.
    pub forced: bool,
}

/// Consecutive frames a subsystem was denied workers while it had work.
///
/// Owned by the fairness monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarvationCounter {
    /// The tracked subsystem.
    pub subsystem_id: SubsystemId,
    /// Current streak of frames with a zero grant despite pending work.
    pub consecutive_frames_without_workers: u32,
    /// Longest streak observed this session.
    pub longest_streak: u32,
    /// How many times the starvation guard forced an allocation.
    pub forced_allocations: u32,
}

impl StarvationCounter {
    /// Creates a zeroed counter for the subsystem.
    pub fn new(subsystem_id: SubsystemId) -> Self {
        Self {
            subsystem_id,
            consecutive_frames_without_workers: 0,
            longest_streak: 0,
            forced_allocations: 0,
        }
    }
}
