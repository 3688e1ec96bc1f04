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

//! Starvation guard.
//!
//! Counts consecutive frames in which a subsystem had pool work but was
//! granted no worker. Once a streak reaches the ceiling, the subsystem is
//! served first by the next allocation pass.

use crate::config::FairnessConfig;
use std::collections::HashMap;
use tessel_core::control::StarvationCounter;
use tessel_core::SubsystemId;

/// Tracks starvation streaks per subsystem.
#[derive(Debug)]
pub struct FairnessMonitor {
    ceiling: u32,
    counters: HashMap<SubsystemId, StarvationCounter>,
}

impl FairnessMonitor {
    /// Creates a monitor with no history.
    pub fn new(config: &FairnessConfig) -> Self {
        Self {
            ceiling: config.starvation_ceiling.max(1),
            counters: HashMap::new(),
        }
    }

    /// Records the outcome of a frame's allocation for a subsystem.
    ///
    /// Frames without demand leave the streak untouched.
    pub fn record_allocation(&mut self, id: SubsystemId, workers_granted: usize, workers_demanded: usize) {
        if workers_demanded == 0 {
            return;
        }
        let counter = self
            .counters
            .entry(id)
            .or_insert_with(|| StarvationCounter::new(id));

        if workers_granted > 0 {
            counter.consecutive_frames_without_workers = 0;
            return;
        }

        counter.consecutive_frames_without_workers += 1;
        counter.longest_streak = counter
            .longest_streak
            .max(counter.consecutive_frames_without_workers);
        if counter.consecutive_frames_without_workers == self.ceiling {
            log::warn!(
                "Fairness: {} starved for {} frame(s), forcing a worker next frame",
                id,
                self.ceiling
            );
        }
    }

    /// Records that the allocator forced a worker for the subsystem.
    pub fn record_forced(&mut self, id: SubsystemId) {
        self.counters
            .entry(id)
            .or_insert_with(|| StarvationCounter::new(id))
            .forced_allocations += 1;
    }

    /// Returns `true` if the subsystem has been starved for at least the
    /// configured number of frames.
    pub fn needs_forced_allocation(&self, id: SubsystemId) -> bool {
        self.counters
            .get(&id)
            .is_some_and(|c| c.consecutive_frames_without_workers >= self.ceiling)
    }

    /// Subsystems needing a forced worker, longest streak first.
    pub fn forced_subsystems(&self) -> Vec<SubsystemId> {
        let mut starved: Vec<&StarvationCounter> = self
            .counters
            .values()
            .filter(|c| c.consecutive_frames_without_workers >= self.ceiling)
            .collect();
        starved.sort_by(|a, b| {
            b.consecutive_frames_without_workers
                .cmp(&a.consecutive_frames_without_workers)
                .then(a.subsystem_id.cmp(&b.subsystem_id))
        });
        starved.into_iter().map(|c| c.subsystem_id).collect()
    }

    /// Starvation record of a subsystem.
    pub fn counter(&self, id: SubsystemId) -> Option<StarvationCounter> {
        self.counters.get(&id).copied()
    }

    /// Every starvation record, sorted by subsystem.
    pub fn counters(&self) -> Vec<StarvationCounter> {
        let mut counters: Vec<_> = self.counters.values().copied().collect();
        counters.sort_by_key(|c| c.subsystem_id);
        counters
    }

    /// Drops the history of a subsystem.
    pub fn forget(&mut self, id: SubsystemId) {
        self.counters.remove(&id);
    }
}
