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

//! Throughput samples and the adaptive-threading records derived from them.

use crate::subsystem::SubsystemId;
use serde::{Deserialize, Serialize};

/// How a subsystem executed its workload in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Processed inline on the calling (main) thread.
    #[default]
    Single,
    /// Split into batches and processed on pool workers.
    Multi,
}

impl ExecutionMode {
    /// Returns the other mode.
    pub fn opposite(self) -> Self {
        match self {
            ExecutionMode::Single => ExecutionMode::Multi,
            ExecutionMode::Multi => ExecutionMode::Single,
        }
    }
}

/// One frame's measured execution of a subsystem workload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSample {
    /// The measured subsystem.
    pub subsystem_id: SubsystemId,
    /// The mode the workload actually ran in.
    pub mode: ExecutionMode,
    /// Number of items (entities, particles, requests) processed.
    pub item_count: usize,
    /// Wall time spent, already clamped to at least one microsecond.
    pub elapsed_micros: u64,
    /// Frame the sample was taken in.
    pub timestamp_frame: u64,
}

impl ThroughputSample {
    /// Items processed per millisecond.
    pub fn items_per_ms(&self) -> f64 {
        self.item_count as f64 / (self.elapsed_micros.max(1) as f64 / 1000.0)
    }

    /// Elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_micros as f64 / 1000.0
    }
}

/// The smallest workload at which multi-threading has proven faster.
///
/// Derived and owned by the throughput tracker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossoverPoint {
    /// The subsystem the threshold applies to.
    pub subsystem_id: SubsystemId,
    /// Entity count at or above which multi-threading pays off.
    pub entity_count_threshold: usize,
    /// Multi/single throughput ratio observed at the last update.
    pub observed_speedup: f64,
    /// Frame of the last update.
    pub updated_frame: u64,
}

/// Why the crossover estimator chose a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionReason {
    /// The host has a single hardware thread.
    NoParallelHardware,
    /// The workload is below the configured minimum for threading.
    BelowMinimumWorkload,
    /// Not enough samples yet; staying single-threaded.
    Learning,
    /// Running the other mode to collect comparison samples.
    Probe,
    /// Multi-threading measured faster and the workload is past the crossover.
    Crossover,
    /// Multi-threading is faster, but the workload is below the crossover.
    BelowCrossover,
    /// Multi-threading has not proven faster by the required margin.
    NoSpeedup,
}

/// Per-frame threading decision for one subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadingDecision {
    /// The chosen execution mode.
    pub mode: ExecutionMode,
    /// The rule that produced it.
    pub reason: DecisionReason,
}

impl ThreadingDecision {
    /// Creates a single-threaded decision.
    pub fn single(reason: DecisionReason) -> Self {
        Self {
            mode: ExecutionMode::Single,
            reason,
        }
    }

    /// Creates a multi-threaded decision.
    pub fn multi(reason: DecisionReason) -> Self {
        Self {
            mode: ExecutionMode::Multi,
            reason,
        }
    }

    /// Returns `true` if the decision is a measurement probe rather than a
    /// verdict.
    pub fn is_probe(&self) -> bool {
        self.reason == DecisionReason::Probe
    }
}

/// Tuning state of a batch multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TunerPhase {
    /// Hill-climbing toward better throughput.
    #[default]
    Exploring,
    /// Frozen until throughput regresses.
    Converged,
}

/// Scaling factor applied to the default per-worker batch count.
///
/// Owned by the adaptive batch tuner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchMultiplier {
    /// The tuned subsystem.
    pub subsystem_id: SubsystemId,
    /// Current multiplier, within the configured bounds.
    pub multiplier: f32,
    /// Frame of the last change.
    pub last_adjustment_frame: u64,
    /// Current tuning phase.
    pub phase: TunerPhase,
}

/// How a workload is cut into batches for the granted workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchStrategy {
    /// Number of batches to submit.
    pub batch_count: usize,
    /// Items per batch; the last batch may be shorter.
    pub batch_size: usize,
}

impl BatchStrategy {
    /// A single batch holding the whole workload.
    pub fn single(workload: usize) -> Self {
        Self {
            batch_count: 1,
            batch_size: workload,
        }
    }

    /// Item ranges covering `0..workload` according to this strategy.
    pub fn ranges(&self, workload: usize) -> impl Iterator<Item = std::ops::Range<usize>> {
        let size = self.batch_size.max(1);
        (0..workload)
            .step_by(size)
            .map(move |start| start..(start + size).min(workload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_items_per_ms() {
        let sample = ThroughputSample {
            subsystem_id: SubsystemId::Ai,
            mode: ExecutionMode::Single,
            item_count: 5000,
            elapsed_micros: 2000,
            timestamp_frame: 0,
        };
        assert_relative_eq!(sample.items_per_ms(), 2500.0);
        assert_relative_eq!(sample.elapsed_ms(), 2.0);
    }

    #[test]
    fn test_zero_elapsed_does_not_divide_by_zero() {
        let sample = ThroughputSample {
            subsystem_id: SubsystemId::Ai,
            mode: ExecutionMode::Multi,
            item_count: 10,
            elapsed_micros: 0,
            timestamp_frame: 0,
        };
        assert!(sample.items_per_ms().is_finite());
    }

    #[test]
    fn test_strategy_ranges_cover_workload() {
        let strategy = BatchStrategy {
            batch_count: 3,
            batch_size: 4,
        };
        let ranges: Vec<_> = strategy.ranges(10).collect();
        assert_eq!(ranges, vec![0..4, 4..8, 8..10]);
        assert_eq!(BatchStrategy::single(0).ranges(0).count(), 0);
    }

    #[test]
    fn test_mode_opposite() {
        assert_eq!(ExecutionMode::Single.opposite(), ExecutionMode::Multi);
        assert_eq!(ExecutionMode::Multi.opposite(), ExecutionMode::Single);
    }
}
