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

//! Per-frame choice between single- and multi-threaded execution.

use crate::config::CrossoverConfig;
use crate::throughput::ThroughputTracker;
use std::collections::HashMap;
use tessel_core::control::{DecisionReason, ExecutionMode, ThreadingDecision};
use tessel_core::{HardwareProfile, SubsystemId};

/// Decides, from measured throughput, whether a workload should be split
/// across workers.
///
/// Multi-threading is only chosen once it has been measured to beat
/// single-threading by the configured margin and the workload has reached
/// the learned crossover point. While evidence is missing, the estimator
/// issues *probes*: frames run in the other mode purely to collect samples.
#[derive(Debug)]
pub struct ThreadingCrossoverEstimator {
    config: CrossoverConfig,
    parallel_hardware: bool,
    last_decisions: HashMap<SubsystemId, ThreadingDecision>,
}

impl ThreadingCrossoverEstimator {
    /// Creates an estimator for the given hardware.
    pub fn new(config: &CrossoverConfig, profile: HardwareProfile) -> Self {
        Self {
            config: config.clone(),
            parallel_hardware: profile.is_parallel(),
            last_decisions: HashMap::new(),
        }
    }

    /// Returns `true` if `entity_count` has reached the crossover point and
    /// multi-threading has been measured to beat single-threading by the
    /// margin at workloads of that size.
    pub fn should_use_multi_threaded(
        &self,
        id: SubsystemId,
        entity_count: usize,
        tracker: &ThroughputTracker,
    ) -> bool {
        tracker
            .crossover(id)
            .is_some_and(|point| entity_count >= point.entity_count_threshold)
            && tracker
                .speedup_at(id, entity_count)
                .is_some_and(|speedup| speedup > self.config.speedup_margin)
    }

    /// Picks the execution mode for this frame, including learning probes.
    pub fn decide(
        &mut self,
        id: SubsystemId,
        entity_count: usize,
        frame: u64,
        tracker: &ThroughputTracker,
    ) -> ThreadingDecision {
        let decision = self.evaluate(id, entity_count, frame, tracker);

        let previous = self.last_decisions.insert(id, decision);
        if previous.map(|d| d.mode) != Some(decision.mode) && !decision.is_probe() {
            log::debug!(
                "Crossover: {} switches to {:?} at {} entities ({:?})",
                id,
                decision.mode,
                entity_count,
                decision.reason
            );
        }
        decision
    }

    /// The last decision taken for a subsystem.
    pub fn last_decision(&self, id: SubsystemId) -> Option<ThreadingDecision> {
        self.last_decisions.get(&id).copied()
    }

    /// Drops the decision history of a subsystem.
    pub fn forget(&mut self, id: SubsystemId) {
        self.last_decisions.remove(&id);
    }

    fn evaluate(
        &self,
        id: SubsystemId,
        entity_count: usize,
        frame: u64,
        tracker: &ThroughputTracker,
    ) -> ThreadingDecision {
        if !self.parallel_hardware {
            return ThreadingDecision::single(DecisionReason::NoParallelHardware);
        }
        if entity_count < self.config.min_workload {
            return ThreadingDecision::single(DecisionReason::BelowMinimumWorkload);
        }
        // Evidence is gathered per workload size; each size band is learned
        // in both modes before it gets a verdict.
        if !tracker.has_local_samples(id, ExecutionMode::Single, entity_count) {
            return ThreadingDecision::single(DecisionReason::Learning);
        }
        if !tracker.has_local_samples(id, ExecutionMode::Multi, entity_count) {
            // Cheap workloads are not worth a probe.
            let single_ms = tracker.local_elapsed_ms(id, ExecutionMode::Single, entity_count);
            return if single_ms >= self.config.probe_min_single_ms {
                ThreadingDecision::multi(DecisionReason::Probe)
            } else {
                ThreadingDecision::single(DecisionReason::Learning)
            };
        }

        let verdict = if self.should_use_multi_threaded(id, entity_count, tracker) {
            ThreadingDecision::multi(DecisionReason::Crossover)
        } else if tracker
            .speedup_at(id, entity_count)
            .is_some_and(|speedup| speedup > self.config.speedup_margin)
        {
            ThreadingDecision::single(DecisionReason::BelowCrossover)
        } else {
            ThreadingDecision::single(DecisionReason::NoSpeedup)
        };

        let interval = self.config.resample_interval;
        if interval > 0 && frame > 0 && frame % interval == 0 {
            let mode = verdict.mode.opposite();
            return ThreadingDecision {
                mode,
                reason: DecisionReason::Probe,
            };
        }
        verdict
    }
}
