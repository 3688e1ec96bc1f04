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

//! Online tuning of per-subsystem batch multipliers.
//!
//! Each subsystem runs a small state machine:
//!
//! - **Exploring**: hill-climbing. Every `adjustment_interval` frames the
//!   smoothed throughput is compared with the value at the previous
//!   adjustment. An improvement keeps stepping in the same direction, a
//!   degradation reverses the direction, noise holds the multiplier.
//! - **Converged**: the multiplier is frozen after `convergence_frames`
//!   frames without improvement, until throughput falls more than
//!   `regression_threshold` below the baseline captured at convergence.
//!
//! Both phases evaluate at most once per `adjustment_interval` frames, so the
//! multiplier never changes twice within that many frames.

use crate::config::TunerConfig;
use std::collections::HashMap;
use tessel_core::control::{BatchMultiplier, BatchStrategy, TunerPhase};
use tessel_core::SubsystemId;

#[derive(Debug, Clone)]
struct TunerState {
    record: BatchMultiplier,
    /// +1.0 or -1.0.
    direction: f32,
    smoothed: Option<f64>,
    /// Smoothed throughput at the last evaluation.
    reference: Option<f64>,
    frames_without_improvement: u64,
    baseline: f64,
}

/// Hill-climbs a batch multiplier per subsystem from observed throughput.
#[derive(Debug)]
pub struct AdaptiveBatchTuner {
    config: TunerConfig,
    states: HashMap<SubsystemId, TunerState>,
}

impl AdaptiveBatchTuner {
    /// Creates a tuner with no history.
    pub fn new(config: &TunerConfig) -> Self {
        Self {
            config: config.clone(),
            states: HashMap::new(),
        }
    }

    /// Current multiplier of a subsystem. Unknown subsystems get the initial
    /// multiplier.
    pub fn batch_multiplier(&self, id: SubsystemId) -> f32 {
        self.states
            .get(&id)
            .map_or(self.config.initial_multiplier, |s| s.record.multiplier)
    }

    /// Current tuning phase of a subsystem.
    pub fn phase(&self, id: SubsystemId) -> TunerPhase {
        self.states
            .get(&id)
            .map_or(TunerPhase::Exploring, |s| s.record.phase)
    }

    /// Full multiplier record of a subsystem, once it has reported an outcome.
    pub fn multiplier_record(&self, id: SubsystemId) -> Option<BatchMultiplier> {
        self.states.get(&id).map(|s| s.record)
    }

    /// Every multiplier record, sorted by subsystem.
    pub fn multipliers(&self) -> Vec<BatchMultiplier> {
        let mut records: Vec<_> = self.states.values().map(|s| s.record).collect();
        records.sort_by_key(|r| r.subsystem_id);
        records
    }

    /// Drops the tuning state of a subsystem.
    pub fn forget(&mut self, id: SubsystemId) {
        self.states.remove(&id);
    }

    /// Feeds the throughput (items/ms) observed with `multiplier_used`.
    ///
    /// Non-finite or non-positive throughput is ignored, as are outcomes
    /// measured with a multiplier that has since been replaced.
    pub fn record_outcome(
        &mut self,
        id: SubsystemId,
        multiplier_used: f32,
        throughput: f64,
        frame: u64,
    ) {
        if !(throughput.is_finite() && throughput > 0.0) {
            log::trace!("Tuner: Ignored invalid throughput {} for {}", throughput, id);
            return;
        }

        let config = &self.config;
        let state = self.states.entry(id).or_insert_with(|| TunerState {
            record: BatchMultiplier {
                subsystem_id: id,
                multiplier: config.initial_multiplier,
                last_adjustment_frame: frame,
                phase: TunerPhase::Exploring,
            },
            direction: 1.0,
            smoothed: None,
            reference: None,
            frames_without_improvement: 0,
            baseline: 0.0,
        });

        if (multiplier_used - state.record.multiplier).abs() > f32::EPSILON {
            log::trace!("Tuner: Ignored stale outcome for {}", id);
            return;
        }

        let smoothed = match state.smoothed {
            Some(previous) => previous + config.smoothing * (throughput - previous),
            None => throughput,
        };
        state.smoothed = Some(smoothed);

        match state.record.phase {
            TunerPhase::Converged => {
                let elapsed = frame.saturating_sub(state.record.last_adjustment_frame);
                if elapsed >= config.adjustment_interval
                    && smoothed < state.baseline * (1.0 - config.regression_threshold)
                {
                    log::info!(
                        "Tuner: {} throughput regressed to {:.1} items/ms (baseline {:.1}), re-exploring",
                        id,
                        smoothed,
                        state.baseline
                    );
                    state.record.phase = TunerPhase::Exploring;
                    state.record.last_adjustment_frame = frame;
                    state.reference = Some(smoothed);
                    state.frames_without_improvement = 0;
                }
            }
            TunerPhase::Exploring => Self::explore(config, state, smoothed, frame),
        }
    }

    fn explore(config: &TunerConfig, state: &mut TunerState, smoothed: f64, frame: u64) {
        let Some(reference) = state.reference else {
            // First observation: take a step to have something to compare.
            state.reference = Some(smoothed);
            state.record.last_adjustment_frame = frame;
            Self::step(config, state);
            return;
        };

        let elapsed = frame.saturating_sub(state.record.last_adjustment_frame);
        if elapsed < config.adjustment_interval {
            return;
        }

        let change = (smoothed - reference) / reference;
        if change > config.noise_threshold {
            Self::step(config, state);
            state.frames_without_improvement = 0;
        } else if change < -config.noise_threshold {
            state.direction = -state.direction;
            Self::step(config, state);
            state.frames_without_improvement += elapsed;
        } else {
            state.frames_without_improvement += elapsed;
        }
        state.reference = Some(smoothed);
        state.record.last_adjustment_frame = frame;

        if state.frames_without_improvement >= config.convergence_frames {
            state.record.phase = TunerPhase::Converged;
            state.baseline = smoothed;
            log::info!(
                "Tuner: {} converged at multiplier {:.2} ({:.1} items/ms)",
                state.record.subsystem_id,
                state.record.multiplier,
                smoothed
            );
        }
    }

    /// Moves the multiplier one step, reversing direction at a bound.
    fn step(config: &TunerConfig, state: &mut TunerState) {
        let next = state.record.multiplier + state.direction * config.step;
        let next = if next >= config.max_multiplier {
            state.direction = -1.0;
            config.max_multiplier
        } else if next <= config.min_multiplier {
            state.direction = 1.0;
            config.min_multiplier
        } else {
            next
        };
        log::debug!(
            "Tuner: {} multiplier {:.2} -> {:.2}",
            state.record.subsystem_id,
            state.record.multiplier,
            next
        );
        state.record.multiplier = next;
    }

    /// How to cut `workload` items for `workers` workers.
    ///
    /// The batch count is the worker count scaled by the multiplier, capped
    /// so that batches hold at least `min_items_per_batch` items, and at
    /// least two when two workers have enough work to share.
    pub fn batch_strategy(&self, id: SubsystemId, workers: usize, workload: usize) -> BatchStrategy {
        if workers == 0 || workload == 0 {
            return BatchStrategy::single(workload);
        }

        let min_items = self.config.min_items_per_batch.max(1);
        let multiplier = self.batch_multiplier(id);
        let mut batch_count = ((workers as f32 * multiplier).floor() as usize).max(1);
        batch_count = batch_count.min((workload / min_items).max(1));
        if workers >= 2 && workload >= 2 * min_items {
            batch_count = batch_count.max(2);
        }

        // Rounding the size up can leave the last batches empty; drop them.
        let batch_size = workload.div_ceil(batch_count);
        BatchStrategy {
            batch_count: workload.div_ceil(batch_size),
            batch_size,
        }
    }
}
