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

//! Scheduler configuration.
//!
//! Every tunable of the scheduling components lives here. A configuration is
//! usually loaded from a RON file; any section or field left out falls back to
//! its default.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tessel_core::{SchedulerError, SubsystemId, TaskPriority};

/// Complete configuration of a [`crate::FrameScheduler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Hardware detection.
    pub hardware: HardwareConfig,
    /// Worker pool sizing.
    pub pool: PoolConfig,
    /// Frame budget and reporting.
    pub frame: FrameConfig,
    /// Subsystems registered when the scheduler is created.
    pub subsystems: Vec<SubsystemConfig>,
    /// Per-frame worker allocation.
    pub allocation: AllocationConfig,
    /// Throughput sampling.
    pub throughput: ThroughputConfig,
    /// Single/multi-threaded crossover learning.
    pub crossover: CrossoverConfig,
    /// Batch multiplier tuning.
    pub tuner: TunerConfig,
    /// Starvation guard.
    pub fairness: FairnessConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            hardware: HardwareConfig::default(),
            pool: PoolConfig::default(),
            frame: FrameConfig::default(),
            subsystems: SubsystemConfig::engine_defaults(),
            allocation: AllocationConfig::default(),
            throughput: ThroughputConfig::default(),
            crossover: CrossoverConfig::default(),
            tuner: TunerConfig::default(),
            fairness: FairnessConfig::default(),
        }
    }
}

/// Hardware detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Thread count used when every detection source fails.
    pub min_threads: usize,
    /// Forces a thread count instead of detecting it.
    pub thread_override: Option<usize>,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            min_threads: 2,
            thread_override: None,
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Capacity of the shared job queue.
    pub queue_capacity: usize,
    /// Pool queue pressure above which every subsystem is limited to a
    /// single worker for the frame.
    pub saturation_pressure: f32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            saturation_pressure: 0.9,
        }
    }
}

/// Frame budget settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Target frame time in milliseconds (60 FPS by default).
    pub target_frame_ms: f64,
    /// Frames between two summary log lines. Zero disables the summary.
    pub summary_interval_frames: u64,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            target_frame_ms: 16.67,
            summary_interval_frames: 600,
        }
    }
}

/// A subsystem registered at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsystemConfig {
    /// The subsystem.
    pub id: SubsystemId,
    /// Desired share of the hardware threads, in percent.
    pub percent: f32,
    /// Admission limits, for subsystems that produce bursty requests.
    #[serde(default)]
    pub gate: Option<GateConfig>,
    /// Queue the subsystem's submissions are placed on in the worker pool.
    #[serde(default)]
    pub priority: TaskPriority,
}

impl SubsystemConfig {
    /// Creates an ungated subsystem entry.
    pub fn new(id: SubsystemId, percent: f32) -> Self {
        Self {
            id,
            percent,
            gate: None,
            priority: TaskPriority::Normal,
        }
    }

    /// Adds admission limits to the entry.
    pub fn with_gate(mut self, gate: GateConfig) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Sets the pool priority of the subsystem's submissions.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// The split tuned for the engine's five built-in consumers, leaving a
    /// 7% reserve for the main thread.
    pub fn engine_defaults() -> Vec<Self> {
        vec![
            Self::new(SubsystemId::Ai, 44.0).with_priority(TaskPriority::High),
            Self::new(SubsystemId::Pathfinding, 19.0).with_gate(GateConfig::default()),
            Self::new(SubsystemId::Collision, 12.0).with_priority(TaskPriority::High),
            Self::new(SubsystemId::Particles, 12.0),
            Self::new(SubsystemId::BackgroundSimulation, 6.0).with_priority(TaskPriority::Low),
        ]
    }
}

/// Per-frame allocation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// Lets subsystems borrow workers left idle by the static budgets.
    pub burst: bool,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self { burst: true }
    }
}

/// Throughput sampling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThroughputConfig {
    /// Samples kept per subsystem and execution mode.
    pub window: usize,
    /// Samples kept per workload-size band and execution mode.
    pub band_window: usize,
    /// Samples required in a mode before it is trusted.
    pub min_samples: usize,
}

impl Default for ThroughputConfig {
    fn default() -> Self {
        Self {
            window: 3000,
            band_window: 16,
            min_samples: 5,
        }
    }
}

/// Crossover learning settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossoverConfig {
    /// Multi/single throughput ratio multi-threading must beat.
    pub speedup_margin: f64,
    /// Weight of a new candidate when smoothing the crossover threshold
    /// toward the smallest workload band where multi-threading wins.
    pub smoothing: f64,
    /// Workloads smaller than this always run single-threaded.
    pub min_workload: usize,
    /// Mean single-threaded time of a workload band above which
    /// multi-threaded probes are run while that band is learned.
    pub probe_min_single_ms: f64,
    /// Frames between two probes of the non-chosen mode. Zero disables
    /// resampling.
    pub resample_interval: u64,
}

impl Default for CrossoverConfig {
    fn default() -> Self {
        Self {
            speedup_margin: 1.1,
            smoothing: 0.2,
            min_workload: 100,
            probe_min_single_ms: 0.5,
            resample_interval: 120,
        }
    }
}

/// Batch multiplier tuning settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Multiplier every subsystem starts from.
    pub initial_multiplier: f32,
    /// Lower bound of the multiplier.
    pub min_multiplier: f32,
    /// Upper bound of the multiplier.
    pub max_multiplier: f32,
    /// Change applied by one adjustment.
    pub step: f32,
    /// Relative throughput change treated as noise.
    pub noise_threshold: f64,
    /// Frames without improvement before the multiplier is frozen.
    pub convergence_frames: u64,
    /// Minimum frames between two adjustments.
    pub adjustment_interval: u64,
    /// Relative drop below the converged baseline that restarts exploration.
    pub regression_threshold: f64,
    /// Weight of a new observation in the smoothed throughput.
    pub smoothing: f64,
    /// Smallest batch worth handing to a worker.
    pub min_items_per_batch: usize,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            initial_multiplier: 1.0,
            min_multiplier: 0.25,
            max_multiplier: 4.0,
            step: 0.1,
            noise_threshold: 0.02,
            convergence_frames: 30,
            adjustment_interval: 4,
            regression_threshold: 0.15,
            smoothing: 0.3,
            min_items_per_batch: 8,
        }
    }
}

/// Admission limits of a request-producing subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Requests admitted per frame.
    pub max_admitted_per_frame: usize,
    /// Deferred requests kept pending; the rest are dropped.
    pub queue_capacity: usize,
    /// Queue pressure above which admissions are flagged as degraded.
    pub critical_pressure: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_admitted_per_frame: 50,
            queue_capacity: 500,
            critical_pressure: 0.8,
        }
    }
}

/// Starvation guard settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FairnessConfig {
    /// Consecutive starved frames after which a worker is forced.
    pub starvation_ceiling: u32,
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            starvation_ceiling: 3,
        }
    }
}

fn invalid(message: impl Into<String>) -> SchedulerError {
    SchedulerError::InvalidConfig(message.into())
}

fn is_unit_fraction(value: f64) -> bool {
    value.is_finite() && value > 0.0 && value <= 1.0
}

impl SchedulerConfig {
    /// Parses a configuration from RON text and validates it.
    pub fn from_ron_str(text: &str) -> Result<Self, SchedulerError> {
        let config: Self =
            ron::from_str(text).map_err(|e| SchedulerError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a RON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SchedulerError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_ron_str(&text)?;
        log::info!("Config: Loaded scheduler configuration from '{}'", path.display());
        Ok(config)
    }

    /// Serializes the configuration as pretty-printed RON.
    pub fn to_ron_string(&self) -> Result<String, SchedulerError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| SchedulerError::ConfigParse(e.to_string()))
    }

    /// Checks every value for consistency.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.hardware.min_threads == 0 {
            return Err(invalid("hardware.min_threads must be at least 1"));
        }
        if self.hardware.thread_override == Some(0) {
            return Err(invalid("hardware.thread_override must be at least 1"));
        }
        if self.pool.queue_capacity == 0 {
            return Err(invalid("pool.queue_capacity must be at least 1"));
        }
        if !is_unit_fraction(f64::from(self.pool.saturation_pressure)) {
            return Err(invalid("pool.saturation_pressure must be in (0, 1]"));
        }
        if !(self.frame.target_frame_ms.is_finite() && self.frame.target_frame_ms > 0.0) {
            return Err(invalid("frame.target_frame_ms must be positive"));
        }

        let mut seen = HashSet::new();
        for subsystem in &self.subsystems {
            if !seen.insert(subsystem.id) {
                return Err(invalid(format!(
                    "subsystem {} is listed more than once",
                    subsystem.id
                )));
            }
            if !(subsystem.percent.is_finite() && (0.0..=100.0).contains(&subsystem.percent)) {
                return Err(SchedulerError::InvalidShare {
                    id: subsystem.id,
                    percent: subsystem.percent,
                });
            }
            if let Some(gate) = &subsystem.gate {
                gate.validate(subsystem.id)?;
            }
        }

        let throughput = &self.throughput;
        if throughput.min_samples == 0
            || throughput.window < throughput.min_samples
            || throughput.band_window < throughput.min_samples
        {
            return Err(invalid(
                "throughput.window and throughput.band_window must hold at least min_samples (>= 1) samples",
            ));
        }

        let crossover = &self.crossover;
        if !(crossover.speedup_margin.is_finite() && crossover.speedup_margin >= 1.0) {
            return Err(invalid("crossover.speedup_margin must be at least 1.0"));
        }
        if !is_unit_fraction(crossover.smoothing) {
            return Err(invalid("crossover.smoothing must be in (0, 1]"));
        }
        if !(crossover.probe_min_single_ms.is_finite() && crossover.probe_min_single_ms >= 0.0) {
            return Err(invalid("crossover.probe_min_single_ms must not be negative"));
        }

        let tuner = &self.tuner;
        if !(tuner.min_multiplier > 0.0
            && tuner.min_multiplier <= tuner.initial_multiplier
            && tuner.initial_multiplier <= tuner.max_multiplier
            && tuner.max_multiplier.is_finite())
        {
            return Err(invalid(
                "tuner multipliers must satisfy 0 < min <= initial <= max",
            ));
        }
        if !(tuner.step.is_finite() && tuner.step > 0.0) {
            return Err(invalid("tuner.step must be positive"));
        }
        if !(tuner.noise_threshold.is_finite() && tuner.noise_threshold >= 0.0) {
            return Err(invalid("tuner.noise_threshold must not be negative"));
        }
        if tuner.adjustment_interval == 0 || tuner.convergence_frames == 0 {
            return Err(invalid(
                "tuner.adjustment_interval and tuner.convergence_frames must be at least 1",
            ));
        }
        if !(is_unit_fraction(tuner.regression_threshold) && tuner.regression_threshold < 1.0) {
            return Err(invalid("tuner.regression_threshold must be in (0, 1)"));
        }
        if !is_unit_fraction(tuner.smoothing) {
            return Err(invalid("tuner.smoothing must be in (0, 1]"));
        }
        if tuner.min_items_per_batch == 0 {
            return Err(invalid("tuner.min_items_per_batch must be at least 1"));
        }

        if self.fairness.starvation_ceiling == 0 {
            return Err(invalid("fairness.starvation_ceiling must be at least 1"));
        }
        Ok(())
    }
}

impl GateConfig {
    fn validate(&self, id: SubsystemId) -> Result<(), SchedulerError> {
        if self.max_admitted_per_frame == 0 || self.queue_capacity == 0 {
            return Err(invalid(format!(
                "gate of {id}: max_admitted_per_frame and queue_capacity must be at least 1"
            )));
        }
        if !is_unit_fraction(f64::from(self.critical_pressure)) {
            return Err(invalid(format!(
                "gate of {id}: critical_pressure must be in (0, 1]"
            )));
        }
        Ok(())
    }
}
