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

//! The scheduler context object.
//!
//! [`FrameScheduler`] owns every scheduling component and drives them in
//! frame order. It is created once at engine start-up and shut down
//! explicitly; all of its methods run on the main thread.
//!
//! A frame looks like:
//!
//! ```text
//! begin_frame -> plan_frame -> (execute | record)* -> try_admit* -> end_frame
//! ```

use crate::allocator::BudgetAllocator;
use crate::config::{GateConfig, SchedulerConfig};
use crate::crossover::ThreadingCrossoverEstimator;
use crate::fairness::FairnessMonitor;
use crate::gate::RequestGate;
use crate::throughput::ThroughputTracker;
use crate::tuner::AdaptiveBatchTuner;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tessel_core::control::{
    Admission, BatchMultiplier, BatchStrategy, CrossoverPoint, ExecutionMode, RequestQueueState,
    StarvationCounter, ThreadingDecision, WorkerBudget, WorkerDemand,
};
use tessel_core::{
    BatchExecutor, HardwareProfile, SchedulerError, Stopwatch, SubmissionReport, SubsystemId, Task,
    TaskPriority,
};

/// Work a subsystem has to process this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    /// The subsystem.
    pub subsystem_id: SubsystemId,
    /// Number of items (entities, particles, requests) to process.
    pub item_count: usize,
}

impl Workload {
    /// Creates a workload.
    pub fn new(subsystem_id: SubsystemId, item_count: usize) -> Self {
        Self {
            subsystem_id,
            item_count,
        }
    }
}

/// How one subsystem runs in the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SubsystemPlan {
    /// The subsystem.
    pub subsystem_id: SubsystemId,
    /// Frame the plan was made for.
    pub frame: u64,
    /// Items to process.
    pub item_count: usize,
    /// The crossover estimator's decision.
    pub decision: ThreadingDecision,
    /// Workers granted. Zero means the workload runs inline.
    pub workers: usize,
    /// Pool queue the batches are submitted on.
    pub priority: TaskPriority,
    /// `true` if the worker was forced by the starvation guard.
    pub forced: bool,
    /// Batch multiplier the strategy was computed with.
    pub multiplier: f32,
    /// How to cut the workload into batches.
    pub strategy: BatchStrategy,
}

impl SubsystemPlan {
    /// The mode the workload will actually run in.
    pub fn mode(&self) -> ExecutionMode {
        if self.workers > 0 {
            ExecutionMode::Multi
        } else {
            ExecutionMode::Single
        }
    }

    /// Item ranges of the batches to submit.
    pub fn ranges(&self) -> impl Iterator<Item = std::ops::Range<usize>> {
        self.strategy.ranges(self.item_count)
    }
}

/// Plans of every subsystem for one frame.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FramePlan {
    /// The planned frame.
    pub frame: u64,
    /// One plan per registered subsystem that submitted a workload.
    pub plans: Vec<SubsystemPlan>,
}

impl FramePlan {
    /// The plan of a subsystem, if it submitted a workload.
    pub fn get(&self, id: SubsystemId) -> Option<&SubsystemPlan> {
        self.plans.iter().find(|plan| plan.subsystem_id == id)
    }

    /// Total workers granted this frame.
    pub fn workers_granted(&self) -> usize {
        self.plans.iter().map(|plan| plan.workers).sum()
    }
}

/// Summary of a completed frame.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameReport {
    /// The completed frame.
    pub frame: u64,
    /// Wall time between `begin_frame` and `end_frame`.
    pub elapsed_ms: f64,
    /// `true` if the frame exceeded the target frame time.
    pub over_budget: bool,
    /// Subsystems planned.
    pub subsystems_planned: usize,
    /// Subsystems that ran on pool workers.
    pub multi_threaded: usize,
    /// Workers granted over all subsystems.
    pub workers_granted: usize,
    /// Subsystems served by the starvation guard.
    pub forced: Vec<SubsystemId>,
    /// Batches that returned an error or panicked.
    pub batches_failed: usize,
}

/// Throughput figures of one subsystem.
#[derive(Debug, Clone, Serialize)]
pub struct ThroughputSummary {
    /// The subsystem.
    pub subsystem_id: SubsystemId,
    /// Mean single-threaded throughput (items/ms).
    pub single_items_per_ms: f64,
    /// Mean multi-threaded throughput (items/ms).
    pub multi_items_per_ms: f64,
    /// Single-threaded samples in the window.
    pub single_samples: usize,
    /// Multi-threaded samples in the window.
    pub multi_samples: usize,
    /// Frame of the latest single-threaded sample.
    pub single_last_frame: Option<u64>,
    /// Frame of the latest multi-threaded sample.
    pub multi_last_frame: Option<u64>,
    /// Last threading decision.
    pub last_decision: Option<ThreadingDecision>,
}

/// Point-in-time view of every scheduling record.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    /// Frames completed so far.
    pub frame: u64,
    /// Hardware threads the budgets are computed from.
    pub logical_threads: usize,
    /// Worker threads behind the executor.
    pub pool_workers: usize,
    /// Static budgets, in priority order.
    pub budgets: Vec<WorkerBudget>,
    /// Throughput figures per tracked subsystem.
    pub throughput: Vec<ThroughputSummary>,
    /// Learned crossover points.
    pub crossovers: Vec<CrossoverPoint>,
    /// Batch multipliers.
    pub multipliers: Vec<BatchMultiplier>,
    /// Admission states of gated subsystems.
    pub queues: Vec<RequestQueueState>,
    /// Starvation records.
    pub starvation: Vec<StarvationCounter>,
}

/// Per-frame counters folded into the [`FrameReport`].
#[derive(Debug, Default)]
struct FrameStats {
    planned: usize,
    multi_threaded: usize,
    workers_granted: usize,
    forced: Vec<SubsystemId>,
    batches_failed: usize,
}

/// Process-wide scheduling context.
pub struct FrameScheduler {
    config: SchedulerConfig,
    profile: HardwareProfile,
    executor: Arc<dyn BatchExecutor>,
    allocator: BudgetAllocator,
    tracker: ThroughputTracker,
    estimator: ThreadingCrossoverEstimator,
    tuner: AdaptiveBatchTuner,
    gate: RequestGate,
    fairness: FairnessMonitor,
    priorities: HashMap<SubsystemId, TaskPriority>,
    frame: u64,
    frame_clock: Stopwatch,
    stats: FrameStats,
    running: bool,
}

impl FrameScheduler {
    /// Creates the scheduler and registers the subsystems listed in the
    /// configuration.
    pub fn new(
        config: SchedulerConfig,
        profile: HardwareProfile,
        executor: Arc<dyn BatchExecutor>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;

        let mut scheduler = Self {
            allocator: BudgetAllocator::new(profile, config.allocation.burst),
            tracker: ThroughputTracker::new(&config.throughput, &config.crossover),
            estimator: ThreadingCrossoverEstimator::new(&config.crossover, profile),
            tuner: AdaptiveBatchTuner::new(&config.tuner),
            gate: RequestGate::new(),
            fairness: FairnessMonitor::new(&config.fairness),
            priorities: HashMap::new(),
            frame: 0,
            frame_clock: Stopwatch::new(),
            stats: FrameStats::default(),
            running: true,
            config,
            profile,
            executor,
        };

        for subsystem in scheduler.config.subsystems.clone() {
            scheduler.register_subsystem(subsystem.id, subsystem.percent)?;
            if let Some(gate) = subsystem.gate {
                scheduler.gate.configure(subsystem.id, gate);
            }
            scheduler.priorities.insert(subsystem.id, subsystem.priority);
        }

        log::info!(
            "Scheduler: Started on {} hardware thread(s) with {} pool worker(s), {} subsystem(s)",
            profile.logical_threads(),
            scheduler.executor.worker_count(),
            scheduler.config.subsystems.len()
        );
        Ok(scheduler)
    }

    // ── Registration ─────────────────────────────────────────────────────

    /// Registers a subsystem with its desired share of the hardware threads.
    pub fn register_subsystem(
        &mut self,
        id: SubsystemId,
        desired_percent: f32,
    ) -> Result<WorkerBudget, SchedulerError> {
        self.allocator.register_subsystem(id, desired_percent)
    }

    /// Puts a registered subsystem behind the request gate.
    pub fn configure_gate(&mut self, id: SubsystemId, gate: GateConfig) -> Result<(), SchedulerError> {
        if !self.allocator.is_registered(id) {
            return Err(SchedulerError::UnknownSubsystem(id));
        }
        self.gate.configure(id, gate);
        Ok(())
    }

    /// Sets the pool priority of a registered subsystem's submissions.
    pub fn set_priority(
        &mut self,
        id: SubsystemId,
        priority: TaskPriority,
    ) -> Result<(), SchedulerError> {
        if !self.allocator.is_registered(id) {
            return Err(SchedulerError::UnknownSubsystem(id));
        }
        self.priorities.insert(id, priority);
        Ok(())
    }

    /// Pool priority of a subsystem. Unconfigured subsystems run at
    /// [`TaskPriority::Normal`].
    pub fn priority(&self, id: SubsystemId) -> TaskPriority {
        self.priorities.get(&id).copied().unwrap_or_default()
    }

    /// Removes a subsystem and every record kept about it.
    pub fn unregister_subsystem(&mut self, id: SubsystemId) -> Result<(), SchedulerError> {
        self.allocator.unregister_subsystem(id)?;
        self.tracker.forget(id);
        self.estimator.forget(id);
        self.tuner.forget(id);
        self.gate.remove(id);
        self.fairness.forget(id);
        self.priorities.remove(&id);
        Ok(())
    }

    /// Static budget of a subsystem.
    pub fn budget(&self, id: SubsystemId) -> Option<WorkerBudget> {
        self.allocator.budget(id)
    }

    // ── Frame loop ───────────────────────────────────────────────────────

    /// Starts a frame: resets per-frame admission counts and the frame clock.
    pub fn begin_frame(&mut self) {
        self.frame_clock = Stopwatch::new();
        self.stats = FrameStats::default();
        self.gate.begin_frame();
    }

    /// Decides mode, workers and batching for every workload of the frame.
    ///
    /// Workloads of unregistered subsystems are left out of the plan.
    pub fn plan_frame(&mut self, workloads: &[Workload]) -> FramePlan {
        let frame = self.frame;
        let saturated = self.executor.queue_pressure() > self.config.pool.saturation_pressure;
        if saturated {
            log::debug!("Scheduler: Pool saturated, limiting subsystems to one worker");
        }

        // ── 1. Threading decisions ───────────────────────────────────────
        let mut decided = Vec::with_capacity(workloads.len());
        for workload in workloads {
            let id = workload.subsystem_id;
            if !self.allocator.is_registered(id) {
                log::warn!("Scheduler: Workload from unregistered subsystem {} ignored", id);
                continue;
            }
            let decision = self
                .estimator
                .decide(id, workload.item_count, frame, &self.tracker);
            decided.push((*workload, decision));
        }

        // ── 2. Worker demands ────────────────────────────────────────────
        let demands: Vec<WorkerDemand> = decided
            .iter()
            .map(|(workload, decision)| WorkerDemand {
                subsystem_id: workload.subsystem_id,
                workers: match decision.mode {
                    ExecutionMode::Multi => self.demand_for(workload.subsystem_id, saturated),
                    ExecutionMode::Single => 0,
                },
            })
            .collect();

        // ── 3. Allocation, starved subsystems first ──────────────────────
        let forced = self.fairness.forced_subsystems();
        let grants =
            self.allocator
                .allocate_frame(&demands, self.profile.logical_threads(), &forced);

        // ── 4. Fairness and batching ─────────────────────────────────────
        let mut plans = Vec::with_capacity(grants.len());
        for ((workload, decision), grant) in decided.into_iter().zip(grants) {
            let id = workload.subsystem_id;
            self.fairness
                .record_allocation(id, grant.granted, grant.demanded);
            if grant.forced {
                self.fairness.record_forced(id);
                self.stats.forced.push(id);
            }

            let multiplier = self.tuner.batch_multiplier(id);
            let strategy = self
                .tuner
                .batch_strategy(id, grant.granted, workload.item_count);
            plans.push(SubsystemPlan {
                subsystem_id: id,
                frame,
                item_count: workload.item_count,
                decision,
                workers: grant.granted,
                priority: self.priority(id),
                forced: grant.forced,
                multiplier,
                strategy,
            });
        }

        self.stats.planned += plans.len();
        self.stats.workers_granted += plans.iter().map(|p| p.workers).sum::<usize>();
        FramePlan { frame, plans }
    }

    /// Runs a planned workload on the executor and records its throughput in
    /// the mode that actually ran.
    ///
    /// Samples from submissions with failed batches are discarded.
    pub fn execute(&mut self, plan: &SubsystemPlan, batches: Vec<Task>) -> SubmissionReport {
        let stopwatch = Stopwatch::new();
        let report = self.executor.submit(batches, plan.workers, plan.priority);
        let elapsed_micros = stopwatch.elapsed_micros();

        let mode = if report.workers_used > 0 {
            ExecutionMode::Multi
        } else {
            ExecutionMode::Single
        };
        if mode == ExecutionMode::Multi {
            self.stats.multi_threaded += 1;
        }

        if report.is_partial_failure() {
            self.stats.batches_failed += report.failed;
            log::warn!(
                "Scheduler: {} had {}/{} failed batch(es), sample discarded",
                plan.subsystem_id,
                report.failed,
                report.submitted
            );
            return report;
        }

        if self
            .tracker
            .record(plan.subsystem_id, mode, plan.item_count, elapsed_micros, self.frame)
            && mode == ExecutionMode::Multi
        {
            self.feed_tuner(plan.subsystem_id, plan.multiplier, plan.item_count, elapsed_micros);
        }
        report
    }

    /// Records a workload the subsystem ran and timed itself.
    ///
    /// Returns `false` if the sample was skipped as degenerate.
    pub fn record(
        &mut self,
        id: SubsystemId,
        mode: ExecutionMode,
        item_count: usize,
        elapsed_micros: u64,
    ) -> bool {
        let recorded = self
            .tracker
            .record(id, mode, item_count, elapsed_micros, self.frame);
        if recorded && mode == ExecutionMode::Multi {
            let multiplier = self.tuner.batch_multiplier(id);
            self.feed_tuner(id, multiplier, item_count, elapsed_micros);
        }
        recorded
    }

    /// Offers new requests of a gated subsystem.
    pub fn try_admit(&mut self, id: SubsystemId, count: usize) -> Admission {
        self.gate.try_admit(id, count)
    }

    /// Admits deferred requests of a gated subsystem.
    pub fn retry_deferred(&mut self, id: SubsystemId) -> Admission {
        self.gate.retry_deferred(id)
    }

    /// Gives up on deferred requests of a gated subsystem.
    pub fn drop_deferred(&mut self, id: SubsystemId, count: usize) -> usize {
        self.gate.drop_deferred(id, count)
    }

    /// Request queue pressure of a gated subsystem, in `[0, 1]`.
    pub fn queue_pressure(&self, id: SubsystemId) -> f32 {
        self.gate.queue_pressure(id)
    }

    /// Closes the frame and returns its report.
    pub fn end_frame(&mut self) -> FrameReport {
        let stats = std::mem::take(&mut self.stats);
        let elapsed_ms = self.frame_clock.elapsed_ms_f64();
        let report = FrameReport {
            frame: self.frame,
            elapsed_ms,
            over_budget: elapsed_ms > self.config.frame.target_frame_ms,
            subsystems_planned: stats.planned,
            multi_threaded: stats.multi_threaded,
            workers_granted: stats.workers_granted,
            forced: stats.forced,
            batches_failed: stats.batches_failed,
        };

        if report.over_budget {
            log::debug!(
                "Scheduler: Frame {} took {:.2}ms (target {:.2}ms)",
                report.frame,
                elapsed_ms,
                self.config.frame.target_frame_ms
            );
        }

        let interval = self.config.frame.summary_interval_frames;
        if interval > 0 && (self.frame + 1) % interval == 0 {
            log::info!(
                "Scheduler: Frame {} | {:.2}ms | {}/{} subsystem(s) parallel | {} worker(s) | {} forced",
                report.frame,
                elapsed_ms,
                report.multi_threaded,
                report.subsystems_planned,
                report.workers_granted,
                report.forced.len()
            );
        }

        self.frame += 1;
        report
    }

    /// Copies every scheduling record.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let throughput = self
            .tracker
            .tracked_subsystems()
            .into_iter()
            .map(|id| ThroughputSummary {
                subsystem_id: id,
                single_items_per_ms: self.tracker.throughput(id, ExecutionMode::Single),
                multi_items_per_ms: self.tracker.throughput(id, ExecutionMode::Multi),
                single_samples: self.tracker.sample_count(id, ExecutionMode::Single),
                multi_samples: self.tracker.sample_count(id, ExecutionMode::Multi),
                single_last_frame: self.tracker.last_sample_frame(id, ExecutionMode::Single),
                multi_last_frame: self.tracker.last_sample_frame(id, ExecutionMode::Multi),
                last_decision: self.estimator.last_decision(id),
            })
            .collect();

        SchedulerSnapshot {
            frame: self.frame,
            logical_threads: self.profile.logical_threads(),
            pool_workers: self.executor.worker_count(),
            budgets: self.allocator.budgets(),
            throughput,
            crossovers: self.tracker.crossovers(),
            multipliers: self.tuner.multipliers(),
            queues: self.gate.states(),
            starvation: self.fairness.counters(),
        }
    }

    /// Shuts the executor down. Called automatically on drop.
    pub fn shutdown(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.executor.shutdown();
        log::info!("Scheduler: Shut down after {} frame(s)", self.frame);
    }

    // ── Accessors ────────────────────────────────────────────────────────

    /// Frames completed so far; also the number of the current frame.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// The hardware the scheduler was sized from.
    pub fn profile(&self) -> HardwareProfile {
        self.profile
    }

    /// The active configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The executor batches are submitted to.
    pub fn executor(&self) -> &Arc<dyn BatchExecutor> {
        &self.executor
    }

    /// The throughput tracker.
    pub fn tracker(&self) -> &ThroughputTracker {
        &self.tracker
    }

    /// The crossover estimator.
    pub fn estimator(&self) -> &ThreadingCrossoverEstimator {
        &self.estimator
    }

    /// The batch tuner.
    pub fn tuner(&self) -> &AdaptiveBatchTuner {
        &self.tuner
    }

    /// The request gate.
    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    /// The fairness monitor.
    pub fn fairness(&self) -> &FairnessMonitor {
        &self.fairness
    }

    /// Workers a multi-threaded subsystem asks for: its budget (at least one),
    /// doubled when burst capacity may be borrowed.
    fn demand_for(&self, id: SubsystemId, saturated: bool) -> usize {
        if saturated {
            return 1;
        }
        let budget = self.allocator.budget(id).map_or(0, |b| b.allocated_threads);
        let base = budget.max(1);
        if self.config.allocation.burst {
            base + budget
        } else {
            base
        }
    }

    fn feed_tuner(&mut self, id: SubsystemId, multiplier: f32, item_count: usize, elapsed_micros: u64) {
        let throughput = item_count as f64 / (elapsed_micros.max(1) as f64 / 1000.0);
        self.tuner
            .record_outcome(id, multiplier, throughput, self.frame);
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubsystemConfig;
    use tessel_core::control::DecisionReason;
    use tessel_core::task::task;
    use tessel_core::InlineExecutor;
    use std::sync::Mutex;

    /// Runs inline and remembers the priority of every submission.
    #[derive(Default)]
    struct RecordingExecutor {
        priorities: Mutex<Vec<TaskPriority>>,
    }

    impl BatchExecutor for RecordingExecutor {
        fn submit(
            &self,
            batches: Vec<Task>,
            _max_workers: usize,
            priority: TaskPriority,
        ) -> SubmissionReport {
            self.priorities.lock().unwrap().push(priority);
            InlineExecutor::run_inline(batches)
        }

        fn worker_count(&self) -> usize {
            0
        }
    }

    fn scheduler(threads: usize, subsystems: Vec<SubsystemConfig>) -> FrameScheduler {
        let config = SchedulerConfig {
            subsystems,
            ..SchedulerConfig::default()
        };
        FrameScheduler::new(config, HardwareProfile::new(threads), Arc::new(InlineExecutor)).unwrap()
    }

    #[test]
    fn test_default_subsystems_are_registered() {
        let scheduler = scheduler(8, SubsystemConfig::engine_defaults());
        assert_eq!(scheduler.budget(SubsystemId::Ai).unwrap().allocated_threads, 3);
        assert_eq!(
            scheduler.budget(SubsystemId::Pathfinding).unwrap().allocated_threads,
            1
        );
        assert!(scheduler.gate().is_gated(SubsystemId::Pathfinding));
        assert!(!scheduler.gate().is_gated(SubsystemId::Ai));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = SchedulerConfig::default();
        config.fairness.starvation_ceiling = 0;
        let result = FrameScheduler::new(config, HardwareProfile::new(4), Arc::new(InlineExecutor));
        assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
    }

    #[test]
    fn test_learning_frame_runs_inline() {
        let mut scheduler = scheduler(8, SubsystemConfig::engine_defaults());
        scheduler.begin_frame();
        let plan = scheduler.plan_frame(&[Workload::new(SubsystemId::Ai, 5000)]);
        let ai = plan.get(SubsystemId::Ai).unwrap();
        assert_eq!(ai.decision.reason, DecisionReason::Learning);
        assert_eq!(ai.workers, 0);
        assert_eq!(ai.mode(), ExecutionMode::Single);
        assert_eq!(ai.strategy, BatchStrategy::single(5000));

        let batches = ai.ranges().map(|_| task(|| Ok(()))).collect();
        let report = scheduler.execute(ai, batches);
        assert!(report.is_success());
        assert_eq!(
            scheduler.tracker().sample_count(SubsystemId::Ai, ExecutionMode::Single),
            1
        );

        let frame = scheduler.end_frame();
        assert_eq!(frame.frame, 0);
        assert_eq!(frame.subsystems_planned, 1);
        assert_eq!(scheduler.frame(), 1);
    }

    #[test]
    fn test_unregistered_workload_is_left_out() {
        let mut scheduler = scheduler(8, SubsystemConfig::engine_defaults());
        scheduler.begin_frame();
        let plan = scheduler.plan_frame(&[Workload::new(SubsystemId::Custom(3), 100)]);
        assert!(plan.plans.is_empty());
    }

    #[test]
    fn test_failed_batches_discard_sample() {
        let mut scheduler = scheduler(8, SubsystemConfig::engine_defaults());
        scheduler.begin_frame();
        let plan = scheduler.plan_frame(&[Workload::new(SubsystemId::Collision, 1000)]);
        let collision = *plan.get(SubsystemId::Collision).unwrap();

        let report = scheduler.execute(
            &collision,
            vec![task(|| Ok(())), task(|| anyhow::bail!("narrow phase failed"))],
        );
        assert_eq!(report.failed, 1);
        assert_eq!(
            scheduler
                .tracker()
                .sample_count(SubsystemId::Collision, ExecutionMode::Single),
            0
        );
        assert_eq!(scheduler.end_frame().batches_failed, 1);
    }

    #[test]
    fn test_multi_verdict_gets_workers_and_batches() {
        let mut scheduler = scheduler(8, SubsystemConfig::engine_defaults());
        for _ in 0..10 {
            scheduler.record(SubsystemId::Ai, ExecutionMode::Single, 5000, 4000);
            scheduler.record(SubsystemId::Ai, ExecutionMode::Multi, 5000, 1000);
        }

        scheduler.begin_frame();
        let plan = scheduler.plan_frame(&[Workload::new(SubsystemId::Ai, 5000)]);
        let ai = plan.get(SubsystemId::Ai).unwrap();
        assert_eq!(ai.decision.reason, DecisionReason::Crossover);
        // Budget of 3, doubled by burst capacity.
        assert_eq!(ai.workers, 6);
        assert!(ai.strategy.batch_count >= 2);
        assert_eq!(ai.ranges().map(|r| r.len()).sum::<usize>(), 5000);
    }

    #[test]
    fn test_unregister_forgets_everything() {
        let mut scheduler = scheduler(8, SubsystemConfig::engine_defaults());
        scheduler.record(SubsystemId::Pathfinding, ExecutionMode::Single, 10, 10);
        scheduler.unregister_subsystem(SubsystemId::Pathfinding).unwrap();

        assert!(scheduler.budget(SubsystemId::Pathfinding).is_none());
        assert!(!scheduler.gate().is_gated(SubsystemId::Pathfinding));
        assert_eq!(
            scheduler
                .tracker()
                .sample_count(SubsystemId::Pathfinding, ExecutionMode::Single),
            0
        );
        assert!(matches!(
            scheduler.configure_gate(SubsystemId::Pathfinding, GateConfig::default()),
            Err(SchedulerError::UnknownSubsystem(_))
        ));
    }

    #[test]
    fn test_submissions_carry_subsystem_priority() {
        let executor = Arc::new(RecordingExecutor::default());
        let config = SchedulerConfig::default();
        let mut scheduler =
            FrameScheduler::new(config, HardwareProfile::new(8), executor.clone()).unwrap();
        scheduler
            .set_priority(SubsystemId::Particles, TaskPriority::Critical)
            .unwrap();

        scheduler.begin_frame();
        let plan = scheduler.plan_frame(&[
            Workload::new(SubsystemId::Ai, 500),
            Workload::new(SubsystemId::Particles, 500),
            Workload::new(SubsystemId::BackgroundSimulation, 500),
        ]);
        for subsystem in &plan.plans {
            scheduler.execute(subsystem, vec![task(|| Ok(()))]);
        }
        assert_eq!(
            *executor.priorities.lock().unwrap(),
            vec![TaskPriority::High, TaskPriority::Critical, TaskPriority::Low]
        );

        assert!(matches!(
            scheduler.set_priority(SubsystemId::Custom(9), TaskPriority::High),
            Err(SchedulerError::UnknownSubsystem(_))
        ));
        scheduler.unregister_subsystem(SubsystemId::Ai).unwrap();
        assert_eq!(scheduler.priority(SubsystemId::Ai), TaskPriority::Normal);
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut scheduler = scheduler(4, SubsystemConfig::engine_defaults());
        scheduler.begin_frame();
        scheduler.try_admit(SubsystemId::Pathfinding, 80);
        scheduler.record(SubsystemId::Particles, ExecutionMode::Single, 500, 200);
        scheduler.end_frame();

        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot.frame, 1);
        assert_eq!(snapshot.budgets.len(), 5);
        assert_eq!(snapshot.queues[0].pending_count, 30);
        assert_eq!(snapshot.throughput.len(), 1);
        assert_eq!(snapshot.throughput[0].single_last_frame, Some(0));
        assert_eq!(snapshot.throughput[0].multi_last_frame, None);

        let text = ron::to_string(&snapshot).unwrap();
        assert!(text.contains("Particles"));
    }
}
