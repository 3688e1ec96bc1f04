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

//! Scenario tests for the scheduling layer: budget partitioning, crossover
//! learning, admission control and the starvation guard, driven through the
//! `FrameScheduler` with synthetic timings.

use std::sync::Arc;
use tessel_control::config::{GateConfig, SubsystemConfig};
use tessel_control::{BudgetAllocator, FrameScheduler, SchedulerConfig, Workload};
use tessel_core::control::{DecisionReason, ExecutionMode};
use tessel_core::{HardwareProfile, InlineExecutor, SubsystemId};

/// Synthetic single-threaded cost of one AI entity, in microseconds.
const SINGLE_MICROS_PER_ENTITY: f64 = 2.0;

fn scheduler(threads: usize, config: SchedulerConfig) -> FrameScheduler {
    FrameScheduler::new(config, HardwareProfile::new(threads), Arc::new(InlineExecutor)).unwrap()
}

fn config_with(subsystems: Vec<SubsystemConfig>) -> SchedulerConfig {
    SchedulerConfig {
        subsystems,
        ..SchedulerConfig::default()
    }
}

/// Elapsed time of `entities` AI entities in `mode`, multi-threading being
/// `speedup` times faster.
fn synthetic_micros(entities: usize, mode: ExecutionMode, speedup: f64) -> u64 {
    let single = entities as f64 * SINGLE_MICROS_PER_ENTITY;
    match mode {
        ExecutionMode::Single => single as u64,
        ExecutionMode::Multi => (single / speedup) as u64,
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Budget partitioning
// ─────────────────────────────────────────────────────────────────────────

#[test]
fn test_eight_threads_ai_and_pathfinding() {
    let scheduler = scheduler(
        8,
        config_with(vec![
            SubsystemConfig::new(SubsystemId::Ai, 44.0),
            SubsystemConfig::new(SubsystemId::Pathfinding, 19.0),
        ]),
    );

    let ai = scheduler.budget(SubsystemId::Ai).unwrap();
    let path = scheduler.budget(SubsystemId::Pathfinding).unwrap();
    assert_eq!(ai.allocated_threads, 3);
    assert_eq!(path.allocated_threads, 1);
    assert!(ai.allocated_threads + path.allocated_threads <= 8);
}

#[test]
fn test_budgets_never_exceed_hardware_threads() {
    let share_mixes: [&[f32]; 5] = [
        &[44.0, 19.0, 12.0, 12.0, 6.0],
        &[100.0, 100.0, 100.0],
        &[33.4, 33.3, 33.3],
        &[99.9, 0.2, 50.0, 50.0, 7.5],
        &[1.0, 2.0, 3.0, 5.0, 8.0],
    ];

    for threads in 1..=64 {
        for shares in share_mixes {
            let mut allocator = BudgetAllocator::new(HardwareProfile::new(threads), true);
            for (i, &percent) in shares.iter().enumerate() {
                allocator
                    .register_subsystem(SubsystemId::Custom(i as u16), percent)
                    .unwrap();
            }
            let total: usize = allocator.budgets().iter().map(|b| b.allocated_threads).sum();
            assert!(total <= threads, "{total} > {threads} for {shares:?}");
        }
    }
}

#[test]
fn test_rebalance_twice_is_identical() {
    let mut allocator = BudgetAllocator::new(HardwareProfile::new(16), true);
    for config in SubsystemConfig::engine_defaults() {
        allocator.register_subsystem(config.id, config.percent).unwrap();
    }
    allocator.rebalance();
    let once = allocator.budgets();
    allocator.rebalance();
    assert_eq!(once, allocator.budgets());
}

// ─────────────────────────────────────────────────────────────────────────
// Crossover learning
// ─────────────────────────────────────────────────────────────────────────

#[test]
fn test_crossover_converges_over_3000_frames() {
    const ENTITIES: usize = 5000;
    const FRAMES: u64 = 3000;

    let mut scheduler = scheduler(8, SchedulerConfig::default());
    let mut thresholds = Vec::with_capacity(FRAMES as usize);

    for _ in 0..FRAMES {
        scheduler.begin_frame();
        let plan = scheduler.plan_frame(&[Workload::new(SubsystemId::Ai, ENTITIES)]);
        let mode = plan.get(SubsystemId::Ai).unwrap().decision.mode;

        let micros = synthetic_micros(ENTITIES, mode, 1.3);
        scheduler.record(SubsystemId::Ai, mode, ENTITIES, micros);
        scheduler.end_frame();

        thresholds.push(
            scheduler
                .tracker()
                .crossover(SubsystemId::Ai)
                .map(|p| p.entity_count_threshold),
        );
    }

    let last = thresholds.last().copied().flatten().unwrap();
    assert!(last <= ENTITIES, "threshold {last} above {ENTITIES}");
    assert!(
        thresholds[thresholds.len() - 500..]
            .iter()
            .all(|t| *t == Some(last)),
        "threshold oscillated during the final 500 frames"
    );

    let decision = scheduler.estimator().last_decision(SubsystemId::Ai).unwrap();
    assert_eq!(decision.mode, ExecutionMode::Multi);
}

/// Entity counts covering 1000..=10000 in a scrambled order.
fn varying_entities(frame: u64) -> usize {
    1000 + (frame as usize * 7919) % 9001
}

#[test]
fn test_crossover_follows_smallest_winning_workload() {
    const FRAMES: u64 = 6000;
    let mut scheduler = scheduler(8, SchedulerConfig::default());
    let mut small_frames = 0;
    let mut small_multi_verdicts = 0;

    for frame in 0..FRAMES {
        let entities = varying_entities(frame);
        scheduler.begin_frame();
        let plan = scheduler.plan_frame(&[Workload::new(SubsystemId::Ai, entities)]);
        let decision = plan.get(SubsystemId::Ai).unwrap().decision;

        if frame >= FRAMES - 1000 && entities <= 5000 {
            small_frames += 1;
            if decision.reason == DecisionReason::Crossover {
                small_multi_verdicts += 1;
            }
        }

        // Multi-threading is 1.5x faster at every size.
        let micros = synthetic_micros(entities, decision.mode, 1.5);
        scheduler.record(SubsystemId::Ai, decision.mode, entities, micros);
        scheduler.end_frame();
    }

    let threshold = scheduler
        .tracker()
        .crossover(SubsystemId::Ai)
        .unwrap()
        .entity_count_threshold;
    assert!(threshold <= 1000, "threshold {threshold} above the smallest workload");
    assert!(
        small_multi_verdicts * 10 >= small_frames * 9,
        "only {small_multi_verdicts}/{small_frames} small workloads ran multi-threaded"
    );
}

#[test]
fn test_crossover_settles_where_overhead_is_amortized() {
    // Splitting costs a fixed 4.5ms, then four workers share the work:
    // the margin is beaten from about 3414 entities on.
    fn micros(entities: usize, mode: ExecutionMode) -> u64 {
        let entities = entities as u64;
        match mode {
            ExecutionMode::Single => entities * 2,
            ExecutionMode::Multi => entities / 2 + 4500,
        }
    }
    fn true_speedup(entities: usize) -> f64 {
        micros(entities, ExecutionMode::Single) as f64 / micros(entities, ExecutionMode::Multi) as f64
    }

    let mut scheduler = scheduler(8, SchedulerConfig::default());
    let margin = scheduler.config().crossover.speedup_margin;
    let mut large_multi_verdicts = 0;

    for frame in 0..6000u64 {
        let entities = varying_entities(frame);
        scheduler.begin_frame();
        let plan = scheduler.plan_frame(&[Workload::new(SubsystemId::Ai, entities)]);
        let decision = plan.get(SubsystemId::Ai).unwrap().decision;

        if decision.reason == DecisionReason::Crossover {
            assert!(
                true_speedup(entities) > margin,
                "multi chosen at {entities} entities"
            );
            if entities >= 9000 {
                large_multi_verdicts += 1;
            }
        }

        scheduler.record(SubsystemId::Ai, decision.mode, entities, micros(entities, decision.mode));
        scheduler.end_frame();
    }

    let threshold = scheduler
        .tracker()
        .crossover(SubsystemId::Ai)
        .unwrap()
        .entity_count_threshold;
    assert!(
        (3072..=4096).contains(&threshold),
        "threshold {threshold} far from the amortization point"
    );
    assert!(large_multi_verdicts > 0);
}

#[test]
fn test_no_multi_verdict_without_margin() {
    const ENTITIES: usize = 5000;
    let mut scheduler = scheduler(8, SchedulerConfig::default());

    for _ in 0..600 {
        scheduler.begin_frame();
        let plan = scheduler.plan_frame(&[Workload::new(SubsystemId::Ai, ENTITIES)]);
        let decision = plan.get(SubsystemId::Ai).unwrap().decision;
        assert_ne!(decision.reason, DecisionReason::Crossover);

        // Multi-threading is only 5% faster: never enough.
        let micros = synthetic_micros(ENTITIES, decision.mode, 1.05);
        scheduler.record(SubsystemId::Ai, decision.mode, ENTITIES, micros);
        scheduler.end_frame();
    }

    assert!(scheduler.tracker().crossover(SubsystemId::Ai).is_none());
    assert!(!scheduler
        .estimator()
        .should_use_multi_threaded(SubsystemId::Ai, ENTITIES, scheduler.tracker()));
}

#[test]
fn test_multi_verdict_implies_measured_speedup() {
    let mut scheduler = scheduler(8, SchedulerConfig::default());
    let margin = scheduler.config().crossover.speedup_margin;

    for frame in 0..1500u64 {
        // The speedup drifts between 0.9x and 1.5x over time.
        let speedup = 1.2 + 0.3 * ((frame as f64) / 150.0).sin();
        let entities = 2000 + (frame as usize % 7) * 500;

        scheduler.begin_frame();
        let plan = scheduler.plan_frame(&[Workload::new(SubsystemId::Ai, entities)]);
        let decision = plan.get(SubsystemId::Ai).unwrap().decision;
        if decision.reason == DecisionReason::Crossover {
            let ratio = scheduler
                .tracker()
                .speedup_at(SubsystemId::Ai, entities)
                .unwrap();
            assert!(ratio > margin, "multi chosen at ratio {ratio}");
        }

        let micros = synthetic_micros(entities, decision.mode, speedup);
        scheduler.record(SubsystemId::Ai, decision.mode, entities, micros);
        scheduler.end_frame();
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Admission control
// ─────────────────────────────────────────────────────────────────────────

#[test]
fn test_pathfinding_burst_of_200_requests() {
    let mut scheduler = scheduler(8, SchedulerConfig::default());
    scheduler.begin_frame();

    let admission = scheduler.try_admit(SubsystemId::Pathfinding, 200);
    assert_eq!(admission.admitted, 50);
    assert_eq!(admission.rejected(), 150);
    assert_eq!(admission.deferred, 150);

    let state = scheduler.gate().state(SubsystemId::Pathfinding).unwrap();
    assert_eq!(state.pending_count, 150);
    assert_eq!(state.admitted_this_frame, 50);
}

#[test]
fn test_admissions_per_frame_never_exceed_limit() {
    let mut config = SchedulerConfig::default();
    config.subsystems = vec![SubsystemConfig::new(SubsystemId::Pathfinding, 19.0).with_gate(
        GateConfig {
            max_admitted_per_frame: 50,
            queue_capacity: 400,
            critical_pressure: 0.8,
        },
    )];
    let mut scheduler = scheduler(8, config);

    for frame in 0..200usize {
        scheduler.begin_frame();
        let mut admitted = scheduler.retry_deferred(SubsystemId::Pathfinding).admitted;
        for burst in [frame % 90, 7, (frame * 13) % 41] {
            admitted += scheduler.try_admit(SubsystemId::Pathfinding, burst).admitted;
        }
        let state = scheduler.gate().state(SubsystemId::Pathfinding).unwrap();
        assert!(admitted <= 50);
        assert_eq!(state.admitted_this_frame, admitted);
        assert!(state.pending_count <= state.queue_capacity);
        scheduler.end_frame();
    }
}

#[test]
fn test_pressure_flags_degraded_producer() {
    let mut scheduler = scheduler(8, SchedulerConfig::default());
    let mut degraded_at = None;

    for frame in 0..20 {
        scheduler.begin_frame();
        let admission = scheduler.try_admit(SubsystemId::Pathfinding, 100);
        if admission.degraded && degraded_at.is_none() {
            degraded_at = Some(frame);
        }
        scheduler.end_frame();
    }

    // 50 requests a frame pile up in a 500-slot queue: 80% is crossed on
    // the ninth frame.
    assert_eq!(degraded_at, Some(8));
    assert!(scheduler.queue_pressure(SubsystemId::Pathfinding) > 0.8);
}

// ─────────────────────────────────────────────────────────────────────────
// Starvation guard
// ─────────────────────────────────────────────────────────────────────────

#[test]
fn test_starved_subsystem_gets_a_worker_after_ceiling() {
    let config = config_with(vec![
        SubsystemConfig::new(SubsystemId::Ai, 100.0),
        SubsystemConfig::new(SubsystemId::Collision, 0.0),
    ]);
    let mut scheduler = scheduler(2, config);

    // Make multi-threading a clear win for both subsystems.
    for id in [SubsystemId::Ai, SubsystemId::Collision] {
        for _ in 0..10 {
            scheduler.record(id, ExecutionMode::Single, 4000, 8000);
            scheduler.record(id, ExecutionMode::Multi, 4000, 2000);
        }
    }

    let workloads = [
        Workload::new(SubsystemId::Ai, 4000),
        Workload::new(SubsystemId::Collision, 4000),
    ];
    let ceiling = scheduler.config().fairness.starvation_ceiling as usize;
    let mut collision_grants = Vec::new();
    for _ in 0..8 {
        scheduler.begin_frame();
        let plan = scheduler.plan_frame(&workloads);
        let collision = plan.get(SubsystemId::Collision).unwrap();
        assert_eq!(collision.decision.mode, ExecutionMode::Multi);
        assert!(plan.workers_granted() <= 2);
        collision_grants.push(collision.workers);
        scheduler.end_frame();
    }

    // Three starved frames, then a forced worker, then the cycle repeats.
    assert_eq!(&collision_grants[..ceiling], &[0, 0, 0]);
    assert!(collision_grants[ceiling] >= 1);
    assert_eq!(collision_grants, vec![0, 0, 0, 1, 0, 0, 0, 1]);

    let counter = scheduler.fairness().counter(SubsystemId::Collision).unwrap();
    assert_eq!(counter.forced_allocations, 2);
    assert_eq!(counter.longest_streak, 3);
}
