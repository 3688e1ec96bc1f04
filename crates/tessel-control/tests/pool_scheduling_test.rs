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

//! End-to-end frames on a real worker pool: plans are executed, the mode
//! that actually ran is recorded and multi-threaded probes reach the workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessel_control::{FrameScheduler, SchedulerConfig, SubsystemPlan, Workload};
use tessel_core::control::ExecutionMode;
use tessel_core::task::task;
use tessel_core::{HardwareProfile, SubsystemId, Task};
use tessel_infra::WorkerPool;

const ENTITIES: usize = 20_000;

/// Busy work standing in for one entity update.
fn update_entity(seed: u64) -> u64 {
    let mut state = seed | 1;
    for _ in 0..200 {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    }
    state
}

fn batches_for(plan: &SubsystemPlan, checksum: &Arc<AtomicU64>) -> Vec<Task> {
    plan.ranges()
        .map(|range| {
            let checksum = checksum.clone();
            task(move || {
                let sum = range.fold(0u64, |acc, i| acc ^ update_entity(i as u64));
                checksum.fetch_xor(sum, Ordering::Relaxed);
                Ok(())
            })
        })
        .collect()
}

fn pool_scheduler(threads: usize) -> FrameScheduler {
    let profile = HardwareProfile::new(threads);
    let config = SchedulerConfig::default();
    let pool = WorkerPool::from_profile(profile, config.pool.queue_capacity).unwrap();
    FrameScheduler::new(config, profile, Arc::new(pool)).unwrap()
}

#[test]
fn test_frames_execute_on_the_pool() {
    let mut scheduler = pool_scheduler(4);
    let checksum = Arc::new(AtomicU64::new(0));

    for _ in 0..30 {
        scheduler.begin_frame();
        let plan = scheduler.plan_frame(&[Workload::new(SubsystemId::Ai, ENTITIES)]);
        let ai = *plan.get(SubsystemId::Ai).unwrap();
        assert!(ai.workers <= 4);

        let report = scheduler.execute(&ai, batches_for(&ai, &checksum));
        assert!(report.is_success());
        assert_eq!(report.submitted, ai.strategy.batch_count);
        if ai.workers > 0 {
            assert!(report.workers_used >= 1 && report.workers_used <= ai.workers);
        } else {
            assert_eq!(report.workers_used, 0);
        }
        scheduler.end_frame();
    }

    let tracker = scheduler.tracker();
    assert!(tracker.sample_count(SubsystemId::Ai, ExecutionMode::Single) >= 5);
    assert!(
        tracker.sample_count(SubsystemId::Ai, ExecutionMode::Multi) >= 1,
        "no multi-threaded probe reached the pool"
    );
    assert!(scheduler.tuner().multiplier_record(SubsystemId::Ai).is_some());
}

#[test]
fn test_shutdown_is_explicit_and_idempotent() {
    let mut scheduler = pool_scheduler(2);
    assert_eq!(scheduler.executor().worker_count(), 2);

    scheduler.shutdown();
    scheduler.shutdown();

    // Work still completes, inline on the caller.
    scheduler.begin_frame();
    let plan = scheduler.plan_frame(&[Workload::new(SubsystemId::Collision, 500)]);
    let collision = *plan.get(SubsystemId::Collision).unwrap();
    let report = scheduler.execute(&collision, vec![task(|| Ok(()))]);
    assert!(report.is_success());
    assert_eq!(report.workers_used, 0);
}

#[test]
fn test_snapshot_after_pool_frames_serializes() {
    let mut scheduler = pool_scheduler(2);
    let checksum = Arc::new(AtomicU64::new(0));

    for _ in 0..12 {
        scheduler.begin_frame();
        let plan = scheduler.plan_frame(&[
            Workload::new(SubsystemId::Particles, 2_000),
            Workload::new(SubsystemId::BackgroundSimulation, 50),
        ]);
        for subsystem_plan in plan.plans.clone() {
            scheduler.execute(&subsystem_plan, batches_for(&subsystem_plan, &checksum));
        }
        scheduler.end_frame();
    }

    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot.frame, 12);
    assert_eq!(snapshot.pool_workers, 2);
    let text = ron::to_string(&snapshot).unwrap();
    assert!(text.contains("BackgroundSimulation"));
}
