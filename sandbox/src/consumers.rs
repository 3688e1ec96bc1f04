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

//! Synthetic stand-ins for the engine subsystems that share the pool.
//!
//! Each consumer owns the `WorkerBudget` it received at registration and
//! burns a fixed amount of CPU per item, so the scheduler sees realistic
//! single- versus multi-threaded timings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tessel_control::{FrameScheduler, SubsystemPlan};
use tessel_core::control::WorkerBudget;
use tessel_core::task::task;
use tessel_core::{SubsystemId, Task};

/// A subsystem producing per-frame work.
pub trait Consumer {
    /// The subsystem this consumer stands in for.
    fn id(&self) -> SubsystemId;

    /// Items to process this frame.
    fn prepare(&mut self, scheduler: &mut FrameScheduler, frame: u64) -> usize;

    /// Cuts the planned workload into pool batches.
    fn batches(&self, plan: &SubsystemPlan) -> Vec<Task>;
}

/// Builds one consumer per default engine subsystem.
pub fn build(scheduler: &FrameScheduler) -> Result<Vec<Box<dyn Consumer>>> {
    let budget = |id: SubsystemId| {
        scheduler
            .budget(id)
            .with_context(|| format!("{id} is missing from the scheduler configuration"))
    };

    Ok(vec![
        Box::new(EntityConsumer::new(budget(SubsystemId::Ai)?, 5_000, 2_000, 300, 96)),
        Box::new(PathfindingConsumer::new(budget(SubsystemId::Pathfinding)?)),
        Box::new(EntityConsumer::new(budget(SubsystemId::Collision)?, 3_000, 500, 120, 48)),
        Box::new(EntityConsumer::new(budget(SubsystemId::Particles)?, 20_000, 15_000, 90, 8)),
        Box::new(EntityConsumer::new(
            budget(SubsystemId::BackgroundSimulation)?,
            400,
            100,
            600,
            64,
        )),
    ])
}

/// Busy work standing in for one item update.
fn simulate_item(seed: u64, cost: u32) -> u64 {
    let mut state = seed | 1;
    for _ in 0..cost {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
    }
    state
}

fn cpu_batches(plan: &SubsystemPlan, cost: u32, checksum: &Arc<AtomicU64>) -> Vec<Task> {
    plan.ranges()
        .map(|range| {
            let checksum = checksum.clone();
            task(move || {
                let sum = range.fold(0u64, |acc, i| acc ^ simulate_item(i as u64, cost));
                checksum.fetch_xor(sum, Ordering::Relaxed);
                Ok(())
            })
        })
        .collect()
}

/// An entity-driven subsystem whose population oscillates over time.
struct EntityConsumer {
    budget: WorkerBudget,
    base: usize,
    swing: usize,
    period: u64,
    cost: u32,
    checksum: Arc<AtomicU64>,
}

impl EntityConsumer {
    fn new(budget: WorkerBudget, base: usize, swing: usize, period: u64, cost: u32) -> Self {
        log::info!(
            "Sandbox: {} starts with {} reserved worker(s)",
            budget.subsystem_id,
            budget.allocated_threads
        );
        Self {
            budget,
            base,
            swing,
            period,
            cost,
            checksum: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Consumer for EntityConsumer {
    fn id(&self) -> SubsystemId {
        self.budget.subsystem_id
    }

    fn prepare(&mut self, _scheduler: &mut FrameScheduler, frame: u64) -> usize {
        let phase = (frame % self.period) as f64 / self.period as f64;
        let wave = (phase * std::f64::consts::TAU).sin() * 0.5 + 0.5;
        self.base + (wave * self.swing as f64) as usize
    }

    fn batches(&self, plan: &SubsystemPlan) -> Vec<Task> {
        cpu_batches(plan, self.cost, &self.checksum)
    }
}

/// Path requests arrive in bursts and go through the request gate.
struct PathfindingConsumer {
    budget: WorkerBudget,
    rng: u64,
    checksum: Arc<AtomicU64>,
}

impl PathfindingConsumer {
    /// Search cost of one path request.
    const COST: u32 = 2_000;

    fn new(budget: WorkerBudget) -> Self {
        Self {
            budget,
            rng: 0x9e37_79b9_7f4a_7c15,
            checksum: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_random(&mut self) -> u64 {
        // xorshift64
        self.rng ^= self.rng << 13;
        self.rng ^= self.rng >> 7;
        self.rng ^= self.rng << 17;
        self.rng
    }
}

impl Consumer for PathfindingConsumer {
    fn id(&self) -> SubsystemId {
        self.budget.subsystem_id
    }

    fn prepare(&mut self, scheduler: &mut FrameScheduler, frame: u64) -> usize {
        let id = self.id();
        // A crowd re-plans every two seconds; otherwise a trickle.
        let offered = if frame % 120 == 0 {
            200
        } else {
            (self.next_random() % 30) as usize
        };

        let retried = scheduler.retry_deferred(id);
        let fresh = scheduler.try_admit(id, offered);
        if fresh.degraded {
            let pending = scheduler.gate().state(id).map_or(0, |s| s.pending_count);
            let shed = scheduler.drop_deferred(id, pending / 2);
            log::debug!(
                "Sandbox: Pathfinding shed {} stale request(s) at pressure {:.2}",
                shed,
                scheduler.queue_pressure(id)
            );
        }
        retried.admitted + fresh.admitted
    }

    fn batches(&self, plan: &SubsystemPlan) -> Vec<Task> {
        cpu_batches(plan, Self::COST, &self.checksum)
    }
}
