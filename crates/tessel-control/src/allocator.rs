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

//! Percentage-based partitioning of the worker pool.
//!
//! Budgets are computed once per registration change (or hardware change)
//! and stay fixed between those events. Each frame, [`BudgetAllocator::allocate_frame`]
//! turns the static budgets into concrete grants:
//!
//! 1. Subsystems flagged by the starvation guard receive one worker first.
//! 2. Every subsystem receives up to its budget, in priority order.
//! 3. Workers still idle are lent out as burst capacity, in the same order.
//!
//! Priority is the larger share first, then registration order.

use std::cmp::Ordering;
use std::collections::HashMap;
use tessel_core::control::{WorkerBudget, WorkerDemand, WorkerGrant};
use tessel_core::{HardwareProfile, SchedulerError, SubsystemId};

/// A registered share request.
#[derive(Debug, Clone, Copy)]
struct ShareEntry {
    id: SubsystemId,
    requested_percent: f32,
    /// Registration sequence number, used as the priority tie-break.
    order: u64,
}

/// Splits the hardware threads between subsystems.
#[derive(Debug)]
pub struct BudgetAllocator {
    profile: HardwareProfile,
    burst: bool,
    /// Sorted by priority.
    entries: Vec<ShareEntry>,
    budgets: HashMap<SubsystemId, WorkerBudget>,
    next_order: u64,
}

impl BudgetAllocator {
    /// Creates an allocator for the given hardware with no subsystems.
    pub fn new(profile: HardwareProfile, burst: bool) -> Self {
        Self {
            profile,
            burst,
            entries: Vec::new(),
            budgets: HashMap::new(),
            next_order: 0,
        }
    }

    /// The hardware the budgets are computed for.
    pub fn profile(&self) -> HardwareProfile {
        self.profile
    }

    /// Registers a subsystem with its desired share, in percent of the
    /// hardware threads, and rebalances.
    ///
    /// If the registered shares add up to more than 100%, every share is scaled
    /// down proportionally.
    pub fn register_subsystem(
        &mut self,
        id: SubsystemId,
        desired_percent: f32,
    ) -> Result<WorkerBudget, SchedulerError> {
        if !(desired_percent.is_finite() && (0.0..=100.0).contains(&desired_percent)) {
            return Err(SchedulerError::InvalidShare {
                id,
                percent: desired_percent,
            });
        }
        if self.budgets.contains_key(&id) {
            return Err(SchedulerError::DuplicateSubsystem(id));
        }

        self.entries.push(ShareEntry {
            id,
            requested_percent: desired_percent,
            order: self.next_order,
        });
        self.next_order += 1;
        self.entries.sort_by(Self::priority);
        self.rebalance();

        let budget = self
            .budgets
            .get(&id)
            .copied()
            .ok_or(SchedulerError::UnknownSubsystem(id))?;
        log::info!(
            "Allocator: Registered {} with {:.1}% -> {} worker(s)",
            id,
            desired_percent,
            budget.allocated_threads
        );
        Ok(budget)
    }

    /// Removes a subsystem and rebalances the remaining ones.
    pub fn unregister_subsystem(&mut self, id: SubsystemId) -> Result<(), SchedulerError> {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        if self.entries.len() == before {
            return Err(SchedulerError::UnknownSubsystem(id));
        }
        self.rebalance();
        log::info!("Allocator: Unregistered {}", id);
        Ok(())
    }

    /// Current budget of a subsystem.
    pub fn budget(&self, id: SubsystemId) -> Option<WorkerBudget> {
        self.budgets.get(&id).copied()
    }

    /// Every budget, in priority order.
    pub fn budgets(&self) -> Vec<WorkerBudget> {
        self.entries
            .iter()
            .filter_map(|entry| self.budgets.get(&entry.id).copied())
            .collect()
    }

    /// Registered subsystems, in priority order.
    pub fn subsystems(&self) -> impl Iterator<Item = SubsystemId> + '_ {
        self.entries.iter().map(|entry| entry.id)
    }

    /// Returns `true` if the subsystem is registered.
    pub fn is_registered(&self, id: SubsystemId) -> bool {
        self.budgets.contains_key(&id)
    }

    /// Replaces the hardware profile and rebalances.
    pub fn set_profile(&mut self, profile: HardwareProfile) {
        if profile != self.profile {
            log::info!(
                "Allocator: Hardware changed from {} to {} thread(s)",
                self.profile.logical_threads(),
                profile.logical_threads()
            );
        }
        self.profile = profile;
        self.rebalance();
    }

    /// Recomputes every budget from the registered shares.
    ///
    /// Deterministic: the result depends only on the shares, their
    /// registration order and the hardware profile.
    pub fn rebalance(&mut self) {
        let threads = self.profile.logical_threads();
        let total: f64 = self
            .entries
            .iter()
            .map(|entry| f64::from(entry.requested_percent))
            .sum();

        let scale = if total > 100.0 {
            log::warn!(
                "Allocator: Requested shares add up to {:.1}%, scaling every share by {:.3}",
                total,
                100.0 / total
            );
            100.0 / total
        } else {
            1.0
        };

        let mut budgets: Vec<WorkerBudget> = self
            .entries
            .iter()
            .map(|entry| {
                let percent = f64::from(entry.requested_percent) * scale;
                let allocated_threads = (percent / 100.0 * threads as f64).floor() as usize;
                WorkerBudget {
                    subsystem_id: entry.id,
                    allocated_threads,
                    allocated_percent: percent as f32,
                }
            })
            .collect();

        // Floors of scaled shares can only exceed the thread count through
        // rounding error; take the excess back from the largest budgets.
        let mut sum: usize = budgets.iter().map(|b| b.allocated_threads).sum();
        while sum > threads {
            if let Some(largest) = budgets.iter_mut().max_by_key(|b| b.allocated_threads) {
                largest.allocated_threads -= 1;
                sum -= 1;
            }
        }

        self.budgets = budgets
            .into_iter()
            .map(|budget| (budget.subsystem_id, budget))
            .collect();

        log::debug!(
            "Allocator: Rebalanced {} subsystem(s) over {} thread(s), {} reserved",
            self.entries.len(),
            threads,
            sum
        );
    }

    /// Turns this frame's demands into grants.
    ///
    /// `capacity` is the number of workers available this frame (clamped to
    /// the hardware thread count). `forced` lists subsystems that must receive
    /// a worker ahead of everyone else. Grants are returned in the order of
    /// `demands`; unknown subsystems are granted nothing.
    pub fn allocate_frame(
        &self,
        demands: &[WorkerDemand],
        capacity: usize,
        forced: &[SubsystemId],
    ) -> Vec<WorkerGrant> {
        let mut remaining = capacity.min(self.profile.logical_threads());
        let mut grants: Vec<WorkerGrant> = demands
            .iter()
            .map(|demand| WorkerGrant {
                subsystem_id: demand.subsystem_id,
                demanded: demand.workers,
                granted: 0,
                forced: false,
            })
            .collect();

        for demand in demands {
            if !self.is_registered(demand.subsystem_id) {
                log::warn!(
                    "Allocator: Demand from unregistered subsystem {} ignored",
                    demand.subsystem_id
                );
            }
        }

        // Indices of registered demands, by priority.
        let mut order: Vec<usize> = (0..grants.len())
            .filter(|&i| self.is_registered(grants[i].subsystem_id))
            .collect();
        order.sort_by_key(|&i| self.rank(grants[i].subsystem_id));

        // ── 1. Starvation guard ──────────────────────────────────────────
        for id in forced {
            if remaining == 0 {
                break;
            }
            if let Some(&i) = order.iter().find(|&&i| grants[i].subsystem_id == *id) {
                let grant = &mut grants[i];
                if grant.demanded > 0 && grant.granted == 0 {
                    grant.granted = 1;
                    grant.forced = true;
                    remaining -= 1;
                }
            }
        }

        // ── 2. Static budgets ────────────────────────────────────────────
        for &i in &order {
            let grant = &mut grants[i];
            let budget = self
                .budgets
                .get(&grant.subsystem_id)
                .map_or(0, |b| b.allocated_threads);
            let wanted = grant.demanded.min(budget).saturating_sub(grant.granted);
            let given = wanted.min(remaining);
            grant.granted += given;
            remaining -= given;
        }

        // ── 3. Burst capacity ────────────────────────────────────────────
        if self.burst {
            for &i in &order {
                let grant = &mut grants[i];
                let given = (grant.demanded - grant.granted).min(remaining);
                grant.granted += given;
                remaining -= given;
            }
        }

        grants
    }

    /// Larger share first, then earlier registration.
    fn priority(a: &ShareEntry, b: &ShareEntry) -> Ordering {
        b.requested_percent
            .total_cmp(&a.requested_percent)
            .then(a.order.cmp(&b.order))
    }

    fn rank(&self, id: SubsystemId) -> usize {
        self.entries
            .iter()
            .position(|entry| entry.id == id)
            .unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(threads: usize) -> BudgetAllocator {
        BudgetAllocator::new(HardwareProfile::new(threads), true)
    }

    fn demand(id: SubsystemId, workers: usize) -> WorkerDemand {
        WorkerDemand {
            subsystem_id: id,
            workers,
        }
    }

    #[test]
    fn test_eight_thread_split() {
        let mut allocator = allocator(8);
        let ai = allocator.register_subsystem(SubsystemId::Ai, 44.0).unwrap();
        let path = allocator
            .register_subsystem(SubsystemId::Pathfinding, 19.0)
            .unwrap();

        assert_eq!(ai.allocated_threads, 3);
        assert_eq!(path.allocated_threads, 1);
    }

    #[test]
    fn test_small_share_gets_no_worker() {
        let mut allocator = allocator(8);
        let background = allocator
            .register_subsystem(SubsystemId::BackgroundSimulation, 6.0)
            .unwrap();
        assert_eq!(background.allocated_threads, 0);
        assert!(!background.is_parallel());
    }

    #[test]
    fn test_oversubscribed_shares_are_scaled() {
        let mut allocator = allocator(10);
        allocator.register_subsystem(SubsystemId::Ai, 80.0).unwrap();
        allocator
            .register_subsystem(SubsystemId::Collision, 80.0)
            .unwrap();

        let ai = allocator.budget(SubsystemId::Ai).unwrap();
        let collision = allocator.budget(SubsystemId::Collision).unwrap();
        assert_eq!(ai.allocated_threads, 5);
        assert_eq!(collision.allocated_threads, 5);
        assert!((ai.allocated_percent - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_invalid_registration_changes_nothing() {
        let mut allocator = allocator(8);
        allocator.register_subsystem(SubsystemId::Ai, 44.0).unwrap();

        assert!(matches!(
            allocator.register_subsystem(SubsystemId::Particles, f32::NAN),
            Err(SchedulerError::InvalidShare { .. })
        ));
        assert!(matches!(
            allocator.register_subsystem(SubsystemId::Particles, -1.0),
            Err(SchedulerError::InvalidShare { .. })
        ));
        assert!(matches!(
            allocator.register_subsystem(SubsystemId::Ai, 10.0),
            Err(SchedulerError::DuplicateSubsystem(SubsystemId::Ai))
        ));
        assert!(matches!(
            allocator.unregister_subsystem(SubsystemId::Collision),
            Err(SchedulerError::UnknownSubsystem(_))
        ));
        assert_eq!(allocator.budgets().len(), 1);
        assert_eq!(allocator.budget(SubsystemId::Ai).unwrap().allocated_threads, 3);
    }

    #[test]
    fn test_rebalance_is_idempotent() {
        let mut allocator = allocator(12);
        for (id, percent) in [
            (SubsystemId::Ai, 44.0),
            (SubsystemId::Pathfinding, 19.0),
            (SubsystemId::Collision, 12.0),
        ] {
            allocator.register_subsystem(id, percent).unwrap();
        }
        allocator.rebalance();
        let first = allocator.budgets();
        allocator.rebalance();
        assert_eq!(first, allocator.budgets());
    }

    #[test]
    fn test_unregister_frees_share() {
        let mut allocator = allocator(4);
        allocator.register_subsystem(SubsystemId::Ai, 75.0).unwrap();
        allocator
            .register_subsystem(SubsystemId::Particles, 50.0)
            .unwrap();
        assert_eq!(allocator.budget(SubsystemId::Particles).unwrap().allocated_threads, 1);

        allocator.unregister_subsystem(SubsystemId::Ai).unwrap();
        assert!(allocator.budget(SubsystemId::Ai).is_none());
        assert_eq!(allocator.budget(SubsystemId::Particles).unwrap().allocated_threads, 2);
    }

    #[test]
    fn test_profile_change_rebalances() {
        let mut allocator = allocator(8);
        allocator.register_subsystem(SubsystemId::Ai, 50.0).unwrap();
        allocator.set_profile(HardwareProfile::new(16));
        assert_eq!(allocator.budget(SubsystemId::Ai).unwrap().allocated_threads, 8);
    }

    #[test]
    fn test_frame_grants_follow_budget_then_burst() {
        let mut allocator = allocator(8);
        allocator.register_subsystem(SubsystemId::Ai, 44.0).unwrap();
        allocator
            .register_subsystem(SubsystemId::Collision, 12.0)
            .unwrap();

        let grants = allocator.allocate_frame(
            &[demand(SubsystemId::Collision, 2), demand(SubsystemId::Ai, 4)],
            8,
            &[],
        );
        // AI first by priority: 3 from its budget, then both burst.
        assert_eq!(grants[0].subsystem_id, SubsystemId::Collision);
        assert_eq!(grants[1].granted, 4);
        assert_eq!(grants[0].granted, 2);
    }

    #[test]
    fn test_frame_grants_without_burst_stay_within_budget() {
        let mut allocator = BudgetAllocator::new(HardwareProfile::new(8), false);
        allocator.register_subsystem(SubsystemId::Ai, 44.0).unwrap();
        let grants = allocator.allocate_frame(&[demand(SubsystemId::Ai, 6)], 8, &[]);
        assert_eq!(grants[0].granted, 3);
    }

    #[test]
    fn test_forced_subsystem_is_served_first() {
        let mut allocator = allocator(2);
        allocator.register_subsystem(SubsystemId::Ai, 100.0).unwrap();
        allocator
            .register_subsystem(SubsystemId::Collision, 0.0)
            .unwrap();
        let demands = [demand(SubsystemId::Ai, 4), demand(SubsystemId::Collision, 1)];

        let grants = allocator.allocate_frame(&demands, 2, &[]);
        assert_eq!(grants[1].granted, 0);

        let grants = allocator.allocate_frame(&demands, 2, &[SubsystemId::Collision]);
        assert_eq!(grants[1].granted, 1);
        assert!(grants[1].forced);
        assert_eq!(grants[0].granted, 1);
    }

    #[test]
    fn test_unknown_demand_gets_nothing() {
        let allocator = allocator(4);
        let grants = allocator.allocate_frame(&[demand(SubsystemId::Custom(9), 2)], 4, &[]);
        assert_eq!(grants[0].granted, 0);
    }

    #[test]
    fn test_grants_never_exceed_capacity() {
        let mut allocator = allocator(6);
        let ids = (0..5).map(SubsystemId::Custom).collect::<Vec<_>>();
        for &id in &ids {
            allocator.register_subsystem(id, 30.0).unwrap();
        }
        let demands: Vec<_> = ids.iter().map(|&id| demand(id, 5)).collect();
        for capacity in 0..=10 {
            let grants = allocator.allocate_frame(&demands, capacity, &[SubsystemId::Custom(3)]);
            let total: usize = grants.iter().map(|g| g.granted).sum();
            assert!(total <= capacity.min(6));
            assert!(grants.iter().all(|g| g.granted <= g.demanded));
        }
    }
}
