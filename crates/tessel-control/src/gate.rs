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

//! Per-frame admission control for request-producing subsystems.
//!
//! The gate never throttles on its own: requests above the frame limit are
//! deferred into a bounded pending queue, and once that queue passes its
//! critical pressure every admission is flagged `degraded` so the producer
//! can shed low-priority work.

use crate::config::GateConfig;
use std::collections::HashMap;
use tessel_core::control::{Admission, RequestQueueState};
use tessel_core::SubsystemId;

#[derive(Debug, Clone)]
struct GateEntry {
    state: RequestQueueState,
    critical_pressure: f32,
}

impl GateEntry {
    fn degraded(&self) -> bool {
        self.state.pressure() > self.critical_pressure
    }
}

/// Rate limiter with a pending queue per gated subsystem.
#[derive(Debug, Default)]
pub struct RequestGate {
    entries: HashMap<SubsystemId, GateEntry>,
}

impl RequestGate {
    /// Creates a gate with no gated subsystems.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gates a subsystem, or updates its limits. Pending requests beyond a
    /// reduced capacity are dropped.
    pub fn configure(&mut self, id: SubsystemId, config: GateConfig) {
        let entry = self.entries.entry(id).or_insert_with(|| GateEntry {
            state: RequestQueueState {
                subsystem_id: id,
                pending_count: 0,
                admitted_this_frame: 0,
                max_admitted_per_frame: config.max_admitted_per_frame,
                queue_capacity: config.queue_capacity,
                total_admitted: 0,
                total_deferred: 0,
                total_dropped: 0,
            },
            critical_pressure: config.critical_pressure,
        });

        let state = &mut entry.state;
        state.max_admitted_per_frame = config.max_admitted_per_frame;
        state.queue_capacity = config.queue_capacity;
        if state.pending_count > state.queue_capacity {
            let excess = state.pending_count - state.queue_capacity;
            state.pending_count = state.queue_capacity;
            state.total_dropped += excess as u64;
        }
        entry.critical_pressure = config.critical_pressure;

        log::info!(
            "Gate: {} admits {} request(s)/frame, queue capacity {}",
            id,
            config.max_admitted_per_frame,
            config.queue_capacity
        );
    }

    /// Stops gating a subsystem, discarding its pending requests.
    pub fn remove(&mut self, id: SubsystemId) -> Option<RequestQueueState> {
        self.entries.remove(&id).map(|entry| entry.state)
    }

    /// Returns `true` if the subsystem is gated.
    pub fn is_gated(&self, id: SubsystemId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Starts a new frame: every per-frame admission count is reset.
    pub fn begin_frame(&mut self) {
        for entry in self.entries.values_mut() {
            entry.state.admitted_this_frame = 0;
        }
    }

    /// Offers `count` new requests.
    ///
    /// Up to the remaining frame limit is admitted; the excess is deferred
    /// into the pending queue, and whatever does not fit there is dropped.
    /// Unknown subsystems have every request dropped.
    pub fn try_admit(&mut self, id: SubsystemId, count: usize) -> Admission {
        let Some(entry) = self.entries.get_mut(&id) else {
            log::warn!(
                "Gate: Rejected {} request(s) from ungated subsystem {}",
                count,
                id
            );
            return Admission {
                dropped: count,
                ..Default::default()
            };
        };

        let state = &mut entry.state;
        let admitted = count.min(state.remaining_this_frame());
        let excess = count - admitted;
        let room = state.queue_capacity.saturating_sub(state.pending_count);
        let deferred = excess.min(room);
        let dropped = excess - deferred;

        state.admitted_this_frame += admitted;
        state.pending_count += deferred;
        state.total_admitted += admitted as u64;
        state.total_deferred += deferred as u64;
        state.total_dropped += dropped as u64;

        let admission = Admission {
            admitted,
            deferred,
            dropped,
            degraded: entry.degraded(),
        };
        if admission.rejected() > 0 {
            log::debug!(
                "Gate: {} admitted {}/{} request(s), deferred {}, dropped {} (pending {})",
                id,
                admitted,
                count,
                deferred,
                dropped,
                entry.state.pending_count
            );
        }
        admission
    }

    /// Admits pending requests, up to the remaining frame limit.
    pub fn retry_deferred(&mut self, id: SubsystemId) -> Admission {
        let Some(entry) = self.entries.get_mut(&id) else {
            log::warn!("Gate: Retry from ungated subsystem {}", id);
            return Admission::default();
        };

        let state = &mut entry.state;
        let admitted = state.pending_count.min(state.remaining_this_frame());
        state.pending_count -= admitted;
        state.admitted_this_frame += admitted;
        state.total_admitted += admitted as u64;

        Admission {
            admitted,
            degraded: entry.degraded(),
            ..Default::default()
        }
    }

    /// Gives up on up to `count` pending requests. Returns how many were
    /// removed.
    pub fn drop_deferred(&mut self, id: SubsystemId, count: usize) -> usize {
        let Some(entry) = self.entries.get_mut(&id) else {
            return 0;
        };
        let dropped = count.min(entry.state.pending_count);
        entry.state.pending_count -= dropped;
        entry.state.total_dropped += dropped as u64;
        dropped
    }

    /// Pending requests relative to queue capacity, in `[0, 1]`. Zero for
    /// ungated subsystems.
    pub fn queue_pressure(&self, id: SubsystemId) -> f32 {
        self.entries.get(&id).map_or(0.0, |e| e.state.pressure())
    }

    /// Returns `true` if the pending queue is past its critical pressure.
    pub fn is_degraded(&self, id: SubsystemId) -> bool {
        self.entries.get(&id).is_some_and(GateEntry::degraded)
    }

    /// Admission state of a gated subsystem.
    pub fn state(&self, id: SubsystemId) -> Option<RequestQueueState> {
        self.entries.get(&id).map(|e| e.state)
    }

    /// Every admission state, sorted by subsystem.
    pub fn states(&self) -> Vec<RequestQueueState> {
        let mut states: Vec<_> = self.entries.values().map(|e| e.state).collect();
        states.sort_by_key(|s| s.subsystem_id);
        states
    }
}
