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

//! Identifiers for the engine subsystems that share the worker pool.

use serde::{Deserialize, Serialize};

/// Unique identifier for a subsystem competing for pool workers.
///
/// The built-in variants cover the per-frame workloads of the engine; extra
/// workloads (tools, mods) use [`SubsystemId::Custom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum SubsystemId {
    /// AI behavior updates.
    Ai,
    /// Pathfinding search (the main bursty request producer).
    Pathfinding,
    /// Collision broad and narrow phase.
    Collision,
    /// Particle simulation.
    Particles,
    /// Low-priority background entity simulation.
    BackgroundSimulation,
    /// Any other workload, identified by a user-chosen number.
    Custom(u16),
}

impl std::fmt::Display for SubsystemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_variant_name() {
        assert_eq!(SubsystemId::Ai.to_string(), "Ai");
        assert_eq!(SubsystemId::Custom(7).to_string(), "Custom(7)");
    }
}
