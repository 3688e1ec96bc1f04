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

//! Error taxonomy for the scheduler.
//!
//! Only conditions the caller must act on are errors. Clamped budgets,
//! failing tasks, rejected requests and degenerate samples are recovered
//! locally and reported through return values instead.

use crate::subsystem::SubsystemId;
use thiserror::Error;

/// Errors surfaced by the scheduler to its caller.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The subsystem was never registered (or has been unregistered).
    #[error("subsystem {0} is not registered")]
    UnknownSubsystem(SubsystemId),
    /// The subsystem is already registered.
    #[error("subsystem {0} is already registered")]
    DuplicateSubsystem(SubsystemId),
    /// A budget share outside `0..=100` or not a finite number.
    #[error("invalid budget share {percent} for subsystem {id}: expected a finite value in 0..=100")]
    InvalidShare {
        /// The subsystem the share was requested for.
        id: SubsystemId,
        /// The rejected percentage.
        percent: f32,
    },
    /// A configuration value failed validation.
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),
    /// The configuration file could not be read.
    #[error("failed to read configuration '{path}': {source}")]
    ConfigIo {
        /// Path of the configuration file.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(String),
    /// A worker thread could not be spawned. Fatal at startup.
    #[error("failed to spawn worker thread {index}: {source}")]
    PoolSpawn {
        /// Index of the worker that failed to start.
        index: usize,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
}
