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

//! # Tessel Control
//!
//! The scheduling layer: partitions the worker pool into per-subsystem
//! budgets, learns when multi-threading pays off, tunes batch sizes online,
//! rate-limits request producers and guards against starvation.
//!
//! Every component owns its own records and is driven from the main thread
//! through [`FrameScheduler`], the single context object an engine creates at
//! startup and shuts down at exit.

#![warn(missing_docs)]

pub mod allocator;
pub mod config;
pub mod crossover;
pub mod fairness;
pub mod gate;
pub mod metrics;
pub mod scheduler;
pub mod throughput;
pub mod tuner;

pub use allocator::BudgetAllocator;
pub use config::SchedulerConfig;
pub use crossover::ThreadingCrossoverEstimator;
pub use fairness::FairnessMonitor;
pub use gate::RequestGate;
pub use scheduler::{FramePlan, FrameReport, FrameScheduler, SchedulerSnapshot, SubsystemPlan, Workload};
pub use throughput::ThroughputTracker;
pub use tuner::AdaptiveBatchTuner;
