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

//! Records exchanged between the scheduling components.
//!
//! Each record is owned by exactly one component in `tessel-control`; other
//! components only ever see copies.

pub mod admission;
pub mod budget;
pub mod sampling;

pub use admission::{Admission, RequestQueueState};
pub use budget::{StarvationCounter, WorkerBudget, WorkerDemand, WorkerGrant};
pub use sampling::{
    BatchMultiplier, BatchStrategy, CrossoverPoint, DecisionReason, ExecutionMode,
    ThreadingDecision, ThroughputSample, TunerPhase,
};
