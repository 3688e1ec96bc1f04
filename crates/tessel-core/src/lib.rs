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

//! # Tessel Core
//!
//! Foundational crate containing the plain data types, traits and error
//! taxonomy shared by every layer of the worker-budget scheduler.
//!
//! Nothing in here owns scheduling state; the components in `tessel-control`
//! own their records and only exchange the types defined here.

#![warn(missing_docs)]

pub mod control;
pub mod error;
pub mod platform;
pub mod subsystem;
pub mod task;
pub mod utils;

pub use error::SchedulerError;
pub use platform::{ConcurrencyProbe, HardwareProfile};
pub use subsystem::SubsystemId;
pub use task::{
    BatchExecutor, InlineExecutor, SubmissionReport, Task, TaskFailure, TaskPriority,
};
pub use utils::timer::Stopwatch;
