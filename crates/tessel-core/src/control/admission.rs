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

//! Rate-limiting state for request-producing subsystems.

use crate::subsystem::SubsystemId;
use serde::{Deserialize, Serialize};

/// Admission state of one request-producing subsystem.
///
/// Owned by the request gate. `admitted_this_frame` is reset at the start of
/// every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestQueueState {
    /// The gated subsystem.
    pub subsystem_id: SubsystemId,
    /// Requests deferred and awaiting a retry.
    pub pending_count: usize,
    /// Requests admitted so far in the current frame.
    pub admitted_this_frame: usize,
    /// Admission limit per frame.
    pub max_admitted_per_frame: usize,
    /// Maximum number of deferred requests kept pending.
    pub queue_capacity: usize,
    /// Requests admitted over the session.
    pub total_admitted: u64,
    /// Requests deferred over the session.
    pub total_deferred: u64,
    /// Requests dropped over the session (queue full or unknown subsystem).
    pub total_dropped: u64,
}

impl RequestQueueState {
    /// Pending requests relative to the queue capacity, in `[0, 1]`.
    pub fn pressure(&self) -> f32 {
        if self.queue_capacity == 0 {
            return 0.0;
        }
        (self.pending_count as f32 / self.queue_capacity as f32).min(1.0)
    }

    /// Admissions still available in the current frame.
    pub fn remaining_this_frame(&self) -> usize {
        self.max_admitted_per_frame
            .saturating_sub(self.admitted_this_frame)
    }
}

/// Outcome of an admission attempt.
///
/// A non-zero `deferred` or `dropped` count is not an error: the caller must
/// retry deferred requests on a later frame and give up on dropped ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Admission {
    /// Requests the caller may process this frame.
    pub admitted: usize,
    /// Requests rejected for this frame and kept pending for a retry.
    pub deferred: usize,
    /// Requests rejected outright because the pending queue is full.
    pub dropped: usize,
    /// `true` if queue pressure is past the critical threshold and the caller
    /// should reduce its request rate.
    pub degraded: bool,
}

impl Admission {
    /// Total requests not admitted this frame.
    pub fn rejected(&self) -> usize {
        self.deferred + self.dropped
    }
}
