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

//! Hardware facts the scheduler is sized from.
//!
//! The probe that produces a [`HardwareProfile`] lives in `tessel-infra`;
//! this module only defines the immutable result and the source contract.

use serde::{Deserialize, Serialize};

/// Immutable description of the host's usable hardware concurrency.
///
/// Created once at startup. The thread count is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareProfile {
    logical_threads: usize,
}

impl HardwareProfile {
    /// Creates a profile, raising a zero thread count to one.
    pub fn new(logical_threads: usize) -> Self {
        Self {
            logical_threads: logical_threads.max(1),
        }
    }

    /// Number of logical hardware threads available to the engine.
    pub fn logical_threads(&self) -> usize {
        self.logical_threads
    }

    /// Returns `true` if more than one thread can run at once.
    pub fn is_parallel(&self) -> bool {
        self.logical_threads > 1
    }
}

/// A source able to report the host's logical thread count.
pub trait ConcurrencyProbe: Send + Sync {
    /// Short name used in log output.
    fn name(&self) -> &'static str;

    /// Returns the detected logical thread count, or `None` if detection failed.
    fn logical_threads(&self) -> Option<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_never_zero() {
        assert_eq!(HardwareProfile::new(0).logical_threads(), 1);
        assert!(!HardwareProfile::new(1).is_parallel());
        assert!(HardwareProfile::new(8).is_parallel());
    }
}
