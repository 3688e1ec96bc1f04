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

//! sysinfo-based implementation of the ConcurrencyProbe trait.

use sysinfo::System;
use tessel_core::ConcurrencyProbe;

/// Counts logical CPUs through the `sysinfo` crate.
///
/// Used as a fallback when the standard library cannot query the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoConcurrency;

impl ConcurrencyProbe for SysinfoConcurrency {
    fn name(&self) -> &'static str {
        "sysinfo"
    }

    fn logical_threads(&self) -> Option<usize> {
        let mut system = System::new();
        system.refresh_cpu_all();
        match system.cpus().len() {
            0 => None,
            count => Some(count),
        }
    }
}
