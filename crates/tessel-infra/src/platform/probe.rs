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

use super::sysinfo_impl::SysinfoConcurrency;
use std::thread;
use tessel_core::{ConcurrencyProbe, HardwareProfile};

/// Reads the standard library's view of available parallelism, which
/// honours CPU affinity masks and cgroup quotas.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdConcurrency;

impl ConcurrencyProbe for StdConcurrency {
    fn name(&self) -> &'static str {
        "std"
    }

    fn logical_threads(&self) -> Option<usize> {
        thread::available_parallelism().ok().map(|n| n.get())
    }
}

/// A source returning a fixed answer, for tests and forced configurations.
#[derive(Debug, Clone, Copy)]
pub struct FixedConcurrency(pub Option<usize>);

impl ConcurrencyProbe for FixedConcurrency {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn logical_threads(&self) -> Option<usize> {
        self.0
    }
}

/// Determines the [`HardwareProfile`] the scheduler is sized from.
///
/// Sources are queried in order; the first non-zero answer wins. When every
/// source fails, the configured minimum is used.
pub struct HardwareProbe {
    sources: Vec<Box<dyn ConcurrencyProbe>>,
    min_threads: usize,
    thread_override: Option<usize>,
}

impl HardwareProbe {
    /// Creates a probe using the standard library first and `sysinfo` second.
    pub fn new(min_threads: usize) -> Self {
        Self::with_sources(
            vec![Box::new(StdConcurrency), Box::new(SysinfoConcurrency)],
            min_threads,
        )
    }

    /// Creates a probe over custom sources.
    pub fn with_sources(sources: Vec<Box<dyn ConcurrencyProbe>>, min_threads: usize) -> Self {
        Self {
            sources,
            min_threads: min_threads.max(1),
            thread_override: None,
        }
    }

    /// Forces the thread count, bypassing every source.
    pub fn with_override(mut self, thread_override: Option<usize>) -> Self {
        self.thread_override = thread_override.filter(|&n| n > 0);
        self
    }

    /// Detects the hardware. Never returns a zero thread count.
    pub fn probe(&self) -> HardwareProfile {
        if let Some(threads) = self.thread_override {
            log::info!("Hardware: Using configured thread count {}", threads);
            return HardwareProfile::new(threads);
        }

        for source in &self.sources {
            match source.logical_threads() {
                Some(threads) if threads > 0 => {
                    log::info!(
                        "Hardware: Detected {} logical thread(s) via {}",
                        threads,
                        source.name()
                    );
                    return HardwareProfile::new(threads);
                }
                _ => log::debug!("Hardware: Source '{}' gave no answer", source.name()),
            }
        }

        log::warn!(
            "Hardware: Detection failed, falling back to {} thread(s)",
            self.min_threads
        );
        HardwareProfile::new(self.min_threads)
    }
}
