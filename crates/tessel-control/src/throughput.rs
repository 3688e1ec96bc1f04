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

//! Windowed throughput history per subsystem and execution mode.
//!
//! Besides the per-mode windows, samples are filed into quarter-octave bands
//! of workload size, so single- and multi-threaded runs are only ever
//! compared at similar entity counts. The tracker derives the
//! [`CrossoverPoint`] of each subsystem from those bands: the smallest
//! workload from which every measured band shows multi-threading beating
//! single-threading by the configured margin.

use crate::config::{CrossoverConfig, ThroughputConfig};
use crate::metrics::RingBuffer;
use std::collections::{BTreeMap, HashMap};
use tessel_core::control::{CrossoverPoint, ExecutionMode, ThroughputSample};
use tessel_core::SubsystemId;

/// Band of a workload size: four bands per power of two.
fn size_band(item_count: usize) -> u32 {
    if item_count < 4 {
        return item_count as u32;
    }
    let octave = usize::BITS - 1 - item_count.leading_zeros();
    let quarter = (item_count >> (octave - 2)) & 3;
    4 * octave + quarter as u32
}

/// Smallest workload size falling into `band`.
fn band_floor(band: u32) -> usize {
    if band < 8 {
        return band as usize;
    }
    let octave = band / 4;
    (4 + (band % 4) as usize) << (octave - 2)
}

/// Moves `previous` toward `candidate` by `smoothing`, at least one entity
/// per step so the threshold cannot stall short of the candidate.
fn smooth_toward(previous: usize, candidate: usize, smoothing: f64) -> usize {
    let next = previous as f64 + smoothing * (candidate as f64 - previous as f64);
    if candidate < previous {
        (next.floor() as usize).max(candidate)
    } else {
        (next.ceil() as usize).min(candidate)
    }
}

/// Recent samples of one size band.
#[derive(Debug)]
struct SizeBand {
    single: RingBuffer<ThroughputSample>,
    multi: RingBuffer<ThroughputSample>,
}

impl SizeBand {
    fn new(capacity: usize) -> Self {
        Self {
            single: RingBuffer::new(capacity),
            multi: RingBuffer::new(capacity),
        }
    }

    fn window(&self, mode: ExecutionMode) -> &RingBuffer<ThroughputSample> {
        match mode {
            ExecutionMode::Single => &self.single,
            ExecutionMode::Multi => &self.multi,
        }
    }

    fn window_mut(&mut self, mode: ExecutionMode) -> &mut RingBuffer<ThroughputSample> {
        match mode {
            ExecutionMode::Single => &mut self.single,
            ExecutionMode::Multi => &mut self.multi,
        }
    }

    /// Multi/single ratio once both modes hold `min_samples`.
    fn speedup(&self, min_samples: usize) -> Option<f64> {
        if self.single.count() < min_samples || self.multi.count() < min_samples {
            return None;
        }
        let single = self.single.mean_by(ThroughputSample::items_per_ms)?;
        let multi = self.multi.mean_by(ThroughputSample::items_per_ms)?;
        (single > 0.0).then(|| multi / single)
    }
}

/// Records subsystem timings and owns the crossover points derived from them.
#[derive(Debug)]
pub struct ThroughputTracker {
    window: usize,
    band_window: usize,
    min_samples: usize,
    speedup_margin: f64,
    smoothing: f64,
    samples: HashMap<(SubsystemId, ExecutionMode), RingBuffer<ThroughputSample>>,
    bands: HashMap<SubsystemId, BTreeMap<u32, SizeBand>>,
    crossovers: HashMap<SubsystemId, CrossoverPoint>,
}

impl ThroughputTracker {
    /// Creates an empty tracker.
    pub fn new(throughput: &ThroughputConfig, crossover: &CrossoverConfig) -> Self {
        Self {
            window: throughput.window,
            band_window: throughput.band_window,
            min_samples: throughput.min_samples,
            speedup_margin: crossover.speedup_margin,
            smoothing: crossover.smoothing,
            samples: HashMap::new(),
            bands: HashMap::new(),
            crossovers: HashMap::new(),
        }
    }

    /// Records one measured execution.
    ///
    /// Returns `false` if the sample was skipped because it processed no
    /// items. Elapsed times below one microsecond are raised to one.
    pub fn record(
        &mut self,
        id: SubsystemId,
        mode: ExecutionMode,
        item_count: usize,
        elapsed_micros: u64,
        frame: u64,
    ) -> bool {
        if item_count == 0 {
            log::trace!("Throughput: Skipped empty {:?} sample for {}", mode, id);
            return false;
        }

        let sample = ThroughputSample {
            subsystem_id: id,
            mode,
            item_count,
            elapsed_micros: elapsed_micros.max(1),
            timestamp_frame: frame,
        };
        let window = self.window;
        self.samples
            .entry((id, mode))
            .or_insert_with(|| RingBuffer::new(window))
            .push(sample);
        let band_window = self.band_window;
        self.bands
            .entry(id)
            .or_default()
            .entry(size_band(item_count))
            .or_insert_with(|| SizeBand::new(band_window))
            .window_mut(mode)
            .push(sample);

        log::trace!(
            "Throughput: {} {:?} {} items in {}us ({:.1} items/ms)",
            id,
            mode,
            item_count,
            sample.elapsed_micros,
            sample.items_per_ms()
        );

        self.update_crossover(id, frame);
        true
    }

    /// Mean items per millisecond over the window, or 0.0 without samples.
    pub fn throughput(&self, id: SubsystemId, mode: ExecutionMode) -> f64 {
        self.window_of(id, mode)
            .and_then(|w| w.mean_by(ThroughputSample::items_per_ms))
            .unwrap_or(0.0)
    }

    /// Number of samples currently held for the mode.
    pub fn sample_count(&self, id: SubsystemId, mode: ExecutionMode) -> usize {
        self.window_of(id, mode).map_or(0, RingBuffer::count)
    }

    /// Frame of the most recent sample in the mode.
    pub fn last_sample_frame(&self, id: SubsystemId, mode: ExecutionMode) -> Option<u64> {
        self.window_of(id, mode)
            .and_then(RingBuffer::latest)
            .map(|sample| sample.timestamp_frame)
    }

    /// Returns `true` if the mode holds enough samples of workloads sized
    /// like `item_count` to be trusted.
    pub fn has_local_samples(&self, id: SubsystemId, mode: ExecutionMode, item_count: usize) -> bool {
        self.band_of(id, item_count)
            .is_some_and(|band| band.window(mode).count() >= self.min_samples)
    }

    /// Mean elapsed time of workloads sized like `item_count`, in
    /// milliseconds, or 0.0 without samples.
    pub fn local_elapsed_ms(&self, id: SubsystemId, mode: ExecutionMode, item_count: usize) -> f64 {
        self.band_of(id, item_count)
            .and_then(|band| band.window(mode).mean_by(ThroughputSample::elapsed_ms))
            .unwrap_or(0.0)
    }

    /// Multi/single throughput ratio measured at workloads sized like
    /// `item_count`, or `None` until both modes hold enough samples there.
    pub fn speedup_at(&self, id: SubsystemId, item_count: usize) -> Option<f64> {
        self.band_of(id, item_count)?.speedup(self.min_samples)
    }

    /// The learned crossover point of a subsystem, if multi-threading has
    /// ever proven faster.
    pub fn crossover(&self, id: SubsystemId) -> Option<CrossoverPoint> {
        self.crossovers.get(&id).copied()
    }

    /// Every learned crossover point.
    pub fn crossovers(&self) -> Vec<CrossoverPoint> {
        let mut points: Vec<_> = self.crossovers.values().copied().collect();
        points.sort_by_key(|p| p.subsystem_id);
        points
    }

    /// Subsystems with at least one sample, sorted.
    pub fn tracked_subsystems(&self) -> Vec<SubsystemId> {
        let mut ids: Vec<_> = self.samples.keys().map(|(id, _)| *id).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Forgets every sample and the crossover point of a subsystem.
    pub fn forget(&mut self, id: SubsystemId) {
        self.samples.retain(|(sample_id, _), _| *sample_id != id);
        self.bands.remove(&id);
        self.crossovers.remove(&id);
    }

    fn window_of(&self, id: SubsystemId, mode: ExecutionMode) -> Option<&RingBuffer<ThroughputSample>> {
        self.samples.get(&(id, mode))
    }

    fn band_of(&self, id: SubsystemId, item_count: usize) -> Option<&SizeBand> {
        self.bands.get(&id)?.get(&size_band(item_count))
    }

    /// Smallest band floor from which every measured band, up to the largest,
    /// beats the margin, with the speedup measured there.
    fn crossover_candidate(&self, id: SubsystemId) -> Option<(usize, f64)> {
        let mut candidate = None;
        for (&band, samples) in self.bands.get(&id)?.iter().rev() {
            let Some(speedup) = samples.speedup(self.min_samples) else {
                continue;
            };
            if speedup <= self.speedup_margin {
                break;
            }
            candidate = Some((band_floor(band), speedup));
        }
        candidate
    }

    /// Moves the crossover threshold toward the current candidate. Without a
    /// candidate the previous threshold is kept.
    fn update_crossover(&mut self, id: SubsystemId, frame: u64) {
        let Some((candidate, speedup)) = self.crossover_candidate(id) else {
            return;
        };
        let threshold = match self.crossovers.get(&id) {
            Some(point) => smooth_toward(point.entity_count_threshold, candidate, self.smoothing),
            None => candidate,
        };

        let previous = self
            .crossovers
            .insert(
                id,
                CrossoverPoint {
                    subsystem_id: id,
                    entity_count_threshold: threshold,
                    observed_speedup: speedup,
                    updated_frame: frame,
                },
            )
            .map(|p| p.entity_count_threshold);

        if previous != Some(threshold) {
            log::debug!(
                "Throughput: Crossover for {} moved to {} entities (speedup {:.2}x)",
                id,
                threshold,
                speedup
            );
        }
    }
}
