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

//! Rolling sample storage.

/// A fixed-capacity circular buffer. Pushing into a full buffer overwrites the
/// oldest value.
///
/// The capacity is chosen at runtime so every subsystem window can be sized
/// from configuration; storage grows lazily up to that capacity.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    data: Vec<T>,
    capacity: usize,
    index: usize,
}

impl<T: Copy> RingBuffer<T> {
    /// Creates a new, empty ring buffer holding at most `capacity` values.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity: capacity.max(1),
            index: 0,
        }
    }

    /// Pushes a new value into the buffer, overwriting the oldest if full.
    pub fn push(&mut self, value: T) {
        if self.data.len() < self.capacity {
            self.data.push(value);
        } else {
            self.data[self.index] = value;
        }
        self.index = (self.index + 1) % self.capacity;
    }

    /// Returns the number of elements currently in the buffer.
    pub fn count(&self) -> usize {
        self.data.len()
    }

    /// Returns the most recently pushed value.
    pub fn latest(&self) -> Option<&T> {
        if self.data.is_empty() {
            return None;
        }
        let last = (self.index + self.capacity - 1) % self.capacity;
        self.data.get(last)
    }

    /// Arithmetic mean of `value` over the buffer, or `None` if it is empty.
    pub fn mean_by(&self, value: impl Fn(&T) -> f64) -> Option<f64> {
        if self.data.is_empty() {
            return None;
        }
        let sum: f64 = self.data.iter().map(value).sum();
        Some(sum / self.data.len() as f64)
    }
}
