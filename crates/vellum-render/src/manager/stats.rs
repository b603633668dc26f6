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

//! Counters describing the work done by flushes.

/// Statistics for one flush, or accumulated over the lifetime of a drawing manager.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushStats {
    /// A sequential counter of attempted flushes.
    pub flush_number: u64,
    /// The number of tasks that executed device work.
    pub tasks_executed: u64,
    /// The number of ops tasks folded into an earlier task by reordering.
    pub tasks_merged: u64,
    /// The number of allocator registers created.
    pub registers_created: u64,
    /// The number of surfaces created by the allocator.
    pub surfaces_created: u64,
    /// The number of proxies bound to an existing surface.
    pub surfaces_reused: u64,
    /// The number of flushes that reported an error.
    pub failed_flushes: u64,
    /// The CPU time spent in the most recent flush.
    pub cpu_flush_time_ms: f32,
}

impl FlushStats {
    /// Adds the counters of `flush` to these totals and records its timing.
    pub fn accumulate(&mut self, flush: &FlushStats) {
        self.flush_number += 1;
        self.tasks_executed += flush.tasks_executed;
        self.tasks_merged += flush.tasks_merged;
        self.registers_created += flush.registers_created;
        self.surfaces_created += flush.surfaces_created;
        self.surfaces_reused += flush.surfaces_reused;
        self.failed_flushes += flush.failed_flushes;
        self.cpu_flush_time_ms = flush.cpu_flush_time_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulate_sums_counters_and_keeps_latest_time() {
        let mut totals = FlushStats::default();
        let first = FlushStats {
            tasks_executed: 3,
            surfaces_created: 2,
            cpu_flush_time_ms: 1.5,
            ..Default::default()
        };
        let second = FlushStats {
            tasks_executed: 1,
            failed_flushes: 1,
            cpu_flush_time_ms: 0.25,
            ..Default::default()
        };
        totals.accumulate(&first);
        totals.accumulate(&second);
        assert_eq!(totals.flush_number, 2);
        assert_eq!(totals.tasks_executed, 4);
        assert_eq!(totals.surfaces_created, 2);
        assert_eq!(totals.failed_flushes, 1);
        assert_eq!(totals.cpu_flush_time_ms, 0.25);
    }
}
