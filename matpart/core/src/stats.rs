// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Runtime statistics of partition jobs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Receives the statistics of successful partition jobs.
pub trait StatisticsSink: Send + Sync {
    /// A distributed job was compiled.
    fn increment_compiled(&self);
    /// A distributed job was executed.
    fn increment_executed(&self);
    /// Adds `elapsed` to the heavy-hitter entry of `job_name`.
    fn record_job(&self, job_name: &str, elapsed: Duration);
}

#[derive(Default)]
pub struct NoopStatisticsSink {}

impl StatisticsSink for NoopStatisticsSink {
    fn increment_compiled(&self) {}
    fn increment_executed(&self) {}
    fn record_job(&self, _job_name: &str, _elapsed: Duration) {}
}

/// Per-name totals of recorded jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeavyHitter {
    pub count: u64,
    pub total: Duration,
}

/// Keeps counters and heavy hitters in memory.
#[derive(Debug, Default)]
pub struct InMemoryStatisticsSink {
    compiled: AtomicU64,
    executed: AtomicU64,
    heavy_hitters: Mutex<HashMap<String, HeavyHitter>>,
}

impl InMemoryStatisticsSink {
    pub fn compiled(&self) -> u64 {
        self.compiled.load(Ordering::Relaxed)
    }

    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    pub fn heavy_hitter(&self, job_name: &str) -> Option<HeavyHitter> {
        self.heavy_hitters
            .lock()
            .ok()
            .and_then(|hitters| hitters.get(job_name).copied())
    }

    /// Heavy hitters ordered by total time, largest first.
    pub fn heavy_hitters(&self) -> Vec<(String, HeavyHitter)> {
        let mut hitters = match self.heavy_hitters.lock() {
            Ok(hitters) => hitters
                .iter()
                .map(|(name, hitter)| (name.clone(), *hitter))
                .collect::<Vec<_>>(),
            Err(_) => vec![],
        };
        hitters.sort_by(|a, b| b.1.total.cmp(&a.1.total).then_with(|| a.0.cmp(&b.0)));
        hitters
    }
}

impl StatisticsSink for InMemoryStatisticsSink {
    fn increment_compiled(&self) {
        self.compiled.fetch_add(1, Ordering::Relaxed);
    }

    fn increment_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_job(&self, job_name: &str, elapsed: Duration) {
        // a poisoned map only loses statistics
        if let Ok(mut hitters) = self.heavy_hitters.lock() {
            let hitter = hitters.entry(job_name.to_string()).or_default();
            hitter.count += 1;
            hitter.total += elapsed;
        }
    }
}

pub fn default_statistics_sink() -> Arc<dyn StatisticsSink> {
    Arc::new(NoopStatisticsSink::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_sink_accumulates() {
        let sink = InMemoryStatisticsSink::default();
        sink.increment_compiled();
        sink.increment_executed();
        sink.record_job("ParFor-DPSP", Duration::from_millis(30));
        sink.record_job("ParFor-DPSP", Duration::from_millis(20));
        sink.record_job("other", Duration::from_millis(100));

        assert_eq!(1, sink.compiled());
        assert_eq!(1, sink.executed());
        assert_eq!(
            Some(HeavyHitter {
                count: 2,
                total: Duration::from_millis(50)
            }),
            sink.heavy_hitter("ParFor-DPSP")
        );
        let names: Vec<_> = sink.heavy_hitters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(vec!["other", "ParFor-DPSP"], names);
        assert_eq!(None, sink.heavy_hitter("missing"));
    }
}
