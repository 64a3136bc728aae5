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

//! Shuffle/group stage: routes fanned-out records to `parallelism` workers,
//! groups them by partition id and hands each complete group to the
//! [`PartitionWriter`].
//!
//! Two backends share the same contract:
//!
//! * [`HashShuffleBackend`] streams records over bounded channels into
//!   in-memory grouping workers.
//! * [`SortShuffleBackend`] buffers records per reducer, spills to local
//!   disk under memory pressure and sorts each reducer's records at the end.

mod hash;
mod sort;

use std::sync::Arc;

use async_trait::async_trait;

pub use hash::HashShuffleBackend;
pub use sort::SortShuffleBackend;

use crate::config::PartitionerConfig;
use crate::error::{MatpartError, Result};
use crate::format::PartitionFormat;
use crate::materialize::PartitionWriter;
use crate::matrix::MatrixCharacteristics;
use crate::plan::PartitionWriteStats;
use crate::source::BlockStream;

/// Everything a backend needs to run one partition job.
#[derive(Debug, Clone)]
pub struct ShuffleContext {
    pub job_id: String,
    pub format: PartitionFormat,
    pub characteristics: MatrixCharacteristics,
    /// Number of grouping workers, already capped at the natural group count.
    pub parallelism: usize,
    pub writer: Arc<PartitionWriter>,
    pub config: PartitionerConfig,
}

/// Executes the fan-out, shuffle and materialize stages of a job.
#[async_trait]
pub trait ShuffleBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Runs the job to completion. Returns the stats of every written
    /// partition, in no particular order. On the first failure all remaining
    /// work is aborted and the error is returned.
    async fn execute(
        &self,
        ctx: ShuffleContext,
        blocks: BlockStream,
    ) -> Result<Vec<PartitionWriteStats>>;
}

/// Worker responsible for `partition_id`.
pub fn shuffle_slot(partition_id: u64, parallelism: usize) -> usize {
    (partition_id.saturating_sub(1) % parallelism as u64) as usize
}

/// Looks up a backend by name (`hash` or `sort`).
pub fn backend_from_name(name: &str) -> Result<Arc<dyn ShuffleBackend>> {
    match name.to_ascii_lowercase().as_str() {
        "hash" => Ok(Arc::new(HashShuffleBackend::default())),
        "sort" => Ok(Arc::new(SortShuffleBackend::default())),
        other => Err(MatpartError::Configuration(format!(
            "unknown shuffle backend: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_round_robin_over_ids() {
        let slots: Vec<_> = (1..=7).map(|id| shuffle_slot(id, 3)).collect();
        assert_eq!(vec![0, 1, 2, 0, 1, 2, 0], slots);
        assert!((1..=50).all(|id| shuffle_slot(id, 50) == id as usize - 1));
    }

    #[test]
    fn backend_names() {
        assert_eq!("hash", backend_from_name("HASH").unwrap().name());
        assert_eq!("sort", backend_from_name("sort").unwrap().name());
        assert!(backend_from_name("spark").is_err());
    }
}
