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

//! Entry point of a partition job.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use object_store::path::Path;
use object_store::ObjectStore;

use crate::config::PartitionerConfig;
use crate::error::{MatpartError, Result};
use crate::fan_out::zero_partition_records;
use crate::materialize::{delete_prefix, OutputEncoding, PartitionWriter};
use crate::matrix::MatrixHandle;
use crate::parallelism::resolve_parallelism;
use crate::plan::{PartitionJobSummary, PartitionPlan, PartitionWriteStats};
use crate::shuffle::{ShuffleBackend, ShuffleContext};
use crate::stats::{default_statistics_sink, StatisticsSink};

/// Splits a blocked matrix into row or column partitions stored under an
/// output prefix, one object per partition.
///
/// A job runs synchronously from the caller's point of view: the returned
/// future resolves after every partition is written or the first failure
/// aborted the job.
pub struct DataPartitioner {
    backend: Arc<dyn ShuffleBackend>,
    store: Arc<dyn ObjectStore>,
    statistics: Arc<dyn StatisticsSink>,
    config: PartitionerConfig,
}

impl DataPartitioner {
    pub fn new(backend: Arc<dyn ShuffleBackend>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            backend,
            store,
            statistics: default_statistics_sink(),
            config: PartitionerConfig::default(),
        }
    }

    pub fn with_statistics(mut self, statistics: Arc<dyn StatisticsSink>) -> Self {
        self.statistics = statistics;
        self
    }

    pub fn with_config(mut self, config: PartitionerConfig) -> Self {
        self.config = config;
        self
    }

    /// Number of workers a job of `plan` on `input` would use.
    pub fn resolve_parallelism(&self, input: &MatrixHandle, plan: &PartitionPlan) -> Result<usize> {
        let natural_groups = plan.format().natural_group_count(input.characteristics())?;
        resolve_parallelism(natural_groups, plan.requested_parallelism())
    }

    /// Runs a partition job.
    ///
    /// Everything below `output_prefix` is deleted first, so rerunning a job
    /// replaces its previous output. Partitions the input holds no blocks of
    /// are written as zeros. Failures while reading, shuffling or writing are
    /// reported as [`MatpartError::JobFailed`]; statistics are only recorded
    /// for successful jobs.
    pub async fn partition(
        &self,
        input: &MatrixHandle,
        plan: &PartitionPlan,
        output_prefix: &Path,
        encoding: OutputEncoding,
    ) -> Result<PartitionJobSummary> {
        let start = Instant::now();
        let job_name = self.config.job_name();
        let job_id = uuid::Uuid::new_v4().to_string();
        let mc = *input.characteristics();

        let deleted = delete_prefix(self.store.as_ref(), output_prefix)
            .await
            .map_err(|e| MatpartError::Cleanup(output_prefix.to_string(), Box::new(e)))?;
        debug!("Removed {deleted} objects below {output_prefix}");

        let natural_groups = plan.format().natural_group_count(&mc)?;
        let parallelism = resolve_parallelism(natural_groups, plan.requested_parallelism())?;
        info!(
            "Job {job_name} [{job_id}]: partitioning {mc} from {} {} into {natural_groups} partitions at {output_prefix} with parallelism {parallelism} on the {} backend",
            input.source().name(),
            plan.format(),
            self.backend.name()
        );

        let writer = Arc::new(PartitionWriter::new(
            self.store.clone(),
            output_prefix.clone(),
            encoding,
            mc,
        ));
        let ctx = ShuffleContext {
            job_id: job_id.clone(),
            format: plan.format(),
            characteristics: mc,
            parallelism,
            writer: writer.clone(),
            config: self.config.clone(),
        };
        let partitions = match self.run(ctx, input, &writer, natural_groups).await {
            Ok(partitions) => partitions,
            Err(e) => {
                error!("Job {job_name} [{job_id}] failed: {e}");
                return Err(MatpartError::JobFailed(job_name, Box::new(e)));
            }
        };

        let elapsed = start.elapsed();
        self.statistics.increment_compiled();
        self.statistics.increment_executed();
        self.statistics.record_job(&job_name, elapsed);

        let summary = PartitionJobSummary {
            job_name,
            job_id,
            backend: self.backend.name().to_string(),
            natural_groups,
            parallelism,
            partitions,
            elapsed,
        };
        info!("Finished {summary}");
        Ok(summary)
    }

    /// Shuffles the input, then writes zero partitions for every id the
    /// input holds no blocks of, so the output covers `1..=natural_groups`.
    async fn run(
        &self,
        ctx: ShuffleContext,
        input: &MatrixHandle,
        writer: &PartitionWriter,
        natural_groups: u64,
    ) -> Result<Vec<PartitionWriteStats>> {
        let job_id = ctx.job_id.clone();
        let format = ctx.format;
        let mc = ctx.characteristics;
        let blocks = input.source().scan().await?;
        let mut partitions = self.backend.execute(ctx, blocks).await?;

        let written: HashSet<u64> = partitions.iter().map(|p| p.partition_id).collect();
        let missing: Vec<u64> = (1..=natural_groups)
            .filter(|id| !written.contains(id))
            .collect();
        if !missing.is_empty() {
            warn!(
                "Job {job_id}: input holds no blocks of {} partitions, writing them as zeros",
                missing.len()
            );
        }
        for partition_id in missing {
            let records = zero_partition_records(format, &mc, partition_id)?;
            partitions.push(writer.write_partition(partition_id, records).await?);
        }
        partitions.sort_by_key(|p| p.partition_id);
        Ok(partitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PartitionFormat;
    use crate::matrix::{BlockIndex, MatrixBlock, MatrixCharacteristics};
    use crate::shuffle::HashShuffleBackend;
    use crate::source::MemoryBlockSource;
    use object_store::memory::InMemory;

    fn partitioner() -> DataPartitioner {
        DataPartitioner::new(
            Arc::new(HashShuffleBackend::default()),
            Arc::new(InMemory::new()),
        )
    }

    fn handle() -> MatrixHandle {
        let mc = MatrixCharacteristics::try_new(10, 5, 10, 5).unwrap();
        let block = MatrixBlock::from_fn(10, 5, |i, j| (i * 5 + j + 1) as f64);
        MatrixHandle::new(
            mc,
            Arc::new(MemoryBlockSource::new(vec![(BlockIndex::new(1, 1), block)])),
        )
    }

    #[test]
    fn resolve_caps_parallelism() -> Result<()> {
        let partitioner = partitioner();
        let plan = PartitionPlan::try_new(PartitionFormat::ColumnWise, 100)?;
        assert_eq!(5, partitioner.resolve_parallelism(&handle(), &plan)?);
        let plan = PartitionPlan::try_new(PartitionFormat::RowWise, 3)?;
        assert_eq!(3, partitioner.resolve_parallelism(&handle(), &plan)?);
        Ok(())
    }

    #[tokio::test]
    async fn summary_is_sorted_by_partition_id() -> Result<()> {
        let plan = PartitionPlan::try_new(PartitionFormat::RowWise, 3)?;
        let summary = partitioner()
            .partition(&handle(), &plan, &Path::from("out"), OutputEncoding::TextCell)
            .await?;
        assert_eq!("ParFor-DPSP", summary.job_name);
        assert_eq!(10, summary.natural_groups);
        assert_eq!(3, summary.parallelism);
        let ids: Vec<_> = summary.partitions.iter().map(|p| p.partition_id).collect();
        assert_eq!((1..=10).collect::<Vec<_>>(), ids);
        Ok(())
    }
}
