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

//! Sort based shuffle.
//!
//! A single map pass fans the input out and buffers the records per reducer.
//! When the buffered memory exceeds `memory_limit * spill_threshold` the
//! largest buffers are spilled to local disk until usage drops to half the
//! threshold. Once the input is exhausted, `parallelism` reduce tasks read
//! back their spill files and buffers, sort by `(partition id, position)`
//! and write each run of equal ids as one partition.

mod buffer;
mod spill;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::TryStreamExt;
use log::{debug, info, warn};
use tokio::task::JoinSet;

use buffer::ShuffleBuffer;
use spill::{read_spill_file, SpillManager};

use crate::error::{MatpartError, Result};
use crate::fan_out::fan_out_block;
use crate::materialize::PartitionWriter;
use crate::plan::{PartitionRecord, PartitionWriteStats};
use crate::shuffle::{shuffle_slot, ShuffleBackend, ShuffleContext};
use crate::source::BlockStream;

#[derive(Debug, Default)]
pub struct SortShuffleBackend {}

#[async_trait]
impl ShuffleBackend for SortShuffleBackend {
    fn name(&self) -> &str {
        "sort"
    }

    async fn execute(
        &self,
        ctx: ShuffleContext,
        blocks: BlockStream,
    ) -> Result<Vec<PartitionWriteStats>> {
        let mut spill_manager = SpillManager::new(&ctx.config.work_dir(), &ctx.job_id)?;
        let result = run(&ctx, blocks, &mut spill_manager).await;

        if let Err(e) = spill_manager.cleanup() {
            warn!(
                "Failed to remove spill directory {:?}: {e}",
                spill_manager.spill_dir()
            );
        }
        result
    }
}

async fn run(
    ctx: &ShuffleContext,
    blocks: BlockStream,
    spill_manager: &mut SpillManager,
) -> Result<Vec<PartitionWriteStats>> {
    let start = Instant::now();
    let format = ctx.format;
    let mc = ctx.characteristics;
    let mut fanned = blocks
        .map_ok(move |(index, block)| async move {
            match tokio::spawn(async move { fan_out_block(format, &mc, index, block) })
                .await
            {
                Ok(records) => records,
                Err(e) => Err(MatpartError::from(e)),
            }
        })
        .try_buffer_unordered(ctx.config.fanout_concurrency());

    let mut buffers: Vec<ShuffleBuffer> =
        (0..ctx.parallelism).map(ShuffleBuffer::new).collect();
    let spill_memory_threshold = ctx.config.spill_memory_threshold();
    let mut num_records = 0u64;
    while let Some(records) = fanned.try_next().await? {
        for record in records {
            num_records += 1;
            buffers[shuffle_slot(record.partition_id, ctx.parallelism)].append(record);
        }

        let total_memory: usize = buffers.iter().map(|b| b.memory_used()).sum();
        if total_memory > spill_memory_threshold {
            spill_largest_buffers(&mut buffers, spill_manager, spill_memory_threshold / 2)?;
        }
    }
    info!(
        "Job {} buffered {num_records} records in {:?}. Spills: {}. Bytes spilled: {}.",
        ctx.job_id,
        start.elapsed(),
        spill_manager.total_spills(),
        spill_manager.total_bytes_spilled()
    );

    // Dropping the join set on an early return aborts the reducers.
    let mut reducers = JoinSet::new();
    for buffer in buffers.iter_mut() {
        let reducer = buffer.reducer();
        reducers.spawn(reduce(
            reducer,
            spill_manager.take_spill_files(reducer),
            buffer.drain(),
            ctx.writer.clone(),
        ));
    }
    let mut stats = vec![];
    while let Some(result) = reducers.join_next().await {
        stats.extend(result??);
    }
    Ok(stats)
}

/// Spills the largest buffers until total memory is below the target.
fn spill_largest_buffers(
    buffers: &mut [ShuffleBuffer],
    spill_manager: &mut SpillManager,
    target_memory: usize,
) -> Result<()> {
    loop {
        let total_memory: usize = buffers.iter().map(|b| b.memory_used()).sum();
        if total_memory <= target_memory {
            break;
        }

        let largest = buffers
            .iter()
            .enumerate()
            .max_by_key(|(_, b)| b.memory_used())
            .map(|(idx, _)| idx);
        match largest {
            Some(idx) if buffers[idx].memory_used() > 0 => {
                let reducer = buffers[idx].reducer();
                let records = buffers[idx].drain();
                spill_manager.spill(reducer, records)?;
            }
            _ => break,
        }
    }
    Ok(())
}

async fn reduce(
    reducer: usize,
    spill_files: Vec<PathBuf>,
    mut records: Vec<PartitionRecord>,
    writer: Arc<PartitionWriter>,
) -> Result<Vec<PartitionWriteStats>> {
    for path in &spill_files {
        records.extend(read_spill_file(path)?);
    }
    records.sort_by_key(|r| (r.partition_id, r.position()));
    debug!(
        "Reducer {reducer} sorted {} records from {} spill files",
        records.len(),
        spill_files.len()
    );

    let mut stats = vec![];
    let mut records = records.into_iter().peekable();
    while let Some(first) = records.next() {
        let partition_id = first.partition_id;
        let mut run = vec![first];
        while let Some(next) = records.next_if(|r| r.partition_id == partition_id) {
            run.push(next);
        }
        stats.push(writer.write_partition(partition_id, run).await?);
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{BlockIndex, MatrixBlock};
    use tempfile::TempDir;

    fn record(partition_id: u64, rows: usize) -> PartitionRecord {
        PartitionRecord {
            partition_id,
            block: BlockIndex::new(partition_id, 1),
            row_offset: 0,
            col_offset: 0,
            payload: MatrixBlock::zeros(rows, 8),
        }
    }

    #[test]
    fn spills_largest_buffers_first() -> Result<()> {
        let work_dir = TempDir::new()?;
        let mut spill_manager = SpillManager::new(work_dir.path(), "job")?;
        let mut buffers: Vec<ShuffleBuffer> = (0..3).map(ShuffleBuffer::new).collect();
        buffers[0].append(record(1, 1));
        buffers[1].append(record(2, 64));
        buffers[2].append(record(3, 8));

        let small = buffers[0].memory_used() + buffers[2].memory_used();
        spill_largest_buffers(&mut buffers, &mut spill_manager, small)?;

        assert!(buffers[1].is_empty());
        assert!(!buffers[0].is_empty());
        assert!(!buffers[2].is_empty());
        assert_eq!(1, spill_manager.total_spills());
        assert!(spill_manager.has_spill_files(1));
        Ok(())
    }

    #[test]
    fn target_zero_spills_everything() -> Result<()> {
        let work_dir = TempDir::new()?;
        let mut spill_manager = SpillManager::new(work_dir.path(), "job")?;
        let mut buffers: Vec<ShuffleBuffer> = (0..2).map(ShuffleBuffer::new).collect();
        buffers[0].append(record(1, 2));
        buffers[1].append(record(2, 2));

        spill_largest_buffers(&mut buffers, &mut spill_manager, 0)?;
        assert!(buffers.iter().all(|b| b.is_empty()));
        assert_eq!(2, spill_manager.total_spills());
        Ok(())
    }
}
