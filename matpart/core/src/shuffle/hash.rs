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

//! Channel based shuffle with in-memory grouping workers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use log::debug;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::error::{MatpartError, Result};
use crate::fan_out::fan_out_block;
use crate::materialize::PartitionWriter;
use crate::plan::{PartitionRecord, PartitionWriteStats};
use crate::shuffle::{shuffle_slot, ShuffleBackend, ShuffleContext};
use crate::source::BlockStream;

/// Fans blocks out on concurrent tasks and streams the records over bounded
/// channels to `parallelism` grouping workers. Worker `slot` owns every
/// partition id with `(id - 1) % parallelism == slot` and writes its groups
/// once all input has been routed.
///
/// All records of a worker are held in memory until the input ends.
#[derive(Debug, Default)]
pub struct HashShuffleBackend {}

#[async_trait]
impl ShuffleBackend for HashShuffleBackend {
    fn name(&self) -> &str {
        "hash"
    }

    async fn execute(
        &self,
        ctx: ShuffleContext,
        mut blocks: BlockStream,
    ) -> Result<Vec<PartitionWriteStats>> {
        let start = Instant::now();
        let capacity = ctx.config.channel_capacity();

        let mut workers = JoinSet::new();
        let mut senders = Vec::with_capacity(ctx.parallelism);
        for slot in 0..ctx.parallelism {
            let (tx, rx) = mpsc::channel(capacity);
            senders.push(tx);
            workers.spawn(group_and_write(slot, rx, ctx.writer.clone()));
        }
        let senders = Arc::new(senders);

        // Dropping either join set on an early return aborts its tasks.
        let semaphore = Arc::new(Semaphore::new(ctx.config.fanout_concurrency()));
        let mut fan_out_tasks = JoinSet::new();
        let mut num_blocks = 0u64;
        while let Some(next) = blocks.next().await {
            let (index, block) = next?;
            num_blocks += 1;

            // Block if exceeds max concurrent fan-out tasks.
            let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                MatpartError::Internal(format!("fan-out semaphore closed: {e}"))
            })?;
            let senders = senders.clone();
            let format = ctx.format;
            let mc = ctx.characteristics;
            fan_out_tasks.spawn(async move {
                let records = fan_out_block(format, &mc, index, block)?;
                for record in records {
                    let slot = shuffle_slot(record.partition_id, senders.len());
                    // Block if the worker's channel is full.
                    senders[slot].send(record).await.map_err(|_| {
                        MatpartError::Internal(format!("grouping worker {slot} stopped"))
                    })?;
                }
                drop(permit);
                Ok::<_, MatpartError>(())
            });

            while let Some(result) = fan_out_tasks.try_join_next() {
                result??;
            }
        }
        while let Some(result) = fan_out_tasks.join_next().await {
            result??;
        }
        // the channels close once the last sender is gone
        drop(senders);
        debug!(
            "Job {} routed {num_blocks} blocks to {} workers in {:?}",
            ctx.job_id,
            ctx.parallelism,
            start.elapsed()
        );

        let mut stats = vec![];
        while let Some(result) = workers.join_next().await {
            stats.extend(result??);
        }
        Ok(stats)
    }
}

async fn group_and_write(
    slot: usize,
    mut records: mpsc::Receiver<PartitionRecord>,
    writer: Arc<PartitionWriter>,
) -> Result<Vec<PartitionWriteStats>> {
    let mut groups: BTreeMap<u64, Vec<PartitionRecord>> = BTreeMap::new();
    while let Some(record) = records.recv().await {
        groups.entry(record.partition_id).or_default().push(record);
    }
    debug!("Grouping worker {slot} writes {} partitions", groups.len());

    let mut stats = Vec::with_capacity(groups.len());
    for (partition_id, records) in groups {
        stats.push(writer.write_partition(partition_id, records).await?);
    }
    Ok(stats)
}
