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

//! Where the blocks of an input matrix come from.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use log::{debug, info};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};

use crate::codec;
use crate::error::{MatpartError, Result};
use crate::matrix::{BlockIndex, MatrixBlock};
use crate::plan::PartitionRecord;

/// Stream of the blocks of a matrix, in no particular order.
pub type BlockStream = BoxStream<'static, Result<(BlockIndex, MatrixBlock)>>;

/// Read-only access to the blocks of a stored matrix.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Short description for logs.
    fn name(&self) -> &str;

    /// Starts a scan over all blocks. Each call yields the full collection.
    async fn scan(&self) -> Result<BlockStream>;
}

/// Blocks held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlockSource {
    blocks: Arc<Vec<(BlockIndex, MatrixBlock)>>,
}

impl MemoryBlockSource {
    pub fn new(blocks: Vec<(BlockIndex, MatrixBlock)>) -> Self {
        Self {
            blocks: Arc::new(blocks),
        }
    }

    pub fn blocks(&self) -> &[(BlockIndex, MatrixBlock)] {
        &self.blocks
    }
}

#[async_trait]
impl BlockSource for MemoryBlockSource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn scan(&self) -> Result<BlockStream> {
        let blocks = self.blocks.clone();
        let len = blocks.len();
        Ok(stream::iter((0..len).map(move |i| Ok(blocks[i].clone()))).boxed())
    }
}

/// Blocks stored as binary-block objects under a prefix of an object store.
///
/// Every object below the prefix is read; each holds whole blocks encoded
/// with [`codec::encode_records`] and a partition id of 0.
#[derive(Debug, Clone)]
pub struct ObjectStoreBlockSource {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
    description: String,
}

impl ObjectStoreBlockSource {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Path) -> Self {
        let description = format!("{store}/{prefix}");
        Self {
            store,
            prefix,
            description,
        }
    }
}

#[async_trait]
impl BlockSource for ObjectStoreBlockSource {
    fn name(&self) -> &str {
        &self.description
    }

    async fn scan(&self) -> Result<BlockStream> {
        let mut locations: Vec<Path> = self
            .store
            .list(Some(&self.prefix))
            .map_ok(|meta| meta.location)
            .try_collect()
            .await?;
        locations.sort();
        debug!(
            "Scanning {} block files under {}",
            locations.len(),
            self.prefix
        );

        let store = self.store.clone();
        let stream = stream::iter(locations)
            .then(move |location| {
                let store = store.clone();
                async move { read_block_file(store.as_ref(), &location).await }
            })
            .map_ok(|blocks| stream::iter(blocks.into_iter().map(Ok)))
            .try_flatten();
        Ok(stream.boxed())
    }
}

async fn read_block_file(
    store: &dyn ObjectStore,
    location: &Path,
) -> Result<Vec<(BlockIndex, MatrixBlock)>> {
    let bytes = store.get(location).await?.bytes().await?;
    codec::decode_records(&bytes)?
        .into_iter()
        .map(|record| {
            if record.row_offset != 0 || record.col_offset != 0 {
                return Err(MatpartError::General(format!(
                    "{location} holds a partial block at {}",
                    record.block
                )));
            }
            Ok((record.block, record.payload))
        })
        .collect()
}

/// Writes blocks under `prefix` as binary-block objects, `blocks_per_file`
/// blocks per object. Returns the number of objects written.
pub async fn write_blocks(
    store: &dyn ObjectStore,
    prefix: &Path,
    blocks: Vec<(BlockIndex, MatrixBlock)>,
    blocks_per_file: usize,
) -> Result<usize> {
    if blocks_per_file == 0 {
        return Err(MatpartError::Configuration(
            "blocks per file must be positive".to_string(),
        ));
    }
    let records: Vec<PartitionRecord> = blocks
        .into_iter()
        .map(|(block, payload)| PartitionRecord {
            partition_id: 0,
            block,
            row_offset: 0,
            col_offset: 0,
            payload,
        })
        .collect();

    let mut num_files = 0;
    for (i, chunk) in records.chunks(blocks_per_file).enumerate() {
        let location = prefix.child(format!("blocks-{i:05}.arrow"));
        let bytes = codec::encode_records(chunk)?;
        store.put(&location, PutPayload::from(bytes)).await?;
        num_files += 1;
    }
    info!("Wrote {} blocks in {num_files} files to {prefix}", records.len());
    Ok(num_files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn blocks() -> Vec<(BlockIndex, MatrixBlock)> {
        (1..=3)
            .map(|i| {
                (
                    BlockIndex::new(i, 1),
                    MatrixBlock::from_fn(2, 2, |r, c| (i as usize * 10 + r * 2 + c) as f64),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn memory_source_can_be_scanned_twice() -> Result<()> {
        let source = MemoryBlockSource::new(blocks());
        let first: Vec<_> = source.scan().await?.try_collect().await?;
        let second: Vec<_> = source.scan().await?.try_collect().await?;
        assert_eq!(3, first.len());
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn object_store_source_reads_written_blocks() -> Result<()> {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let prefix = Path::from("input/A");
        assert_eq!(2, write_blocks(store.as_ref(), &prefix, blocks(), 2).await?);

        let source = ObjectStoreBlockSource::new(store, prefix);
        let mut scanned: Vec<_> = source.scan().await?.try_collect().await?;
        scanned.sort_by_key(|(index, _)| *index);
        assert_eq!(blocks(), scanned);
        Ok(())
    }

    #[tokio::test]
    async fn partial_blocks_are_rejected() -> Result<()> {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let record = PartitionRecord {
            partition_id: 0,
            block: BlockIndex::new(1, 1),
            row_offset: 1,
            col_offset: 0,
            payload: MatrixBlock::zeros(1, 2),
        };
        store
            .put(
                &Path::from("input/B/blocks-00000.arrow"),
                PutPayload::from(codec::encode_records(&[record])?),
            )
            .await?;

        let source = ObjectStoreBlockSource::new(store, Path::from("input/B"));
        let result: Result<Vec<_>> = source.scan().await?.try_collect().await;
        assert!(result.is_err());
        Ok(())
    }
}
