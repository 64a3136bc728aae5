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

//! Materialize: assembles the records of one partition and stores them at
//! `<prefix>/<partition id>`.
//!
//! Each partition is written with a single `put`, so readers see either the
//! complete partition or nothing. `LocalFileSystem` stages the upload and
//! renames it into place; `InMemory` swaps the entry.

use std::fmt::{Display, Formatter};
use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use log::debug;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};

use crate::codec;
use crate::error::{MatpartError, Result};
use crate::matrix::MatrixCharacteristics;
use crate::plan::{PartitionRecord, PartitionWriteStats};

/// On-disk representation of a written partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputEncoding {
    /// Arrow IPC stream of records, one row per block or block slice.
    #[default]
    BinaryBlock,
    /// Arrow IPC stream of non-zero `(row, col, value)` cells.
    BinaryCell,
    /// Text lines `row col value` for non-zero cells.
    TextCell,
}

impl OutputEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            OutputEncoding::BinaryBlock => "binary-block",
            OutputEncoding::BinaryCell => "binary-cell",
            OutputEncoding::TextCell => "text-cell",
        }
    }
}

impl Display for OutputEncoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for OutputEncoding {
    type Err = MatpartError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "binary-block" => Ok(OutputEncoding::BinaryBlock),
            "binary-cell" => Ok(OutputEncoding::BinaryCell),
            "text-cell" | "text" => Ok(OutputEncoding::TextCell),
            other => Err(MatpartError::Configuration(format!(
                "unsupported output encoding: {other}"
            ))),
        }
    }
}

/// Location of partition `partition_id` below `prefix`.
pub fn partition_path(prefix: &Path, partition_id: u64) -> Path {
    prefix.child(partition_id.to_string())
}

/// Writes whole partitions to an object store.
#[derive(Debug, Clone)]
pub struct PartitionWriter {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
    encoding: OutputEncoding,
    characteristics: MatrixCharacteristics,
}

impl PartitionWriter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        prefix: Path,
        encoding: OutputEncoding,
        characteristics: MatrixCharacteristics,
    ) -> Self {
        Self {
            store,
            prefix,
            encoding,
            characteristics,
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Orders the records by matrix position, encodes and stores them.
    ///
    /// All records must carry `partition_id`, and no two of them may sit at
    /// the same position.
    pub async fn write_partition(
        &self,
        partition_id: u64,
        mut records: Vec<PartitionRecord>,
    ) -> Result<PartitionWriteStats> {
        if let Some(stray) = records.iter().find(|r| r.partition_id != partition_id) {
            return Err(MatpartError::Internal(format!(
                "record of partition {} routed to partition {partition_id}",
                stray.partition_id
            )));
        }
        records.sort_by_key(|r| r.position());
        if let Some(pair) = records
            .windows(2)
            .find(|pair| pair[0].position() == pair[1].position())
        {
            return Err(MatpartError::General(format!(
                "block {} contributes to partition {partition_id} more than once",
                pair[0].block
            )));
        }

        let num_records = records.len() as u64;
        let num_cells: u64 = records
            .iter()
            .map(|r| r.payload.values().len() as u64)
            .sum();
        let bytes = self.encode(&records)?;
        let num_bytes = bytes.len() as u64;

        let path = partition_path(&self.prefix, partition_id);
        self.store.put(&path, PutPayload::from(bytes)).await?;
        debug!(
            "Finished writing partition {partition_id} at {path}. Records: {num_records}. Cells: {num_cells}. Bytes: {num_bytes}."
        );

        Ok(PartitionWriteStats {
            partition_id,
            path: path.to_string(),
            num_records,
            num_cells,
            num_bytes,
        })
    }

    fn encode(&self, records: &[PartitionRecord]) -> Result<Vec<u8>> {
        match self.encoding {
            OutputEncoding::BinaryBlock => codec::encode_records(records),
            OutputEncoding::BinaryCell => {
                let batch = codec::records_to_cell_batch(records, &self.characteristics)?;
                codec::write_ipc(Vec::new(), &codec::cell_schema(), &[batch])
            }
            OutputEncoding::TextCell => {
                let mut text = String::new();
                codec::for_each_nonzero(records, &self.characteristics, |row, col, value| {
                    text.push_str(&format!("{row} {col} {value}\n"));
                });
                Ok(text.into_bytes())
            }
        }
    }
}

/// Reads back a partition written with [`OutputEncoding::BinaryBlock`].
pub async fn read_partition_records(
    store: &dyn ObjectStore,
    path: &Path,
) -> Result<Vec<PartitionRecord>> {
    let bytes = store.get(path).await?.bytes().await?;
    codec::decode_records(&bytes)
}

/// Reads back the non-zero cells of a partition in any encoding.
pub async fn read_partition_cells(
    store: &dyn ObjectStore,
    path: &Path,
    encoding: OutputEncoding,
    mc: &MatrixCharacteristics,
) -> Result<Vec<(u64, u64, f64)>> {
    let bytes = store.get(path).await?.bytes().await?;
    match encoding {
        OutputEncoding::BinaryBlock => {
            let records = codec::decode_records(&bytes)?;
            let mut cells = vec![];
            codec::for_each_nonzero(&records, mc, |row, col, value| {
                cells.push((row, col, value))
            });
            Ok(cells)
        }
        OutputEncoding::BinaryCell => {
            let mut cells = vec![];
            for batch in codec::read_ipc(Cursor::new(bytes))? {
                cells.extend(codec::cell_batch_to_cells(&batch)?);
            }
            Ok(cells)
        }
        OutputEncoding::TextCell => {
            let text = std::str::from_utf8(&bytes).map_err(|e| {
                MatpartError::General(format!("partition {path} is not UTF-8: {e}"))
            })?;
            text.lines().map(|line| parse_text_cell(path, line)).collect()
        }
    }
}

fn parse_text_cell(path: &Path, line: &str) -> Result<(u64, u64, f64)> {
    let malformed = || MatpartError::General(format!("malformed cell '{line}' in {path}"));
    let mut parts = line.split_whitespace();
    let row = parts.next().and_then(|v| v.parse().ok()).ok_or_else(malformed)?;
    let col = parts.next().and_then(|v| v.parse().ok()).ok_or_else(malformed)?;
    let value = parts.next().and_then(|v| v.parse().ok()).ok_or_else(malformed)?;
    Ok((row, col, value))
}

/// Deletes every object below `prefix`. Returns the number of objects removed.
pub async fn delete_prefix(store: &dyn ObjectStore, prefix: &Path) -> Result<usize> {
    let locations = store
        .list(Some(prefix))
        .map_ok(|meta| meta.location)
        .boxed();
    let mut deleted = 0;
    let mut results = store.delete_stream(locations);
    while let Some(result) = results.next().await {
        match result {
            Ok(_) => deleted += 1,
            // already gone
            Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(deleted)
}

/// Lists the partition ids currently stored below `prefix`, sorted.
pub async fn list_partitions(store: &dyn ObjectStore, prefix: &Path) -> Result<Vec<u64>> {
    let locations: Vec<Path> = store
        .list(Some(prefix))
        .map_ok(|meta| meta.location)
        .try_collect()
        .await?;
    let mut ids = locations
        .iter()
        .filter_map(|location| location.filename().and_then(|name| name.parse().ok()))
        .collect::<Vec<u64>>();
    ids.sort_unstable();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{BlockIndex, MatrixBlock};
    use object_store::memory::InMemory;

    fn writer(store: Arc<dyn ObjectStore>, encoding: OutputEncoding) -> PartitionWriter {
        PartitionWriter::new(
            store,
            Path::from("out"),
            encoding,
            MatrixCharacteristics::try_new(4, 4, 2, 2).unwrap(),
        )
    }

    fn row_records() -> Vec<PartitionRecord> {
        // row 3 of a 4x4 matrix arrives as two slices, in reverse order
        vec![
            PartitionRecord {
                partition_id: 3,
                block: BlockIndex::new(2, 2),
                row_offset: 0,
                col_offset: 0,
                payload: MatrixBlock::try_new(1, 2, vec![3.0, 0.0]).unwrap(),
            },
            PartitionRecord {
                partition_id: 3,
                block: BlockIndex::new(2, 1),
                row_offset: 0,
                col_offset: 0,
                payload: MatrixBlock::try_new(1, 2, vec![1.0, 2.0]).unwrap(),
            },
        ]
    }

    #[tokio::test]
    async fn records_are_written_in_position_order() -> Result<()> {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let stats = writer(store.clone(), OutputEncoding::BinaryBlock)
            .write_partition(3, row_records())
            .await?;
        assert_eq!("out/3", stats.path);
        assert_eq!(2, stats.num_records);
        assert_eq!(4, stats.num_cells);

        let records = read_partition_records(store.as_ref(), &Path::from("out/3")).await?;
        assert_eq!(BlockIndex::new(2, 1), records[0].block);
        assert_eq!(BlockIndex::new(2, 2), records[1].block);
        Ok(())
    }

    #[tokio::test]
    async fn all_encodings_hold_the_same_cells() -> Result<()> {
        let mc = MatrixCharacteristics::try_new(4, 4, 2, 2)?;
        for encoding in [
            OutputEncoding::BinaryBlock,
            OutputEncoding::BinaryCell,
            OutputEncoding::TextCell,
        ] {
            let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
            writer(store.clone(), encoding)
                .write_partition(3, row_records())
                .await?;
            let cells =
                read_partition_cells(store.as_ref(), &Path::from("out/3"), encoding, &mc)
                    .await?;
            assert_eq!(
                vec![(3, 1, 1.0), (3, 2, 2.0), (3, 3, 3.0)],
                cells,
                "{encoding}"
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn misrouted_record_is_rejected() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let result = writer(store, OutputEncoding::BinaryBlock)
            .write_partition(4, row_records())
            .await;
        assert!(matches!(result, Err(MatpartError::Internal(_))));
    }

    #[tokio::test]
    async fn duplicate_block_is_rejected() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let mut records = row_records();
        records.push(records[0].clone());
        let result = writer(store.clone(), OutputEncoding::BinaryBlock)
            .write_partition(3, records)
            .await;
        assert!(matches!(result, Err(MatpartError::General(_))));
        assert!(list_partitions(store.as_ref(), &Path::from("out"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn delete_and_list() -> Result<()> {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let w = writer(store.clone(), OutputEncoding::TextCell);
        w.write_partition(3, row_records()).await?;
        store
            .put(&Path::from("out/12"), PutPayload::from_static(b""))
            .await?;
        store
            .put(&Path::from("other/1"), PutPayload::from_static(b""))
            .await?;

        assert_eq!(vec![3, 12], list_partitions(store.as_ref(), w.prefix()).await?);
        assert_eq!(2, delete_prefix(store.as_ref(), w.prefix()).await?);
        assert!(list_partitions(store.as_ref(), w.prefix()).await?.is_empty());
        assert_eq!(vec![1], list_partitions(store.as_ref(), &Path::from("other")).await?);
        Ok(())
    }

    #[test]
    fn parse_encoding() {
        assert_eq!(
            OutputEncoding::BinaryCell,
            "BINARY_CELL".parse::<OutputEncoding>().unwrap()
        );
        assert!("csv".parse::<OutputEncoding>().is_err());
    }
}
