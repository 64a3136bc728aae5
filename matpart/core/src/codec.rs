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

//! Arrow representations of partition records and matrix cells.
//!
//! Records are stored one per row:
//!
//! ```text
//! partition_id: u64, block_row: u64, block_col: u64,
//! row_offset: u32, col_offset: u32, rows: u32, cols: u32,
//! values: list<f64>   (row-major, rows * cols entries)
//! ```
//!
//! Cells are stored as `(row: u64, col: u64, value: f64)` with global,
//! 1-based coordinates. Both are serialized as LZ4 compressed Arrow IPC
//! streams.

use std::io::{Cursor, Read, Write};
use std::sync::{Arc, LazyLock};

use arrow::array::{
    ArrayRef, AsArray, Float64Array, Float64Builder, ListBuilder, PrimitiveArray,
    UInt32Array, UInt64Array,
};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Field, Float64Type, Schema, SchemaRef, UInt32Type,
    UInt64Type,
};
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::{IpcWriteOptions, StreamWriter};
use arrow::ipc::CompressionType;
use arrow::record_batch::RecordBatch;

use crate::error::{MatpartError, Result};
use crate::matrix::{BlockIndex, MatrixBlock, MatrixCharacteristics};
use crate::plan::PartitionRecord;

static RECORD_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("partition_id", DataType::UInt64, false),
        Field::new("block_row", DataType::UInt64, false),
        Field::new("block_col", DataType::UInt64, false),
        Field::new("row_offset", DataType::UInt32, false),
        Field::new("col_offset", DataType::UInt32, false),
        Field::new("rows", DataType::UInt32, false),
        Field::new("cols", DataType::UInt32, false),
        Field::new(
            "values",
            DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
            false,
        ),
    ]))
});

static CELL_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("row", DataType::UInt64, false),
        Field::new("col", DataType::UInt64, false),
        Field::new("value", DataType::Float64, false),
    ]))
});

/// Schema of encoded partition records.
pub fn record_schema() -> SchemaRef {
    RECORD_SCHEMA.clone()
}

/// Schema of encoded matrix cells.
pub fn cell_schema() -> SchemaRef {
    CELL_SCHEMA.clone()
}

pub fn records_to_batch(records: &[PartitionRecord]) -> Result<RecordBatch> {
    let num_values: usize = records.iter().map(|r| r.payload.values().len()).sum();
    let mut values = ListBuilder::with_capacity(
        Float64Builder::with_capacity(num_values),
        records.len(),
    );
    for record in records {
        values.values().append_slice(record.payload.values());
        values.append(true);
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(UInt64Array::from_iter_values(
            records.iter().map(|r| r.partition_id),
        )),
        Arc::new(UInt64Array::from_iter_values(records.iter().map(|r| r.block.row))),
        Arc::new(UInt64Array::from_iter_values(records.iter().map(|r| r.block.col))),
        Arc::new(UInt32Array::from_iter_values(
            records.iter().map(|r| r.row_offset as u32),
        )),
        Arc::new(UInt32Array::from_iter_values(
            records.iter().map(|r| r.col_offset as u32),
        )),
        Arc::new(UInt32Array::from_iter_values(
            records.iter().map(|r| r.payload.rows() as u32),
        )),
        Arc::new(UInt32Array::from_iter_values(
            records.iter().map(|r| r.payload.cols() as u32),
        )),
        Arc::new(values.finish()),
    ];

    Ok(RecordBatch::try_new(record_schema(), columns)?)
}

pub fn batch_to_records(batch: &RecordBatch) -> Result<Vec<PartitionRecord>> {
    let partition_ids = primitive_column::<UInt64Type>(batch, "partition_id")?;
    let block_rows = primitive_column::<UInt64Type>(batch, "block_row")?;
    let block_cols = primitive_column::<UInt64Type>(batch, "block_col")?;
    let row_offsets = primitive_column::<UInt32Type>(batch, "row_offset")?;
    let col_offsets = primitive_column::<UInt32Type>(batch, "col_offset")?;
    let rows = primitive_column::<UInt32Type>(batch, "rows")?;
    let cols = primitive_column::<UInt32Type>(batch, "cols")?;
    let values = batch
        .column_by_name("values")
        .and_then(|c| c.as_list_opt::<i32>())
        .ok_or_else(|| {
            MatpartError::General("missing or mistyped column values".to_string())
        })?;

    let mut records = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let cell_values = values.value(i);
        let cell_values = cell_values
            .as_primitive_opt::<Float64Type>()
            .ok_or_else(|| {
                MatpartError::General("values must be a list of f64".to_string())
            })?;
        let payload = MatrixBlock::try_new(
            rows.value(i) as usize,
            cols.value(i) as usize,
            cell_values.values().to_vec(),
        )?;
        records.push(PartitionRecord {
            partition_id: partition_ids.value(i),
            block: BlockIndex::new(block_rows.value(i), block_cols.value(i)),
            row_offset: row_offsets.value(i) as usize,
            col_offset: col_offsets.value(i) as usize,
            payload,
        });
    }
    Ok(records)
}

/// Non-zero cells of `records`, in record order then row-major order.
pub fn records_to_cell_batch(
    records: &[PartitionRecord],
    mc: &MatrixCharacteristics,
) -> Result<RecordBatch> {
    let capacity: usize = records.iter().map(|r| r.payload.num_nonzeros()).sum();
    let mut row_ids = Vec::with_capacity(capacity);
    let mut col_ids = Vec::with_capacity(capacity);
    let mut values = Vec::with_capacity(capacity);
    for_each_nonzero(records, mc, |row, col, value| {
        row_ids.push(row);
        col_ids.push(col);
        values.push(value);
    });

    let columns: Vec<ArrayRef> = vec![
        Arc::new(UInt64Array::from(row_ids)),
        Arc::new(UInt64Array::from(col_ids)),
        Arc::new(Float64Array::from(values)),
    ];
    Ok(RecordBatch::try_new(cell_schema(), columns)?)
}

/// Decodes a cell batch into `(row, col, value)` triples.
pub fn cell_batch_to_cells(batch: &RecordBatch) -> Result<Vec<(u64, u64, f64)>> {
    let rows = primitive_column::<UInt64Type>(batch, "row")?;
    let cols = primitive_column::<UInt64Type>(batch, "col")?;
    let values = primitive_column::<Float64Type>(batch, "value")?;
    Ok((0..batch.num_rows())
        .map(|i| (rows.value(i), cols.value(i), values.value(i)))
        .collect())
}

/// Calls `f(row, col, value)` for every non-zero cell, with global 1-based
/// coordinates.
pub fn for_each_nonzero(
    records: &[PartitionRecord],
    mc: &MatrixCharacteristics,
    mut f: impl FnMut(u64, u64, f64),
) {
    for record in records {
        let (origin_row, origin_col) = record.origin(mc);
        let payload = &record.payload;
        for i in 0..payload.rows() {
            for j in 0..payload.cols() {
                let value = payload.get(i, j);
                if value != 0.0 {
                    f(origin_row + i as u64, origin_col + j as u64, value);
                }
            }
        }
    }
}

/// Serializes batches as an LZ4 compressed Arrow IPC stream.
pub fn write_ipc<W: Write>(
    sink: W,
    schema: &SchemaRef,
    batches: &[RecordBatch],
) -> Result<W> {
    let options = IpcWriteOptions::default()
        .try_with_compression(Some(CompressionType::LZ4_FRAME))?;
    let mut writer = StreamWriter::try_new_with_options(sink, schema.as_ref(), options)?;
    for batch in batches {
        writer.write(batch)?;
    }
    writer.finish()?;
    Ok(writer.into_inner()?)
}

/// Reads every batch of an Arrow IPC stream.
pub fn read_ipc<R: Read>(source: R) -> Result<Vec<RecordBatch>> {
    let reader = StreamReader::try_new(source, None)?;
    reader
        .into_iter()
        .map(|batch| batch.map_err(MatpartError::from))
        .collect()
}

pub fn encode_records(records: &[PartitionRecord]) -> Result<Vec<u8>> {
    let batch = records_to_batch(records)?;
    write_ipc(Vec::new(), &record_schema(), &[batch])
}

pub fn decode_records(bytes: &[u8]) -> Result<Vec<PartitionRecord>> {
    let mut records = vec![];
    for batch in read_ipc(Cursor::new(bytes))? {
        records.extend(batch_to_records(&batch)?);
    }
    Ok(records)
}

fn primitive_column<'a, T: ArrowPrimitiveType>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a PrimitiveArray<T>> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_primitive_opt::<T>())
        .ok_or_else(|| MatpartError::General(format!("missing or mistyped column {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(partition_id: u64, block: (u64, u64), offsets: (usize, usize)) -> PartitionRecord {
        PartitionRecord {
            partition_id,
            block: BlockIndex::new(block.0, block.1),
            row_offset: offsets.0,
            col_offset: offsets.1,
            payload: MatrixBlock::from_fn(2, 3, |i, j| {
                if i == j {
                    0.0
                } else {
                    (partition_id * 100 + (i * 3 + j) as u64) as f64
                }
            }),
        }
    }

    #[test]
    fn records_survive_ipc() -> Result<()> {
        let records = vec![record(1, (1, 1), (0, 0)), record(2, (1, 2), (2, 0))];
        let bytes = encode_records(&records)?;
        assert_eq!(records, decode_records(&bytes)?);
        Ok(())
    }

    #[test]
    fn empty_record_set() -> Result<()> {
        let bytes = encode_records(&[])?;
        assert!(decode_records(&bytes)?.is_empty());
        Ok(())
    }

    #[test]
    fn cells_use_global_coordinates() -> Result<()> {
        let mc = MatrixCharacteristics::try_new(10, 10, 4, 4)?;
        let records = vec![record(3, (2, 1), (1, 0))];
        let batch = records_to_cell_batch(&records, &mc)?;
        let cells = cell_batch_to_cells(&batch)?;
        // block (2, 1) starts at row 5, the payload one row further down;
        // the two diagonal zeros are skipped
        assert_eq!(4, cells.len());
        assert_eq!((6, 2, 301.0), cells[0]);
        assert_eq!((7, 3, 305.0), cells[3]);
        Ok(())
    }

    #[test]
    fn wrong_schema_is_rejected() -> Result<()> {
        let mc = MatrixCharacteristics::try_new(10, 10, 4, 4)?;
        let batch = records_to_cell_batch(&[record(1, (1, 1), (0, 0))], &mc)?;
        assert!(batch_to_records(&batch).is_err());
        Ok(())
    }
}
