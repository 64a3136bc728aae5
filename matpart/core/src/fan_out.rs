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

//! Fan-out: expands each stored block into partition-tagged records.

use log::trace;

use crate::error::{MatpartError, Result};
use crate::format::{Axis, PartitionFormat};
use crate::matrix::{BlockIndex, MatrixBlock, MatrixCharacteristics};
use crate::plan::PartitionRecord;

/// Emits one record per partition the block intersects.
///
/// A block that lies entirely inside one partition is moved as is; a block
/// crossing partition boundaries is sliced so each cell lands in exactly one
/// record.
pub fn fan_out_block(
    format: PartitionFormat,
    mc: &MatrixCharacteristics,
    index: BlockIndex,
    block: MatrixBlock,
) -> Result<Vec<PartitionRecord>> {
    let (rows, cols) = mc.block_dims(index)?;
    if block.rows() != rows || block.cols() != cols {
        return Err(MatpartError::General(format!(
            "block {index} of matrix {mc} should be {rows}x{cols} but is {}x{}",
            block.rows(),
            block.cols()
        )));
    }

    let slices = format.partition_slices(mc, index)?;
    trace!("Block {index} fans out to {} partitions", slices.len());

    if let [slice] = slices.as_slice() {
        if slice.covers(rows, cols) {
            return Ok(vec![PartitionRecord {
                partition_id: slice.partition_id,
                block: index,
                row_offset: 0,
                col_offset: 0,
                payload: block,
            }]);
        }
    }

    slices
        .into_iter()
        .map(|slice| {
            Ok(PartitionRecord {
                partition_id: slice.partition_id,
                block: index,
                row_offset: slice.rows.start,
                col_offset: slice.cols.start,
                payload: block.slice(slice.rows, slice.cols)?,
            })
        })
        .collect()
}

/// Zero-filled records covering partition `partition_id`, used when the
/// input stores none of the blocks the partition is made of.
pub fn zero_partition_records(
    format: PartitionFormat,
    mc: &MatrixCharacteristics,
    partition_id: u64,
) -> Result<Vec<PartitionRecord>> {
    let natural_groups = format.natural_group_count(mc)?;
    if partition_id == 0 || partition_id > natural_groups {
        return Err(MatpartError::Internal(format!(
            "partition {partition_id} is outside 1..={natural_groups}"
        )));
    }
    let group = format.group_size(mc)?;
    let (length, block_length, other_blocks) = match format.axis() {
        Axis::Row => (mc.rows(), mc.block_rows() as u64, mc.num_col_blocks()),
        Axis::Column => (mc.cols(), mc.block_cols() as u64, mc.num_row_blocks()),
    };
    // 0-based first and last row (or column) of the partition
    let first = (partition_id - 1) * group;
    let last = (partition_id * group).min(length) - 1;

    let mut records = vec![];
    for axis_block in first / block_length + 1..=last / block_length + 1 {
        for other in 1..=other_blocks {
            let index = match format.axis() {
                Axis::Row => BlockIndex::new(axis_block, other),
                Axis::Column => BlockIndex::new(other, axis_block),
            };
            let (rows, cols) = mc.block_dims(index)?;
            records.extend(
                fan_out_block(format, mc, index, MatrixBlock::zeros(rows, cols))?
                    .into_iter()
                    .filter(|r| r.partition_id == partition_id),
            );
        }
    }
    Ok(records)
}
