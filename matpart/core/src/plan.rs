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

//! Job inputs, the intermediate shuffle record and job results.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::error::{MatpartError, Result};
use crate::format::PartitionFormat;
use crate::matrix::{BlockIndex, MatrixBlock, MatrixCharacteristics};

/// What the caller asks for: how to cut the matrix and how many workers it
/// would like to use for the shuffle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPlan {
    format: PartitionFormat,
    requested_parallelism: usize,
}

impl PartitionPlan {
    pub fn try_new(format: PartitionFormat, requested_parallelism: usize) -> Result<Self> {
        format.validate()?;
        if requested_parallelism == 0 {
            return Err(MatpartError::Configuration(
                "requested parallelism must be positive".to_string(),
            ));
        }
        Ok(Self {
            format,
            requested_parallelism,
        })
    }

    pub fn format(&self) -> PartitionFormat {
        self.format
    }

    pub fn requested_parallelism(&self) -> usize {
        self.requested_parallelism
    }
}

/// A block, or the part of a block, tagged with the partition it belongs to.
///
/// `row_offset` and `col_offset` locate the payload inside its source block,
/// which together with the block index fixes its position in the matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionRecord {
    pub partition_id: u64,
    pub block: BlockIndex,
    pub row_offset: usize,
    pub col_offset: usize,
    pub payload: MatrixBlock,
}

impl PartitionRecord {
    /// Key that orders records of one partition by matrix position.
    pub fn position(&self) -> (u64, u64, usize, usize) {
        (self.block.row, self.block.col, self.row_offset, self.col_offset)
    }

    /// Global 1-based coordinate of the payload's first cell.
    pub fn origin(&self, mc: &MatrixCharacteristics) -> (u64, u64) {
        let (row, col) = mc.block_origin(self.block);
        (row + self.row_offset as u64, col + self.col_offset as u64)
    }

    pub fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.payload.memory_size()
    }
}

/// Outcome of writing one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionWriteStats {
    pub partition_id: u64,
    pub path: String,
    pub num_records: u64,
    pub num_cells: u64,
    pub num_bytes: u64,
}

impl Display for PartitionWriteStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "partition={}, path={}, records={}, cells={}, bytes={}",
            self.partition_id, self.path, self.num_records, self.num_cells, self.num_bytes
        )
    }
}

/// Outcome of a whole partition job.
#[derive(Debug, Clone)]
pub struct PartitionJobSummary {
    pub job_name: String,
    pub job_id: String,
    pub backend: String,
    pub natural_groups: u64,
    pub parallelism: usize,
    /// Written partitions, sorted by partition id.
    pub partitions: Vec<PartitionWriteStats>,
    pub elapsed: Duration,
}

impl PartitionJobSummary {
    pub fn total_bytes(&self) -> u64 {
        self.partitions.iter().map(|p| p.num_bytes).sum()
    }
}

impl Display for PartitionJobSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] on {}: {} partitions with parallelism {}, {} bytes in {:?}",
            self.job_name,
            self.job_id,
            self.backend,
            self.partitions.len(),
            self.parallelism,
            self.total_bytes(),
            self.elapsed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_validation() {
        assert!(PartitionPlan::try_new(PartitionFormat::RowWise, 0).is_err());
        assert!(PartitionPlan::try_new(PartitionFormat::RowBlockWiseN(0), 4).is_err());
        let plan = PartitionPlan::try_new(PartitionFormat::ColumnBlockWise, 4).unwrap();
        assert_eq!(4, plan.requested_parallelism());
        assert_eq!(PartitionFormat::ColumnBlockWise, plan.format());
    }

    #[test]
    fn record_origin() {
        let mc = MatrixCharacteristics::try_new(20, 20, 10, 10).unwrap();
        let record = PartitionRecord {
            partition_id: 14,
            block: BlockIndex::new(2, 1),
            row_offset: 3,
            col_offset: 0,
            payload: MatrixBlock::zeros(1, 10),
        };
        assert_eq!((14, 1), record.origin(&mc));
    }
}
