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

//! Partition formats and the arithmetic that maps cells to partitions.
//!
//! Every format cuts the matrix along a single axis into consecutive groups
//! of `group_size` rows (or columns). Partition ids are 1-based, dense and a
//! pure function of a cell's position, so the groups form a disjoint,
//! exhaustive cover of the matrix. The last group along the axis is shorter
//! when the dimension is not a multiple of the group size.

use std::fmt::{Display, Formatter};
use std::ops::Range;

use crate::error::{MatpartError, Result};
use crate::matrix::{BlockIndex, MatrixCharacteristics};

/// How a matrix is divided into partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionFormat {
    /// One partition per row.
    RowWise,
    /// One partition per column.
    ColumnWise,
    /// One partition per block row.
    RowBlockWise,
    /// One partition per block column.
    ColumnBlockWise,
    /// One partition per `n` rows, independent of the block size.
    RowBlockWiseN(u64),
    /// One partition per `n` columns, independent of the block size.
    ColumnBlockWiseN(u64),
}

/// The axis a format cuts along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Row,
    Column,
}

impl PartitionFormat {
    /// Builds a format from its canonical name, e.g. `ROW_BLOCK_WISE_N`.
    ///
    /// `n` must be given, and positive, for the `_N` formats and only for them.
    pub fn try_new(name: &str, n: Option<u64>) -> Result<Self> {
        let format = match (name.trim().to_ascii_uppercase().as_str(), n) {
            ("ROW_WISE", None) => PartitionFormat::RowWise,
            ("COLUMN_WISE", None) => PartitionFormat::ColumnWise,
            ("ROW_BLOCK_WISE", None) => PartitionFormat::RowBlockWise,
            ("COLUMN_BLOCK_WISE", None) => PartitionFormat::ColumnBlockWise,
            ("ROW_BLOCK_WISE_N", Some(n)) => PartitionFormat::RowBlockWiseN(n),
            ("COLUMN_BLOCK_WISE_N", Some(n)) => PartitionFormat::ColumnBlockWiseN(n),
            ("ROW_BLOCK_WISE_N" | "COLUMN_BLOCK_WISE_N", None) => {
                return Err(MatpartError::Configuration(format!(
                    "partition format {name} requires a granularity n"
                )));
            }
            (
                "ROW_WISE" | "COLUMN_WISE" | "ROW_BLOCK_WISE" | "COLUMN_BLOCK_WISE",
                Some(n),
            ) => {
                return Err(MatpartError::Configuration(format!(
                    "partition format {name} does not take a granularity, got n={n}"
                )));
            }
            _ => {
                return Err(MatpartError::Configuration(format!(
                    "unsupported partition format: {name}"
                )));
            }
        };
        format.validate()?;
        Ok(format)
    }

    /// Canonical name of the format.
    pub fn name(&self) -> &'static str {
        match self {
            PartitionFormat::RowWise => "ROW_WISE",
            PartitionFormat::ColumnWise => "COLUMN_WISE",
            PartitionFormat::RowBlockWise => "ROW_BLOCK_WISE",
            PartitionFormat::ColumnBlockWise => "COLUMN_BLOCK_WISE",
            PartitionFormat::RowBlockWiseN(_) => "ROW_BLOCK_WISE_N",
            PartitionFormat::ColumnBlockWiseN(_) => "COLUMN_BLOCK_WISE_N",
        }
    }

    pub fn axis(&self) -> Axis {
        match self {
            PartitionFormat::RowWise
            | PartitionFormat::RowBlockWise
            | PartitionFormat::RowBlockWiseN(_) => Axis::Row,
            PartitionFormat::ColumnWise
            | PartitionFormat::ColumnBlockWise
            | PartitionFormat::ColumnBlockWiseN(_) => Axis::Column,
        }
    }

    /// Rejects a zero granularity on the `_N` formats.
    pub fn validate(&self) -> Result<()> {
        match self {
            PartitionFormat::RowBlockWiseN(0) | PartitionFormat::ColumnBlockWiseN(0) => {
                Err(MatpartError::Configuration(format!(
                    "partition format {} requires n > 0",
                    self.name()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Number of rows (or columns) that make up one partition.
    pub fn group_size(&self, mc: &MatrixCharacteristics) -> Result<u64> {
        self.validate()?;
        Ok(match self {
            PartitionFormat::RowWise | PartitionFormat::ColumnWise => 1,
            PartitionFormat::RowBlockWise => mc.block_rows() as u64,
            PartitionFormat::ColumnBlockWise => mc.block_cols() as u64,
            PartitionFormat::RowBlockWiseN(n) | PartitionFormat::ColumnBlockWiseN(n) => *n,
        })
    }

    /// Number of partitions the format produces for a matrix.
    pub fn natural_group_count(&self, mc: &MatrixCharacteristics) -> Result<u64> {
        let dim = self.axis_length(mc);
        if dim == 0 {
            return Err(MatpartError::Configuration(format!(
                "partition format {self} on matrix {mc} yields no partitions"
            )));
        }
        Ok(dim.div_ceil(self.group_size(mc)?))
    }

    /// Every partition the block at `index` contributes to, with the part of
    /// the block (relative row and column ranges) that belongs to it.
    pub fn partition_slices(
        &self,
        mc: &MatrixCharacteristics,
        index: BlockIndex,
    ) -> Result<Vec<PartitionSlice>> {
        let (rows, cols) = mc.block_dims(index)?;
        let group = self.group_size(mc)?;
        let (origin_row, origin_col) = mc.block_origin(index);

        let (start, length) = match self.axis() {
            Axis::Row => (origin_row - 1, rows),
            Axis::Column => (origin_col - 1, cols),
        };

        let mut slices = Vec::with_capacity(length.min(16));
        let mut offset = 0;
        while offset < length {
            let global = start + offset as u64;
            let partition_id = global / group + 1;
            let group_end = partition_id * group;
            let end = ((group_end - start) as usize).min(length);
            let (row_range, col_range) = match self.axis() {
                Axis::Row => (offset..end, 0..cols),
                Axis::Column => (0..rows, offset..end),
            };
            slices.push(PartitionSlice {
                partition_id,
                rows: row_range,
                cols: col_range,
            });
            offset = end;
        }
        Ok(slices)
    }

    fn axis_length(&self, mc: &MatrixCharacteristics) -> u64 {
        match self.axis() {
            Axis::Row => mc.rows(),
            Axis::Column => mc.cols(),
        }
    }
}

impl Display for PartitionFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionFormat::RowBlockWiseN(n) | PartitionFormat::ColumnBlockWiseN(n) => {
                write!(f, "{}(n={n})", self.name())
            }
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// The part of a block that falls into one partition. Ranges are relative to
/// the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSlice {
    pub partition_id: u64,
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

impl PartitionSlice {
    /// Whether the slice spans the whole `rows x cols` block.
    pub fn covers(&self, rows: usize, cols: usize) -> bool {
        self.rows == (0..rows) && self.cols == (0..cols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mc(rows: u64, cols: u64, br: usize, bc: usize) -> MatrixCharacteristics {
        MatrixCharacteristics::try_new(rows, cols, br, bc).unwrap()
    }

    #[test]
    fn natural_group_counts() -> Result<()> {
        let cases = vec![
            // exact divisibility
            (PartitionFormat::RowWise, mc(1000, 500, 100, 100), 1000),
            (PartitionFormat::ColumnWise, mc(1000, 500, 100, 100), 500),
            (PartitionFormat::RowBlockWise, mc(1000, 500, 100, 100), 10),
            (PartitionFormat::ColumnBlockWise, mc(1000, 500, 100, 100), 5),
            (PartitionFormat::RowBlockWiseN(250), mc(1000, 500, 100, 100), 4),
            (PartitionFormat::ColumnBlockWiseN(50), mc(1000, 500, 100, 100), 10),
            // remainders form a shorter last group
            (PartitionFormat::RowBlockWise, mc(1050, 480, 100, 100), 11),
            (PartitionFormat::ColumnBlockWise, mc(1050, 480, 100, 100), 5),
            (PartitionFormat::RowBlockWiseN(7), mc(20, 3, 4, 3), 3),
            (PartitionFormat::ColumnBlockWiseN(3), mc(2, 10, 2, 4), 4),
            // n larger than the dimension gives a single group
            (PartitionFormat::RowBlockWiseN(100), mc(20, 3, 4, 3), 1),
        ];
        for (format, mc, expected) in cases {
            assert_eq!(
                expected,
                format.natural_group_count(&mc)?,
                "{format} on {mc}"
            );
        }
        Ok(())
    }

    #[test]
    fn degenerate_inputs_are_rejected() {
        assert!(PartitionFormat::RowWise
            .natural_group_count(&mc(0, 5, 2, 2))
            .is_err());
        assert!(PartitionFormat::ColumnBlockWise
            .natural_group_count(&mc(5, 0, 2, 2))
            .is_err());
        assert!(PartitionFormat::RowBlockWiseN(0)
            .natural_group_count(&mc(5, 5, 2, 2))
            .is_err());
    }

    #[test]
    fn parse_formats() -> Result<()> {
        assert_eq!(
            PartitionFormat::RowBlockWise,
            PartitionFormat::try_new("ROW_BLOCK_WISE", None)?
        );
        assert_eq!(
            PartitionFormat::ColumnBlockWiseN(8),
            PartitionFormat::try_new("column_block_wise_n", Some(8))?
        );
        assert!(PartitionFormat::try_new("ROW_BLOCK_WISE_N", None).is_err());
        assert!(PartitionFormat::try_new("ROW_BLOCK_WISE_N", Some(0)).is_err());
        assert!(PartitionFormat::try_new("ROW_WISE", Some(3)).is_err());
        assert!(PartitionFormat::try_new("DIAGONAL", None).is_err());
        assert_eq!(
            "ROW_BLOCK_WISE_N(n=7)",
            PartitionFormat::RowBlockWiseN(7).to_string()
        );
        Ok(())
    }

    #[test]
    fn row_wise_slices_every_row() -> Result<()> {
        let mc = mc(10, 5, 4, 5);
        let slices = PartitionFormat::RowWise.partition_slices(&mc, BlockIndex::new(2, 1))?;
        assert_eq!(4, slices.len());
        assert_eq!(5, slices[0].partition_id);
        assert_eq!(0..1, slices[0].rows);
        assert_eq!(0..5, slices[0].cols);
        assert_eq!(8, slices[3].partition_id);
        assert_eq!(3..4, slices[3].rows);

        // edge block holds rows 9 and 10 only
        let slices = PartitionFormat::RowWise.partition_slices(&mc, BlockIndex::new(3, 1))?;
        let ids: Vec<_> = slices.iter().map(|s| s.partition_id).collect();
        assert_eq!(vec![9, 10], ids);
        Ok(())
    }

    #[test]
    fn aligned_block_maps_to_one_partition() -> Result<()> {
        let mc = mc(1000, 500, 100, 100);
        let slices =
            PartitionFormat::RowBlockWise.partition_slices(&mc, BlockIndex::new(3, 4))?;
        assert_eq!(1, slices.len());
        assert_eq!(3, slices[0].partition_id);
        assert!(slices[0].covers(100, 100));
        Ok(())
    }

    #[test]
    fn straddling_block_is_split() -> Result<()> {
        // rows 5..=8 of a 20-row matrix, groups of 7: rows 5-7 -> 1, row 8 -> 2
        let mc = mc(20, 3, 4, 3);
        let slices =
            PartitionFormat::RowBlockWiseN(7).partition_slices(&mc, BlockIndex::new(2, 1))?;
        assert_eq!(
            vec![
                PartitionSlice {
                    partition_id: 1,
                    rows: 0..3,
                    cols: 0..3
                },
                PartitionSlice {
                    partition_id: 2,
                    rows: 3..4,
                    cols: 0..3
                },
            ],
            slices
        );

        let mc = mc_cols();
        let slices =
            PartitionFormat::ColumnBlockWiseN(3).partition_slices(&mc, BlockIndex::new(1, 2))?;
        let ranges: Vec<_> = slices.iter().map(|s| (s.partition_id, s.cols.clone())).collect();
        assert_eq!(vec![(2, 0..2), (3, 2..4)], ranges);
        Ok(())
    }

    fn mc_cols() -> MatrixCharacteristics {
        mc(2, 10, 2, 4)
    }
}
