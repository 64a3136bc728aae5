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

//! Blocked matrix representation: dimensions, block indices, dense tiles and
//! the handle through which a partition job reaches a stored matrix.

use std::fmt::{Display, Formatter};
use std::ops::Range;
use std::sync::Arc;

use crate::error::{MatpartError, Result};
use crate::source::BlockSource;

/// Dimensions of a matrix and of the blocks it is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatrixCharacteristics {
    rows: u64,
    cols: u64,
    block_rows: usize,
    block_cols: usize,
}

impl MatrixCharacteristics {
    /// Creates the characteristics of a `rows x cols` matrix stored in
    /// `block_rows x block_cols` blocks.
    pub fn try_new(rows: u64, cols: u64, block_rows: usize, block_cols: usize) -> Result<Self> {
        if block_rows == 0 || block_cols == 0 {
            return Err(MatpartError::Configuration(format!(
                "block dimensions must be positive, got {block_rows}x{block_cols}"
            )));
        }
        Ok(Self {
            rows,
            cols,
            block_rows,
            block_cols,
        })
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn cols(&self) -> u64 {
        self.cols
    }

    pub fn block_rows(&self) -> usize {
        self.block_rows
    }

    pub fn block_cols(&self) -> usize {
        self.block_cols
    }

    /// Number of block rows, the last one possibly shorter.
    pub fn num_row_blocks(&self) -> u64 {
        self.rows.div_ceil(self.block_rows as u64)
    }

    /// Number of block columns, the last one possibly narrower.
    pub fn num_col_blocks(&self) -> u64 {
        self.cols.div_ceil(self.block_cols as u64)
    }

    pub fn num_cells(&self) -> u64 {
        self.rows * self.cols
    }

    /// Shape of the block at `index`, accounting for edge blocks.
    pub fn block_dims(&self, index: BlockIndex) -> Result<(usize, usize)> {
        if index.row == 0
            || index.col == 0
            || index.row > self.num_row_blocks()
            || index.col > self.num_col_blocks()
        {
            return Err(MatpartError::General(format!(
                "block {index} lies outside the {}x{} block grid",
                self.num_row_blocks(),
                self.num_col_blocks()
            )));
        }
        let rows = edge_length(self.rows, self.block_rows, index.row);
        let cols = edge_length(self.cols, self.block_cols, index.col);
        Ok((rows, cols))
    }

    /// Global 1-based coordinate of the first cell of the block at `index`.
    pub fn block_origin(&self, index: BlockIndex) -> (u64, u64) {
        (
            (index.row - 1) * self.block_rows as u64 + 1,
            (index.col - 1) * self.block_cols as u64 + 1,
        )
    }
}

impl Display for MatrixCharacteristics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{} x {}, blocks {} x {}]",
            self.rows, self.cols, self.block_rows, self.block_cols
        )
    }
}

fn edge_length(dim: u64, block: usize, index: u64) -> usize {
    let start = (index - 1) * block as u64;
    (dim - start).min(block as u64) as usize
}

/// 1-based position of a block in the block grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockIndex {
    pub row: u64,
    pub col: u64,
}

impl BlockIndex {
    pub fn new(row: u64, col: u64) -> Self {
        Self { row, col }
    }
}

impl Display for BlockIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Dense row-major tile of `f64` values.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixBlock {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

impl MatrixBlock {
    pub fn try_new(rows: usize, cols: usize, values: Vec<f64>) -> Result<Self> {
        if values.len() != rows * cols {
            return Err(MatpartError::General(format!(
                "block of {rows}x{cols} needs {} values, got {}",
                rows * cols,
                values.len()
            )));
        }
        Ok(Self { rows, cols, values })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            values: vec![0.0; rows * cols],
        }
    }

    /// Builds a block whose cell `(i, j)` (0-based) is `f(i, j)`.
    pub fn from_fn(rows: usize, cols: usize, f: impl Fn(usize, usize) -> f64) -> Self {
        let mut values = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for j in 0..cols {
                values.push(f(i, j));
            }
        }
        Self { rows, cols, values }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.cols + col]
    }

    pub fn num_nonzeros(&self) -> usize {
        self.values.iter().filter(|v| **v != 0.0).count()
    }

    /// Approximate heap footprint, used for spill accounting.
    pub fn memory_size(&self) -> usize {
        self.values.len() * std::mem::size_of::<f64>()
    }

    /// Copies the cells in `rows x cols` (relative to this block) into a new block.
    pub fn slice(&self, rows: Range<usize>, cols: Range<usize>) -> Result<Self> {
        if rows.end > self.rows || cols.end > self.cols || rows.is_empty() || cols.is_empty() {
            return Err(MatpartError::Internal(format!(
                "invalid slice [{rows:?}, {cols:?}] of a {}x{} block",
                self.rows, self.cols
            )));
        }
        let width = cols.end - cols.start;
        let mut values = Vec::with_capacity((rows.end - rows.start) * width);
        for i in rows.clone() {
            let start = i * self.cols + cols.start;
            values.extend_from_slice(&self.values[start..start + width]);
        }
        Ok(Self {
            rows: rows.end - rows.start,
            cols: width,
            values,
        })
    }
}

/// A reference to a stored matrix: its dimensions and where its blocks come
/// from. The partitioner only ever reads through it.
#[derive(Clone)]
pub struct MatrixHandle {
    characteristics: MatrixCharacteristics,
    source: Arc<dyn BlockSource>,
}

impl MatrixHandle {
    pub fn new(characteristics: MatrixCharacteristics, source: Arc<dyn BlockSource>) -> Self {
        Self {
            characteristics,
            source,
        }
    }

    pub fn characteristics(&self) -> &MatrixCharacteristics {
        &self.characteristics
    }

    pub fn source(&self) -> &Arc<dyn BlockSource> {
        &self.source
    }
}

impl std::fmt::Debug for MatrixHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixHandle")
            .field("characteristics", &self.characteristics)
            .field("source", &self.source.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_grid_with_edges() -> Result<()> {
        let mc = MatrixCharacteristics::try_new(1050, 480, 100, 100)?;
        assert_eq!(11, mc.num_row_blocks());
        assert_eq!(5, mc.num_col_blocks());
        assert_eq!((100, 100), mc.block_dims(BlockIndex::new(1, 1))?);
        assert_eq!((50, 80), mc.block_dims(BlockIndex::new(11, 5))?);
        assert_eq!((1001, 401), mc.block_origin(BlockIndex::new(11, 5)));
        assert!(mc.block_dims(BlockIndex::new(12, 1)).is_err());
        assert!(mc.block_dims(BlockIndex::new(0, 1)).is_err());
        Ok(())
    }

    #[test]
    fn zero_block_size_is_rejected() {
        assert!(MatrixCharacteristics::try_new(10, 10, 0, 5).is_err());
    }

    #[test]
    fn slice_block() -> Result<()> {
        let block = MatrixBlock::from_fn(3, 4, |i, j| (i * 10 + j) as f64);
        let slice = block.slice(1..3, 2..4)?;
        assert_eq!(2, slice.rows());
        assert_eq!(2, slice.cols());
        assert_eq!(&[12.0, 13.0, 22.0, 23.0], slice.values());
        assert!(block.slice(0..4, 0..1).is_err());
        assert!(block.slice(1..1, 0..1).is_err());
        Ok(())
    }

    #[test]
    fn value_count_must_match_shape() {
        assert!(MatrixBlock::try_new(2, 2, vec![1.0; 3]).is_err());
        assert_eq!(1, MatrixBlock::try_new(1, 2, vec![0.0, 3.0]).unwrap().num_nonzeros());
    }
}
