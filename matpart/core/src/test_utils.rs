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

//! Matrix generators, failing sources and failing stores for tests and the
//! CLI.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use object_store::path::Path;
use object_store::{
    GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, ObjectStore,
    PutMultipartOpts, PutOptions, PutPayload, PutResult,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{MatpartError, Result};
use crate::matrix::{BlockIndex, MatrixBlock, MatrixCharacteristics};
use crate::source::{BlockSource, BlockStream};

/// All blocks of a matrix whose cell at global 1-based `(row, col)` is
/// `f(row, col)`, in row-major block order.
pub fn matrix_blocks(
    mc: &MatrixCharacteristics,
    f: impl Fn(u64, u64) -> f64,
) -> Result<Vec<(BlockIndex, MatrixBlock)>> {
    let mut blocks = vec![];
    for block_row in 1..=mc.num_row_blocks() {
        for block_col in 1..=mc.num_col_blocks() {
            let index = BlockIndex::new(block_row, block_col);
            let (rows, cols) = mc.block_dims(index)?;
            let (origin_row, origin_col) = mc.block_origin(index);
            let block = MatrixBlock::from_fn(rows, cols, |i, j| {
                f(origin_row + i as u64, origin_col + j as u64)
            });
            blocks.push((index, block));
        }
    }
    Ok(blocks)
}

/// Random matrix with roughly `sparsity` of its cells non-zero, values in
/// `[-1, 1)`. The same seed yields the same matrix.
pub fn random_blocks(
    mc: &MatrixCharacteristics,
    sparsity: f64,
    seed: u64,
) -> Result<Vec<(BlockIndex, MatrixBlock)>> {
    if !(0.0..=1.0).contains(&sparsity) {
        return Err(MatpartError::Configuration(format!(
            "sparsity must be within [0, 1], got {sparsity}"
        )));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut blocks = vec![];
    for block_row in 1..=mc.num_row_blocks() {
        for block_col in 1..=mc.num_col_blocks() {
            let index = BlockIndex::new(block_row, block_col);
            let (rows, cols) = mc.block_dims(index)?;
            let values = (0..rows * cols)
                .map(|_| {
                    if rng.random_bool(sparsity) {
                        rng.random_range(-1.0..1.0)
                    } else {
                        0.0
                    }
                })
                .collect();
            blocks.push((index, MatrixBlock::try_new(rows, cols, values)?));
        }
    }
    Ok(blocks)
}

/// Yields `good` blocks, then fails.
#[derive(Debug, Clone)]
pub struct FailingBlockSource {
    good: Vec<(BlockIndex, MatrixBlock)>,
    message: String,
}

impl FailingBlockSource {
    pub fn new(good: Vec<(BlockIndex, MatrixBlock)>, message: impl Into<String>) -> Self {
        Self {
            good,
            message: message.into(),
        }
    }
}

#[async_trait]
impl BlockSource for FailingBlockSource {
    fn name(&self) -> &str {
        "failing"
    }

    async fn scan(&self) -> Result<BlockStream> {
        let failure = MatpartError::General(self.message.clone());
        Ok(stream::iter(self.good.clone().into_iter().map(Ok))
            .chain(stream::once(async move { Err(failure) }))
            .boxed())
    }
}

/// Object store that rejects every `put` whose final path segment is
/// `failing_name`, delegating everything else to `inner`.
#[derive(Debug)]
pub struct FailingObjectStore {
    inner: Arc<dyn ObjectStore>,
    failing_name: String,
}

impl FailingObjectStore {
    pub fn new(inner: Arc<dyn ObjectStore>, failing_name: impl Into<String>) -> Self {
        Self {
            inner,
            failing_name: failing_name.into(),
        }
    }
}

impl Display for FailingObjectStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "FailingObjectStore({}, {})", self.inner, self.failing_name)
    }
}

#[async_trait]
impl ObjectStore for FailingObjectStore {
    async fn put_opts(
        &self,
        location: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> object_store::Result<PutResult> {
        if location.filename() == Some(self.failing_name.as_str()) {
            return Err(object_store::Error::Generic {
                store: "FailingObjectStore",
                source: format!("rejected put of {location}").into(),
            });
        }
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &Path,
        opts: PutMultipartOpts,
    ) -> object_store::Result<Box<dyn MultipartUpload>> {
        self.inner.put_multipart_opts(location, opts).await
    }

    async fn get_opts(
        &self,
        location: &Path,
        options: GetOptions,
    ) -> object_store::Result<GetResult> {
        self.inner.get_opts(location, options).await
    }

    async fn delete(&self, location: &Path) -> object_store::Result<()> {
        self.inner.delete(location).await
    }

    fn list(&self, prefix: Option<&Path>) -> BoxStream<'static, object_store::Result<ObjectMeta>> {
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(
        &self,
        prefix: Option<&Path>,
    ) -> object_store::Result<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> object_store::Result<()> {
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> object_store::Result<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_blocks_cover_the_matrix() -> Result<()> {
        let mc = MatrixCharacteristics::try_new(7, 5, 3, 2)?;
        let blocks = matrix_blocks(&mc, |r, c| (r * 10 + c) as f64)?;
        assert_eq!(9, blocks.len());
        let cells: usize = blocks.iter().map(|(_, b)| b.values().len()).sum();
        assert_eq!(35, cells);
        // block (3, 3) holds row 7, column 5
        let (index, last) = &blocks[8];
        assert_eq!(BlockIndex::new(3, 3), *index);
        assert_eq!(75.0, last.get(0, 0));
        Ok(())
    }

    #[tokio::test]
    async fn failing_store_rejects_one_name() -> Result<()> {
        let store = FailingObjectStore::new(Arc::new(object_store::memory::InMemory::new()), "2");
        store.put(&Path::from("out/1"), PutPayload::from_static(b"a")).await?;
        assert!(store.put(&Path::from("out/2"), PutPayload::from_static(b"b")).await.is_err());
        assert!(store.put(&Path::from("out/12"), PutPayload::from_static(b"c")).await.is_ok());
        Ok(())
    }

    #[test]
    fn random_blocks_are_reproducible() -> Result<()> {
        let mc = MatrixCharacteristics::try_new(20, 20, 8, 8)?;
        assert_eq!(random_blocks(&mc, 0.3, 7)?, random_blocks(&mc, 0.3, 7)?);
        assert!(random_blocks(&mc, 0.0, 7)?
            .iter()
            .all(|(_, b)| b.num_nonzeros() == 0));
        assert!(random_blocks(&mc, 1.5, 7).is_err());
        Ok(())
    }
}
