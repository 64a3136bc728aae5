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

//! Spill manager for the sort shuffle.
//!
//! Reducer buffers that do not fit in memory are written to local disk as
//! LZ4 compressed Arrow IPC files and read back by the reduce tasks.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::codec;
use crate::error::Result;
use crate::plan::PartitionRecord;

/// Tracks the spill files of one job.
#[derive(Debug)]
pub struct SpillManager {
    /// Base directory for spill files
    spill_dir: PathBuf,
    /// reducer -> spill files, in spill order
    spill_files: HashMap<usize, Vec<PathBuf>>,
    /// Counter for generating unique spill file names
    spill_counter: usize,
    total_spills: usize,
    total_bytes_spilled: u64,
}

impl SpillManager {
    /// Creates `<work_dir>/<job_id>/spill`.
    pub fn new(work_dir: &Path, job_id: &str) -> Result<Self> {
        let spill_dir = work_dir.join(job_id).join("spill");
        std::fs::create_dir_all(&spill_dir)?;

        Ok(Self {
            spill_dir,
            spill_files: HashMap::new(),
            spill_counter: 0,
            total_spills: 0,
            total_bytes_spilled: 0,
        })
    }

    pub fn spill_dir(&self) -> &Path {
        &self.spill_dir
    }

    /// Spills records of a reducer to disk. Returns the number of bytes
    /// written.
    pub fn spill(&mut self, reducer: usize, records: Vec<PartitionRecord>) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let spill_path = self.next_spill_path(reducer);
        debug!(
            "Spilling {} records of reducer {reducer} to {spill_path:?}",
            records.len()
        );

        let batch = codec::records_to_batch(&records)?;
        let file = BufWriter::new(File::create(&spill_path)?);
        let mut file = codec::write_ipc(file, &codec::record_schema(), &[batch])?;
        file.flush()?;

        let bytes_written = std::fs::metadata(&spill_path)?.len();
        self.spill_files
            .entry(reducer)
            .or_default()
            .push(spill_path);
        self.total_spills += 1;
        self.total_bytes_spilled += bytes_written;

        Ok(bytes_written)
    }

    /// Hands the spill files of a reducer to its reduce task. The files stay
    /// on disk until [`SpillManager::cleanup`].
    pub fn take_spill_files(&mut self, reducer: usize) -> Vec<PathBuf> {
        self.spill_files.remove(&reducer).unwrap_or_default()
    }

    #[cfg(test)]
    pub fn has_spill_files(&self, reducer: usize) -> bool {
        self.spill_files
            .get(&reducer)
            .is_some_and(|files| !files.is_empty())
    }

    /// Removes the spill directory of the job.
    pub fn cleanup(&self) -> Result<()> {
        // the job directory only ever holds the spill directory
        let job_dir = self.spill_dir.parent().unwrap_or(&self.spill_dir);
        if job_dir.exists() {
            std::fs::remove_dir_all(job_dir)?;
        }
        Ok(())
    }

    pub fn total_spills(&self) -> usize {
        self.total_spills
    }

    pub fn total_bytes_spilled(&self) -> u64 {
        self.total_bytes_spilled
    }

    fn next_spill_path(&mut self, reducer: usize) -> PathBuf {
        let path = self
            .spill_dir
            .join(format!("reducer-{reducer}-spill-{}.arrow", self.spill_counter));
        self.spill_counter += 1;
        path
    }
}

impl Drop for SpillManager {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            debug!("Failed to cleanup spill files: {e:?}");
        }
    }
}

/// Reads back all records of a spill file.
pub fn read_spill_file(path: &Path) -> Result<Vec<PartitionRecord>> {
    let file = BufReader::new(File::open(path)?);
    let mut records = vec![];
    for batch in codec::read_ipc(file)? {
        records.extend(codec::batch_to_records(&batch)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{BlockIndex, MatrixBlock};
    use tempfile::TempDir;

    fn records(partition_id: u64, n: u64) -> Vec<PartitionRecord> {
        (1..=n)
            .map(|col| PartitionRecord {
                partition_id,
                block: BlockIndex::new(partition_id, col),
                row_offset: 0,
                col_offset: 0,
                payload: MatrixBlock::from_fn(2, 2, |i, j| (col as usize + i + j) as f64),
            })
            .collect()
    }

    #[test]
    fn spill_and_read_back() -> Result<()> {
        let work_dir = TempDir::new()?;
        let mut manager = SpillManager::new(work_dir.path(), "job-1")?;

        assert_eq!(0, manager.spill(0, vec![])?);
        assert!(manager.spill(0, records(1, 3))? > 0);
        assert!(manager.spill(0, records(3, 2))? > 0);
        assert!(manager.spill(1, records(2, 1))? > 0);
        assert_eq!(3, manager.total_spills());
        assert!(manager.has_spill_files(0));

        let files = manager.take_spill_files(0);
        assert_eq!(2, files.len());
        assert!(!manager.has_spill_files(0));
        assert_eq!(records(1, 3), read_spill_file(&files[0])?);
        assert_eq!(records(3, 2), read_spill_file(&files[1])?);
        Ok(())
    }

    #[test]
    fn cleanup_removes_job_directory() -> Result<()> {
        let work_dir = TempDir::new()?;
        let job_dir = work_dir.path().join("job-2");
        {
            let mut manager = SpillManager::new(work_dir.path(), "job-2")?;
            manager.spill(4, records(5, 1))?;
            assert!(job_dir.exists());
        }
        assert!(!job_dir.exists());
        Ok(())
    }
}
