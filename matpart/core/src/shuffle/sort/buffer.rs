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

//! In-memory record buffer of one reducer.

use crate::plan::PartitionRecord;

/// Accumulates the records routed to one reducer until they are spilled or
/// handed to the reduce task.
#[derive(Debug)]
pub struct ShuffleBuffer {
    /// Reducer slot this buffer is for
    reducer: usize,
    records: Vec<PartitionRecord>,
    /// Approximate memory held by `records` in bytes
    memory_used: usize,
}

impl ShuffleBuffer {
    pub fn new(reducer: usize) -> Self {
        Self {
            reducer,
            records: Vec::new(),
            memory_used: 0,
        }
    }

    pub fn reducer(&self) -> usize {
        self.reducer
    }

    pub fn memory_used(&self) -> usize {
        self.memory_used
    }

    #[cfg(test)]
    pub fn num_records(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends a record. Returns the new memory usage of the buffer.
    pub fn append(&mut self, record: PartitionRecord) -> usize {
        self.memory_used += record.memory_size();
        self.records.push(record);
        self.memory_used
    }

    /// Takes all records, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<PartitionRecord> {
        self.memory_used = 0;
        std::mem::take(&mut self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{BlockIndex, MatrixBlock};

    fn record(partition_id: u64) -> PartitionRecord {
        PartitionRecord {
            partition_id,
            block: BlockIndex::new(partition_id, 1),
            row_offset: 0,
            col_offset: 0,
            payload: MatrixBlock::zeros(4, 4),
        }
    }

    #[test]
    fn append_and_drain() {
        let mut buffer = ShuffleBuffer::new(2);
        assert!(buffer.is_empty());
        assert_eq!(0, buffer.memory_used());

        let after_first = buffer.append(record(3));
        let after_second = buffer.append(record(5));
        assert!(after_first >= 16 * std::mem::size_of::<f64>());
        assert_eq!(2 * after_first, after_second);
        assert_eq!(2, buffer.num_records());
        assert_eq!(2, buffer.reducer());

        let records = buffer.drain();
        assert_eq!(2, records.len());
        assert!(buffer.is_empty());
        assert_eq!(0, buffer.memory_used());
    }
}
