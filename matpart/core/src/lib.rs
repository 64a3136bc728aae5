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

#![doc = include_str!("../README.md")]

/// The current version of Matpart, derived from the Cargo package version.
pub const MATPART_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Arrow encodings of partition records and matrix cells.
pub mod codec;
/// Configuration options and settings for partition jobs.
pub mod config;
/// Error types and result definitions for Matpart operations.
pub mod error;
/// Expansion of stored blocks into partition-tagged records.
pub mod fan_out;
/// Partition formats and the partition id of every cell.
pub mod format;
/// Writing and reading partitions in the output store.
pub mod materialize;
/// Matrix shapes, blocks and handles.
pub mod matrix;
/// Degree of parallelism of the shuffle.
pub mod parallelism;
/// The partition job facade.
pub mod partitioner;
/// Job plans, shuffle records and job summaries.
pub mod plan;
/// Shuffle backends grouping records by partition id.
pub mod shuffle;
/// Block sources of input matrices.
pub mod source;
/// Statistics sinks for completed jobs.
pub mod stats;
/// Matrix generators and failing sources.
pub mod test_utils;

pub use error::{MatpartError, Result};
pub use format::PartitionFormat;
pub use materialize::OutputEncoding;
pub use matrix::{BlockIndex, MatrixBlock, MatrixCharacteristics, MatrixHandle};
pub use partitioner::DataPartitioner;
pub use plan::{PartitionJobSummary, PartitionPlan};
