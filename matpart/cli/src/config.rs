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

//! Command line options of the matpart binary.

use std::collections::HashMap;

use matpart_core::config::PartitionerConfig;
use matpart_core::error::Result;
use matpart_core::matrix::MatrixCharacteristics;

#[derive(clap::Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,
    #[arg(
        long,
        global = true,
        help = "Log dir: a path to save log. This will create a new storage directory at the specified path if it does not already exist."
    )]
    pub log_dir: Option<String>,
    #[arg(
        long,
        global = true,
        default_value_t = false,
        help = "Enable print thread ids and names in log file."
    )]
    pub print_thread_info: bool,
    #[arg(
        long,
        global = true,
        default_value_t = String::from("INFO,matpart_core=INFO"),
        help = "special log level for sub mod. RUST_LOG takes precedence. For example INFO overall with matpart_core=DEBUG"
    )]
    pub log_level_setting: String,
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = LogRotationPolicy::Daily,
        help = "Tracing log rotation policy, possible values: minutely, hourly, daily, never. Default: daily"
    )]
    pub log_rotation_policy: LogRotationPolicy,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Writes a random matrix as binary-block files.
    Generate {
        #[arg(long, help = "Directory the block files are written to")]
        output: String,
        #[command(flatten)]
        shape: ShapeArgs,
        #[arg(
            long,
            default_value_t = 1.0,
            help = "Fraction of non-zero cells. Default: 1.0"
        )]
        sparsity: f64,
        #[arg(long, default_value_t = 42, help = "Random seed. Default: 42")]
        seed: u64,
        #[arg(
            long,
            default_value_t = 16,
            help = "Number of blocks per file. Default: 16"
        )]
        blocks_per_file: usize,
    },
    /// Splits a matrix into row or column partitions.
    Partition {
        #[arg(long, help = "Directory holding the binary-block input files")]
        input: String,
        #[command(flatten)]
        shape: ShapeArgs,
        #[arg(
            long,
            help = "Partition format: ROW_WISE, COLUMN_WISE, ROW_BLOCK_WISE, COLUMN_BLOCK_WISE, ROW_BLOCK_WISE_N, COLUMN_BLOCK_WISE_N"
        )]
        format: String,
        #[arg(long, help = "Rows or columns per partition of the _N formats")]
        n: Option<u64>,
        #[arg(long, help = "Requested number of shuffle workers")]
        parallelism: usize,
        #[arg(
            long,
            help = "Directory the partitions are written to. Existing content is deleted."
        )]
        output: String,
        #[arg(
            long,
            default_value_t = String::from("binary-block"),
            help = "Output encoding: binary-block, binary-cell, text-cell. Default: binary-block"
        )]
        encoding: String,
        #[arg(
            long,
            default_value_t = String::from("hash"),
            help = "Shuffle backend: hash, sort. Default: hash"
        )]
        backend: String,
        #[arg(
            long = "config",
            value_parser = parse_key_value,
            help = "Partitioner setting as key=value, e.g. matpart.shuffle.memory_limit=1048576. May be repeated."
        )]
        settings: Vec<(String, String)>,
    },
}

#[derive(clap::Args, Debug, Clone, Copy)]
pub struct ShapeArgs {
    #[arg(long, help = "Number of matrix rows")]
    pub rows: u64,
    #[arg(long, help = "Number of matrix columns")]
    pub cols: u64,
    #[arg(long, default_value_t = 1000, help = "Rows per block. Default: 1000")]
    pub block_rows: usize,
    #[arg(long, default_value_t = 1000, help = "Columns per block. Default: 1000")]
    pub block_cols: usize,
}

impl ShapeArgs {
    pub fn characteristics(&self) -> Result<MatrixCharacteristics> {
        MatrixCharacteristics::try_new(self.rows, self.cols, self.block_rows, self.block_cols)
    }
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
pub enum LogRotationPolicy {
    Minutely,
    Hourly,
    Daily,
    #[default]
    Never,
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| format!("expected key=value, got '{s}'"))
}

pub fn partitioner_config(settings: &[(String, String)]) -> Result<PartitionerConfig> {
    let settings: HashMap<String, String> = settings.iter().cloned().collect();
    PartitionerConfig::with_settings(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parse_partition_command() {
        let config = Config::try_parse_from([
            "matpart",
            "partition",
            "--input",
            "/tmp/in",
            "--rows",
            "1000",
            "--cols",
            "500",
            "--block-rows",
            "100",
            "--block-cols",
            "100",
            "--format",
            "ROW_BLOCK_WISE",
            "--parallelism",
            "50",
            "--output",
            "/tmp/out",
            "--config",
            "matpart.shuffle.channel_capacity=8",
        ])
        .unwrap();
        match config.command {
            Command::Partition {
                shape,
                parallelism,
                backend,
                settings,
                ..
            } => {
                assert_eq!(10, shape.characteristics().unwrap().num_row_blocks());
                assert_eq!(50, parallelism);
                assert_eq!("hash", backend);
                let config = partitioner_config(&settings).unwrap();
                assert_eq!(8, config.channel_capacity());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_setting() {
        assert!(parse_key_value("matpart.job.name").is_err());
        assert!(partitioner_config(&[("no.such.key".to_string(), "1".to_string())]).is_err());
    }
}
