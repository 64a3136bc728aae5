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

//! Matpart command line binary.

mod config;

use std::sync::Arc;
use std::{env, io};

use clap::Parser;
use log::info;
use matpart_core::error::Result;
use matpart_core::MATPART_VERSION;
use matpart_core::format::PartitionFormat;
use matpart_core::materialize::OutputEncoding;
use matpart_core::matrix::MatrixHandle;
use matpart_core::partitioner::DataPartitioner;
use matpart_core::plan::PartitionPlan;
use matpart_core::shuffle::backend_from_name;
use matpart_core::source::{write_blocks, ObjectStoreBlockSource};
use matpart_core::test_utils::random_blocks;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::ObjectStore;
use tracing_subscriber::EnvFilter;

use crate::config::{partitioner_config, Command, Config, LogRotationPolicy};

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()?;

    runtime.block_on(inner())
}

async fn inner() -> Result<()> {
    // parse options
    let opt = Config::parse();

    let rust_log = env::var(EnvFilter::DEFAULT_ENV);
    let log_filter = EnvFilter::new(rust_log.unwrap_or(opt.log_level_setting.clone()));

    let tracing = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_thread_names(opt.print_thread_info)
        .with_thread_ids(opt.print_thread_info)
        .with_writer(io::stderr)
        .with_env_filter(log_filter);

    // File layer
    if let Some(log_dir) = &opt.log_dir {
        let log_file_name_prefix = "matpart";
        let log_file = match opt.log_rotation_policy {
            LogRotationPolicy::Minutely => {
                tracing_appender::rolling::minutely(log_dir, log_file_name_prefix)
            }
            LogRotationPolicy::Hourly => {
                tracing_appender::rolling::hourly(log_dir, log_file_name_prefix)
            }
            LogRotationPolicy::Daily => {
                tracing_appender::rolling::daily(log_dir, log_file_name_prefix)
            }
            LogRotationPolicy::Never => {
                tracing_appender::rolling::never(log_dir, log_file_name_prefix)
            }
        };
        tracing.with_writer(log_file).init();
    } else {
        tracing.init();
    }

    match opt.command {
        Command::Generate {
            output,
            shape,
            sparsity,
            seed,
            blocks_per_file,
        } => {
            let mc = shape.characteristics()?;
            let store = local_store(&output)?;
            let blocks = random_blocks(&mc, sparsity, seed)?;
            let files =
                write_blocks(store.as_ref(), &Path::default(), blocks, blocks_per_file)
                    .await?;
            println!("Wrote {mc} as {files} files to {output}");
        }
        Command::Partition {
            input,
            shape,
            format,
            n,
            parallelism,
            output,
            encoding,
            backend,
            settings,
        } => {
            let mc = shape.characteristics()?;
            let format = PartitionFormat::try_new(&format, n)?;
            let plan = PartitionPlan::try_new(format, parallelism)?;
            let encoding: OutputEncoding = encoding.parse()?;
            let config = partitioner_config(&settings)?;

            let source = ObjectStoreBlockSource::new(local_store(&input)?, Path::default());
            let handle = MatrixHandle::new(mc, Arc::new(source));
            let partitioner =
                DataPartitioner::new(backend_from_name(&backend)?, local_store(&output)?)
                    .with_config(config);
            info!("Matpart v{MATPART_VERSION} partitioning {input} into {output}");

            let summary = partitioner
                .partition(&handle, &plan, &Path::default(), encoding)
                .await?;
            info!(
                "Wrote {} partitions with parallelism {}",
                summary.partitions.len(),
                summary.parallelism
            );
            println!("{summary}");
            for partition in &summary.partitions {
                println!("  {partition}");
            }
        }
    }

    Ok(())
}

/// Object store rooted at `dir`, created if missing.
fn local_store(dir: &str) -> Result<Arc<dyn ObjectStore>> {
    std::fs::create_dir_all(dir)?;
    Ok(Arc::new(LocalFileSystem::new_with_prefix(dir)?))
}
