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

//! Matpart configuration

use std::collections::HashMap;
use std::path::PathBuf;
use std::result;
use std::sync::LazyLock;

use arrow::datatypes::DataType;

use crate::error::{MatpartError, Result};

/// Name reported to the statistics sink for every partition job.
pub const MATPART_JOB_NAME: &str = "matpart.job.name";
/// Maximum number of blocks fanned out concurrently.
pub const MATPART_FANOUT_CONCURRENCY: &str = "matpart.fanout.concurrency";
/// Capacity of each channel feeding a grouping worker.
pub const MATPART_SHUFFLE_CHANNEL_CAPACITY: &str = "matpart.shuffle.channel_capacity";
/// Total memory for buffered shuffle records before spilling (sort shuffle).
pub const MATPART_SHUFFLE_MEMORY_LIMIT: &str = "matpart.shuffle.memory_limit";
/// Fraction of the memory limit at which buffers are spilled (sort shuffle).
pub const MATPART_SHUFFLE_SPILL_THRESHOLD: &str = "matpart.shuffle.spill_threshold";
/// Local directory for spill files (sort shuffle).
pub const MATPART_SHUFFLE_WORK_DIR: &str = "matpart.shuffle.work_dir";

pub type ParseResult<T> = result::Result<T, String>;

static CONFIG_ENTRIES: LazyLock<HashMap<String, ConfigEntry>> = LazyLock::new(|| {
    let entries = vec![
        ConfigEntry::new(MATPART_JOB_NAME.to_string(),
                         "Job name recorded with the statistics of every partition job".to_string(),
                         DataType::Utf8, Some("ParFor-DPSP".to_string())),
        ConfigEntry::new(MATPART_FANOUT_CONCURRENCY.to_string(),
                         "Number of blocks fanned out concurrently".to_string(),
                         DataType::UInt64, Some(std::thread::available_parallelism().map(|v| v.get()).unwrap_or(1).to_string())),
        ConfigEntry::new(MATPART_SHUFFLE_CHANNEL_CAPACITY.to_string(),
                         "Number of records buffered in front of each grouping worker".to_string(),
                         DataType::UInt64, Some(1024.to_string())),
        ConfigEntry::new(MATPART_SHUFFLE_MEMORY_LIMIT.to_string(),
                         "Memory for buffered shuffle records in bytes before spilling".to_string(),
                         DataType::UInt64, Some((256 * 1024 * 1024).to_string())),
        ConfigEntry::new(MATPART_SHUFFLE_SPILL_THRESHOLD.to_string(),
                         "Fraction of the memory limit at which the largest buffers are spilled".to_string(),
                         DataType::Float64, Some(0.8.to_string())),
        ConfigEntry::new(MATPART_SHUFFLE_WORK_DIR.to_string(),
                         "Directory for shuffle spill files".to_string(),
                         DataType::Utf8, None),
    ];
    entries
        .into_iter()
        .map(|e| (e.name.clone(), e))
        .collect::<HashMap<_, _>>()
});

/// Configuration option meta-data
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    name: String,
    description: String,
    data_type: DataType,
    default_value: Option<String>,
}

impl ConfigEntry {
    fn new(
        name: String,
        description: String,
        data_type: DataType,
        default_value: Option<String>,
    ) -> Self {
        Self {
            name,
            description,
            data_type,
            default_value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Partitioner configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionerConfig {
    /// Settings stored in map for easy serde
    settings: HashMap<String, String>,
}

impl PartitionerConfig {
    /// Create a new configuration based on key-value pairs
    pub fn with_settings(settings: HashMap<String, String>) -> Result<Self> {
        for name in settings.keys() {
            if !Self::valid_entries().contains_key(name) {
                return Err(MatpartError::Configuration(format!(
                    "configuration key `{name}` does not exist"
                )));
            }
        }

        for (name, entry) in Self::valid_entries() {
            if let Some(v) = settings.get(name) {
                // validate that we can parse the user-supplied value
                Self::parse_value(v.as_str(), entry.data_type.clone()).map_err(|e| MatpartError::Configuration(format!("Failed to parse user-supplied value '{v}' for configuration setting '{name}' ({}): {e}", entry.description())))?;
            } else if let Some(v) = entry.default_value.clone() {
                Self::parse_value(v.as_str(), entry.data_type.clone()).map_err(|e| MatpartError::Configuration(format!("Failed to parse default value '{v}' for configuration setting '{name}': {e}")))?;
            }
        }

        let config = Self { settings };
        if config.fanout_concurrency() == 0 || config.channel_capacity() == 0 {
            return Err(MatpartError::Configuration(
                "fan-out concurrency and channel capacity must be positive".to_string(),
            ));
        }
        let threshold = config.spill_threshold();
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(MatpartError::Configuration(format!(
                "spill threshold must be in (0, 1], got {threshold}"
            )));
        }
        Ok(config)
    }

    /// Returns a copy of this configuration with one setting replaced.
    pub fn with_setting(&self, key: &str, value: impl Into<String>) -> Result<Self> {
        let mut settings = self.settings.clone();
        settings.insert(key.to_string(), value.into());
        Self::with_settings(settings)
    }

    pub fn parse_value(val: &str, data_type: DataType) -> ParseResult<()> {
        match data_type {
            DataType::UInt64 => {
                val.parse::<usize>().map_err(|e| format!("{e:?}"))?;
            }
            DataType::Float64 => {
                val.parse::<f64>().map_err(|e| format!("{e:?}"))?;
            }
            DataType::Boolean => {
                val.parse::<bool>().map_err(|e| format!("{e:?}"))?;
            }
            DataType::Utf8 => {}
            _ => {
                return Err(format!("not support data type: {data_type}"));
            }
        }

        Ok(())
    }

    // All available configuration options
    pub fn valid_entries() -> &'static HashMap<String, ConfigEntry> {
        &CONFIG_ENTRIES
    }

    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    pub fn job_name(&self) -> String {
        self.get_setting(MATPART_JOB_NAME)
            .unwrap_or_default()
    }

    pub fn fanout_concurrency(&self) -> usize {
        self.get_parsed_setting(MATPART_FANOUT_CONCURRENCY).unwrap_or(1)
    }

    pub fn channel_capacity(&self) -> usize {
        self.get_parsed_setting(MATPART_SHUFFLE_CHANNEL_CAPACITY)
            .unwrap_or(1024)
    }

    pub fn memory_limit(&self) -> usize {
        self.get_parsed_setting(MATPART_SHUFFLE_MEMORY_LIMIT)
            .unwrap_or(256 * 1024 * 1024)
    }

    pub fn spill_threshold(&self) -> f64 {
        self.get_parsed_setting(MATPART_SHUFFLE_SPILL_THRESHOLD)
            .unwrap_or(0.8)
    }

    /// Returns the memory usage at which spilling should occur.
    pub fn spill_memory_threshold(&self) -> usize {
        (self.memory_limit() as f64 * self.spill_threshold()) as usize
    }

    pub fn work_dir(&self) -> PathBuf {
        self.get_setting(MATPART_SHUFFLE_WORK_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }

    fn get_setting(&self, key: &str) -> Option<String> {
        self.settings.get(key).cloned().or_else(|| {
            Self::valid_entries()
                .get(key)
                .and_then(|entry| entry.default_value.clone())
        })
    }

    // values are validated in the constructor, so a parse failure only
    // happens for a key without a default
    fn get_parsed_setting<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get_setting(key).and_then(|v| v.parse::<T>().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() -> Result<()> {
        let config = PartitionerConfig::default();
        assert_eq!("ParFor-DPSP", config.job_name());
        assert_eq!(1024, config.channel_capacity());
        assert_eq!(256 * 1024 * 1024, config.memory_limit());
        assert!(config.fanout_concurrency() >= 1);
        assert_eq!(std::env::temp_dir(), config.work_dir());
        Ok(())
    }

    #[test]
    fn custom_config() -> Result<()> {
        let config = PartitionerConfig::default()
            .with_setting(MATPART_SHUFFLE_MEMORY_LIMIT, "100")?
            .with_setting(MATPART_SHUFFLE_SPILL_THRESHOLD, "0.5")?
            .with_setting(MATPART_JOB_NAME, "nightly")?;
        assert_eq!(50, config.spill_memory_threshold());
        assert_eq!("nightly", config.job_name());
        Ok(())
    }

    #[test]
    fn invalid_values_are_rejected() {
        let config = PartitionerConfig::default();
        assert!(config
            .with_setting(MATPART_FANOUT_CONCURRENCY, "many")
            .is_err());
        assert!(config.with_setting(MATPART_FANOUT_CONCURRENCY, "0").is_err());
        assert!(config
            .with_setting(MATPART_SHUFFLE_SPILL_THRESHOLD, "1.5")
            .is_err());
        assert!(config.with_setting("matpart.unknown", "1").is_err());
    }
}
