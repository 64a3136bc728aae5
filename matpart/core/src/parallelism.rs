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

//! Degree of parallelism for the shuffle stage.

use crate::error::{MatpartError, Result};

/// Caps the requested number of grouping workers to the number of
/// partitions the data actually has.
///
/// The result bounds concurrency only; the number of output partitions is
/// always `natural_groups`.
pub fn resolve_parallelism(natural_groups: u64, requested: usize) -> Result<usize> {
    if requested == 0 {
        return Err(MatpartError::Configuration(
            "requested parallelism must be positive".to_string(),
        ));
    }
    if natural_groups == 0 {
        return Err(MatpartError::Configuration(
            "natural group count must be positive".to_string(),
        ));
    }
    Ok(natural_groups.min(requested as u64) as usize)
}
