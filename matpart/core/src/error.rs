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

//! Matpart error types

use std::{
    error::Error,
    fmt::{Display, Formatter},
    io, result,
};

use arrow::error::ArrowError;

/// Result type alias for matpart operations.
pub type Result<T> = result::Result<T, MatpartError>;

/// Matpart error types for partition jobs.
#[derive(Debug)]
pub enum MatpartError {
    /// General error with a descriptive message.
    General(String),
    /// Internal error indicating a bug or unexpected state.
    Internal(String),
    /// Invalid plan, format, matrix shape or setting.
    Configuration(String),
    /// Error from Arrow encoding or decoding.
    ArrowError(Box<ArrowError>),
    /// Error from the object store holding blocks or partitions.
    ObjectStoreError(Box<object_store::Error>),
    /// I/O operation error.
    IoError(io::Error),
    /// Tokio task join error.
    TokioError(tokio::task::JoinError),
    /// Prior output could not be removed: (output prefix, cause).
    Cleanup(String, Box<MatpartError>),
    /// The partition job failed: (job name, cause).
    JobFailed(String, Box<MatpartError>),
    /// Operation was cancelled.
    Cancelled,
}

impl MatpartError {
    /// Whether re-running the whole job may succeed.
    ///
    /// Only I/O failures are treated as transient; everything else is a
    /// property of the input or the plan and will fail again.
    pub fn is_retryable(&self) -> bool {
        match self {
            MatpartError::IoError(_) | MatpartError::ObjectStoreError(_) => true,
            MatpartError::Cleanup(_, cause) | MatpartError::JobFailed(_, cause) => {
                cause.is_retryable()
            }
            _ => false,
        }
    }

    /// Returns the innermost error, unwrapping cleanup and job failures.
    pub fn root_cause(&self) -> &MatpartError {
        match self {
            MatpartError::Cleanup(_, cause) | MatpartError::JobFailed(_, cause) => {
                cause.root_cause()
            }
            other => other,
        }
    }
}

impl From<ArrowError> for MatpartError {
    fn from(e: ArrowError) -> Self {
        match e {
            ArrowError::ExternalError(e) if e.downcast_ref::<MatpartError>().is_some() => {
                match e.downcast::<MatpartError>() {
                    Ok(e) => *e,
                    Err(e) => MatpartError::ArrowError(Box::new(ArrowError::ExternalError(e))),
                }
            }
            ArrowError::IoError(_, e) => MatpartError::IoError(e),
            other => MatpartError::ArrowError(Box::new(other)),
        }
    }
}

impl From<object_store::Error> for MatpartError {
    fn from(e: object_store::Error) -> Self {
        MatpartError::ObjectStoreError(Box::new(e))
    }
}

impl From<object_store::path::Error> for MatpartError {
    fn from(e: object_store::path::Error) -> Self {
        MatpartError::Configuration(format!("Invalid object store path: {e}"))
    }
}

impl From<io::Error> for MatpartError {
    fn from(e: io::Error) -> Self {
        MatpartError::IoError(e)
    }
}

impl From<tokio::task::JoinError> for MatpartError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            MatpartError::Cancelled
        } else {
            MatpartError::TokioError(e)
        }
    }
}

impl Display for MatpartError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            MatpartError::General(desc) => write!(f, "General error: {desc}"),
            MatpartError::Internal(desc) => {
                write!(f, "Internal matpart error: {desc}")
            }
            MatpartError::Configuration(desc) => {
                write!(f, "Configuration error: {desc}")
            }
            MatpartError::ArrowError(desc) => write!(f, "Arrow error: {desc}"),
            MatpartError::ObjectStoreError(desc) => {
                write!(f, "Object store error: {desc}")
            }
            MatpartError::IoError(desc) => write!(f, "IO error: {desc}"),
            MatpartError::TokioError(desc) => write!(f, "Tokio join error: {desc}"),
            MatpartError::Cleanup(prefix, cause) => {
                write!(f, "Failed to clean up output at {prefix}: {cause}")
            }
            MatpartError::JobFailed(job_name, cause) => {
                write!(f, "Partition job {job_name} failed: {cause}")
            }
            MatpartError::Cancelled => write!(f, "Task cancelled"),
        }
    }
}

impl Error for MatpartError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MatpartError::ArrowError(e) => Some(e.as_ref()),
            MatpartError::ObjectStoreError(e) => Some(e.as_ref()),
            MatpartError::IoError(e) => Some(e),
            MatpartError::TokioError(e) => Some(e),
            MatpartError::Cleanup(_, cause) | MatpartError::JobFailed(_, cause) => {
                Some(cause.as_ref())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_failure_keeps_cause() {
        let err = MatpartError::JobFailed(
            "ParFor-DPSP".to_string(),
            Box::new(MatpartError::IoError(io::Error::other("disk full"))),
        );
        assert!(err.is_retryable());
        assert!(matches!(err.root_cause(), MatpartError::IoError(_)));
        assert!(err.to_string().contains("ParFor-DPSP"));
        assert!(err.to_string().contains("disk full"));
        assert!(err.source().is_some());
    }

    #[test]
    fn configuration_errors_are_not_retryable() {
        let err = MatpartError::Configuration("requested parallelism is 0".to_string());
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Configuration error: requested parallelism is 0"
        );
    }

    #[test]
    fn external_arrow_error_is_unwrapped() {
        let inner = MatpartError::Internal("bad block".to_string());
        let err = MatpartError::from(ArrowError::ExternalError(Box::new(inner)));
        assert!(matches!(err, MatpartError::Internal(_)));
    }
}
