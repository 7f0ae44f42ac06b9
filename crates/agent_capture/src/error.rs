use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Errors that stop a capture run or prevent one record from being written.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to read cases from `{path}`: {source}")]
    ReadCases {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("case line {line_number}: {message}")]
    InvalidCase { line_number: usize, message: String },
    #[error("failed to open result file `{path}`: {source}")]
    OpenSink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to append result record: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to serialize result record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A scorer that could not produce a score. Recorded as `scoreError`, never fatal.
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("failed to spawn scorer `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("scorer command is empty")]
    EmptyCommand,
    #[error("scorer I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("scorer timed out after {0:?}")]
    Timeout(Duration),
    #[error("scorer exited unsuccessfully (code={code:?}): {stderr}")]
    Failed { code: Option<i32>, stderr: String },
    #[error("scorer returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("scorer rejected the case: {0}")]
    Rejected(String),
}
