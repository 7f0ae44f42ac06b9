use std::path::PathBuf;

use thiserror::Error;

/// Invalid or unreadable adapter configuration. Fatal: reported before any session starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read adapter config `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse adapter config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unsupported adapter config version {0} (expected 1 or 2)")]
    UnsupportedVersion(u8),
    #[error("adapter config is invalid: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown session `{0}`")]
    UnknownSession(String),
    #[error("working directory `{0}` does not exist")]
    InvalidWorkingDir(PathBuf),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A failure confined to one turn. Collected into [`crate::TurnResult::errors`], never raised.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TurnError {
    #[error("failed to spawn `{program}`: {message}")]
    Spawn { program: String, message: String },
    #[error("agent command is empty")]
    EmptyCommand,
    #[error("failed writing prompt to agent stdin: {0}")]
    StdinWrite(String),
    #[error("agent {0} unavailable")]
    MissingPipe(&'static str),
    #[error("output line {line_number}: {message}")]
    MalformedLine { line_number: usize, message: String },
    #[error("agent exited unsuccessfully (code={code:?}, signal={signal:?}): {stderr}")]
    NonZeroExit {
        code: Option<i32>,
        signal: Option<i32>,
        stderr: String,
    },
    #[error("agent exited before producing a result record")]
    PrematureExit,
    #[error("turn timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("failed waiting for agent process: {0}")]
    Wait(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}
