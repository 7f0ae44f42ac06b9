//! Scoring collaborators.
//!
//! A [`Scorer`] judges one captured case. [`FnScorer`] wraps an in-process closure and
//! [`ProcessScorer`] runs an external command that reads a [`ScoreRequest`] as JSON on stdin
//! and prints a [`ScoreOutcome`] as JSON on stdout.

use std::{collections::BTreeMap, fmt, path::PathBuf, process::Stdio, time::Duration};

use agent_trace::TrajectoryStep;
use futures::future::{self, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::{ChildStdin, Command},
    time,
};
use tracing::debug;

use crate::{case::CaseInput, ScoreError};

const DEFAULT_SCORER_TIMEOUT: Duration = Duration::from_secs(60);

/// Payload handed to a scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest {
    pub input: CaseInput,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub trajectory: Vec<TrajectoryStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreOutcome {
    pub pass: bool,
    pub score: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Value>,
}

impl ScoreOutcome {
    pub fn new(pass: bool, score: f64, reasoning: impl Into<String>) -> Self {
        Self {
            pass,
            score,
            reasoning: reasoning.into(),
            outcome: None,
        }
    }

    fn validated(self) -> Result<Self, ScoreError> {
        if self.score.is_finite() {
            Ok(self)
        } else {
            Err(ScoreError::InvalidResponse(format!(
                "score must be a finite number, got {}",
                self.score
            )))
        }
    }
}

/// Judges one captured case.
///
/// Implementations must be shareable across workers; the runner calls `score` concurrently
/// for different cases.
pub trait Scorer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    fn score<'a>(
        &'a self,
        request: &'a ScoreRequest,
    ) -> BoxFuture<'a, Result<ScoreOutcome, ScoreError>>;
}

/// In-process scorer backed by a plain function.
pub struct FnScorer<F> {
    name: String,
    func: F,
}

impl<F> FnScorer<F>
where
    F: Fn(&ScoreRequest) -> Result<ScoreOutcome, ScoreError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> fmt::Debug for FnScorer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnScorer").field("name", &self.name).finish()
    }
}

impl<F> Scorer for FnScorer<F>
where
    F: Fn(&ScoreRequest) -> Result<ScoreOutcome, ScoreError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn score<'a>(
        &'a self,
        request: &'a ScoreRequest,
    ) -> BoxFuture<'a, Result<ScoreOutcome, ScoreError>> {
        let result = (self.func)(request).and_then(ScoreOutcome::validated);
        future::ready(result).boxed()
    }
}

/// Scorer that runs an external command per case.
#[derive(Debug, Clone)]
pub struct ProcessScorer {
    name: String,
    command: Vec<String>,
    env: BTreeMap<String, String>,
    timeout: Duration,
}

impl ProcessScorer {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command: Vec<String> = command.into_iter().map(Into::into).collect();
        let name = command
            .first()
            .cloned()
            .unwrap_or_else(|| "process".to_string());
        Self {
            name,
            command,
            env: BTreeMap::new(),
            timeout: DEFAULT_SCORER_TIMEOUT,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, request: &ScoreRequest) -> Result<ScoreOutcome, ScoreError> {
        let (program, args) = self.command.split_first().ok_or(ScoreError::EmptyCommand)?;
        let mut payload = serde_json::to_vec(request)
            .map_err(|err| ScoreError::InvalidResponse(err.to_string()))?;
        payload.push(b'\n');

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| ScoreError::Spawn {
            program: program.clone(),
            source,
        })?;
        debug!(scorer = %self.name, pid = ?child.id(), "scorer spawned");

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;
        let stdout_task = tokio::spawn(read_all(stdout));
        let stderr_task = tokio::spawn(read_all(stderr));

        let exchange = async {
            send_payload(stdin, &payload).await?;
            child.wait().await
        };
        let status = time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ScoreError::Timeout(self.timeout))??;

        let stdout = join_output(stdout_task).await?;
        let stderr = join_output(stderr_task).await?;

        if !status.success() {
            return Err(ScoreError::Failed {
                code: status.code(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        parse_outcome(&String::from_utf8_lossy(&stdout))
    }
}

impl Scorer for ProcessScorer {
    fn name(&self) -> &str {
        &self.name
    }

    fn score<'a>(
        &'a self,
        request: &'a ScoreRequest,
    ) -> BoxFuture<'a, Result<ScoreOutcome, ScoreError>> {
        self.run(request).boxed()
    }
}

async fn send_payload(mut stdin: ChildStdin, payload: &[u8]) -> std::io::Result<()> {
    match stdin.write_all(payload).await {
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

async fn read_all<R>(mut reader: R) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer).await?;
    Ok(buffer)
}

async fn join_output(
    task: tokio::task::JoinHandle<std::io::Result<Vec<u8>>>,
) -> Result<Vec<u8>, ScoreError> {
    task.await
        .map_err(|err| ScoreError::Io(std::io::Error::other(err.to_string())))?
        .map_err(ScoreError::Io)
}

fn missing_pipe(name: &str) -> ScoreError {
    ScoreError::Io(std::io::Error::other(format!("scorer {name} was not captured")))
}

/// Parses scorer stdout: the whole trimmed text, else the last non-empty line, so scorers may
/// log progress before the verdict.
fn parse_outcome(stdout: &str) -> Result<ScoreOutcome, ScoreError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(ScoreError::InvalidResponse("scorer printed nothing".to_string()));
    }
    let outcome = match serde_json::from_str::<ScoreOutcome>(trimmed) {
        Ok(outcome) => outcome,
        Err(whole_err) => {
            let last = trimmed
                .lines()
                .rev()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .unwrap_or(trimmed);
            serde_json::from_str::<ScoreOutcome>(last)
                .map_err(|_| ScoreError::InvalidResponse(whole_err.to_string()))?
        }
    };
    outcome.validated()
}
