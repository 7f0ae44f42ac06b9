use std::{collections::BTreeMap, path::Path, time::Duration};

use agent_trace::{IngestLimits, LineRecord, RuleInterpreter, UpdateSource};
use serde_json::Value;
use tokio::time;
use tracing::{debug, warn};

use crate::{
    command::{headless_invocation, LaunchContext},
    config::AdapterConfig,
    process::{AgentProcess, ExitInfo, NextRecord, TimedRecord, EXIT_GRACE},
    turn::{TimedUpdate, TurnResult},
    TurnError,
};

enum TurnEnd {
    ResultRecord,
    Eof,
    Deadline,
}

/// Collects one turn's worth of records from a headless agent.
struct TurnCollector<'a> {
    config: &'a AdapterConfig,
    interpreter: RuleInterpreter<'a>,
    deadline: Option<time::Instant>,
    timeout: Option<Duration>,
    result: TurnResult,
}

impl<'a> TurnCollector<'a> {
    fn new(config: &'a AdapterConfig, timeout: Option<Duration>) -> Self {
        Self {
            config,
            interpreter: RuleInterpreter::new(&config.output_events),
            deadline: timeout.map(|timeout| time::Instant::now() + timeout),
            timeout,
            result: TurnResult::empty(),
        }
    }

    async fn collect(&mut self, process: &mut AgentProcess) -> TurnEnd {
        loop {
            match process.next_record(self.deadline).await {
                NextRecord::Record(record) => {
                    if self.accept(record) {
                        return TurnEnd::ResultRecord;
                    }
                }
                NextRecord::Eof => return TurnEnd::Eof,
                NextRecord::Deadline => return TurnEnd::Deadline,
            }
        }
    }

    /// Returns `true` when `record` is the turn's result record.
    fn accept(&mut self, (at, record): TimedRecord) -> bool {
        let LineRecord {
            line_number,
            raw_text,
            outcome,
        } = record;
        let value: Value = match outcome {
            Ok(value) => value,
            Err(err) => {
                warn!(line_number, error = %err, "skipping malformed agent output line");
                self.result.errors.push(TurnError::MalformedLine {
                    line_number,
                    message: err.to_string(),
                });
                if let Some(text) = raw_text {
                    self.result.unparsed.push(text);
                }
                return false;
            }
        };

        if let Some(update) = self.interpreter.classify(&value) {
            self.result.updates.push(TimedUpdate { at, update });
        }
        if let Some(resume) = &self.config.resume {
            if let Some(id) = resume.session_id_path.resolve_text(&value) {
                self.result.resume_id = Some(id);
            }
        }
        if self.config.result.matches(&value) {
            self.result.output = self.config.result.content(&value);
            return true;
        }
        false
    }

    async fn time_out(&mut self, process: &mut AgentProcess) {
        let mut exit = process.kill().await;
        exit.timed_out = true;
        self.result.exit = exit;
        let timeout_ms = self
            .timeout
            .map_or(0, |timeout| u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self.result.errors.push(TurnError::Timeout { timeout_ms });
    }

    async fn record_exit(&mut self, exit: ExitInfo, process: &mut AgentProcess) {
        self.result.exit = exit;
        if !exit.success() {
            self.result.errors.push(TurnError::NonZeroExit {
                code: exit.exit_code,
                signal: exit.signal,
                stderr: process.stderr_tail().await,
            });
        }
    }

    /// Waits for the process to exit after stdout closed, up to the turn deadline.
    async fn settle_after_eof(&mut self, process: &mut AgentProcess) {
        match process.wait_until(self.deadline).await {
            Ok(Some(exit)) => self.record_exit(exit, process).await,
            Ok(None) => self.time_out(process).await,
            Err(err) => self.result.errors.push(err),
        }
    }

    fn grace_deadline(&self) -> time::Instant {
        let grace = time::Instant::now() + EXIT_GRACE;
        self.deadline.map_or(grace, |deadline| deadline.min(grace))
    }
}

/// What a headless turn needs besides the input text.
pub(crate) struct HeadlessLaunch<'a> {
    pub(crate) config: &'a AdapterConfig,
    pub(crate) cwd: Option<&'a Path>,
    pub(crate) env: &'a BTreeMap<String, String>,
    pub(crate) limits: IngestLimits,
    pub(crate) timeout: Option<Duration>,
}

impl HeadlessLaunch<'_> {
    /// Spawns the long-lived process of a persistent stream session.
    pub(crate) async fn spawn_persistent(&self) -> Result<AgentProcess, TurnError> {
        let invocation = headless_invocation(
            self.config,
            LaunchContext {
                prompt: None,
                resume_id: None,
                cwd: self.cwd,
            },
        );
        AgentProcess::spawn(&invocation, self.cwd, self.env, self.limits).await
    }

    /// Runs one turn on a freshly spawned process that receives `prompt` at launch.
    pub(crate) async fn one_shot(&self, prompt: &str, resume_id: Option<&str>) -> TurnResult {
        let mut turn = TurnCollector::new(self.config, self.timeout);
        let invocation = headless_invocation(
            self.config,
            LaunchContext {
                prompt: Some(prompt),
                resume_id,
                cwd: self.cwd,
            },
        );

        let mut process =
            match AgentProcess::spawn(&invocation, self.cwd, self.env, self.limits).await {
                Ok(process) => process,
                Err(err) => {
                    warn!(agent = %self.config.name, error = %err, "agent spawn failed");
                    turn.result.errors.push(err);
                    return turn.result;
                }
            };

        match turn.collect(&mut process).await {
            TurnEnd::ResultRecord => match process.wait_until(Some(turn.grace_deadline())).await {
                Ok(Some(exit)) => turn.record_exit(exit, &mut process).await,
                Ok(None) => {
                    debug!(agent = %self.config.name, "agent lingered after result; killing");
                    turn.result.exit = process.kill().await;
                }
                Err(err) => turn.result.errors.push(err),
            },
            TurnEnd::Eof => turn.settle_after_eof(&mut process).await,
            TurnEnd::Deadline => turn.time_out(&mut process).await,
        }
        turn.result
    }

    /// Writes `input` to a persistent process and reads until the result record. The slot is
    /// emptied when the process dies or is killed so the next turn respawns it.
    pub(crate) async fn persistent_turn(
        &self,
        slot: &mut Option<AgentProcess>,
        input: &str,
    ) -> TurnResult {
        if slot.as_mut().map_or(true, AgentProcess::has_exited) {
            *slot = None;
            match self.spawn_persistent().await {
                Ok(process) => *slot = Some(process),
                Err(err) => {
                    warn!(agent = %self.config.name, error = %err, "agent spawn failed");
                    return TurnResult::from_error(err);
                }
            }
        }
        let Some(process) = slot.as_mut() else {
            return TurnResult::from_error(TurnError::MissingPipe("process"));
        };

        let mut turn = TurnCollector::new(self.config, self.timeout);
        let written = match turn.deadline {
            Some(deadline) => time::timeout_at(deadline, process.write_line(input)).await,
            None => Ok(process.write_line(input).await),
        };
        match written {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                turn.result.errors.push(err);
                turn.result.exit = process.kill().await;
                *slot = None;
                return turn.result;
            }
            Err(_) => {
                debug!(agent = %self.config.name, "agent stopped reading stdin before the deadline");
                turn.time_out(process).await;
                *slot = None;
                return turn.result;
            }
        }

        match turn.collect(process).await {
            TurnEnd::ResultRecord => return turn.result,
            TurnEnd::Eof => {
                turn.result.errors.push(TurnError::PrematureExit);
                turn.settle_after_eof(process).await;
            }
            TurnEnd::Deadline => turn.time_out(process).await,
        }
        *slot = None;
        turn.result
    }
}
