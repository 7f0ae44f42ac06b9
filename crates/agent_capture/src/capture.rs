use std::{fmt, path::PathBuf, sync::Arc, time::Instant};

use agent_session::SessionManager;
use agent_trace::TrajectoryBuilder;
use tracing::{debug, info, warn};

use crate::{
    case::CaptureCase,
    pool::{run_pool, PoolOptions, PressureGauge},
    record::{CaptureRecord, JsonlSink, Timing},
    scoring::{ScoreRequest, Scorer},
};

/// Settings for a capture run.
#[derive(Clone, Default)]
pub struct CaptureOptions {
    pub pool: PoolOptions,
    /// Working directory handed to every session (and to the scorer).
    pub cwd: Option<PathBuf>,
    pub scorer: Option<Arc<dyn Scorer>>,
}

impl CaptureOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.pool = self.pool.with_concurrency(concurrency);
        self
    }

    #[must_use]
    pub fn with_gauge(mut self, gauge: Arc<dyn PressureGauge>) -> Self {
        self.pool = self.pool.with_gauge(gauge);
        self
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn with_scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }
}

impl fmt::Debug for CaptureOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureOptions")
            .field("pool", &self.pool)
            .field("cwd", &self.cwd)
            .field("scorer", &self.scorer.as_ref().map(|scorer| scorer.name()))
            .finish()
    }
}

/// Totals for one [`CaptureRunner::run`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureSummary {
    pub total: usize,
    pub written: usize,
    /// Cases whose record carries at least one error.
    pub with_errors: usize,
    pub scored: usize,
    pub passed: usize,
    /// `"<case id>: <error>"` for each record that could not be appended.
    pub write_failures: Vec<String>,
}

/// Drives cases through sessions and persists one record per case.
#[derive(Debug)]
pub struct CaptureRunner {
    manager: Arc<SessionManager>,
    options: CaptureOptions,
}

impl CaptureRunner {
    pub fn new(manager: Arc<SessionManager>, options: CaptureOptions) -> Self {
        Self { manager, options }
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    /// Captures every case, appending each record to `sink` as soon as its case finishes.
    ///
    /// Cases run concurrently up to the pool limit; the turns of one case are always
    /// sequential. A failing case or write never stops its siblings.
    pub async fn run(&self, cases: Vec<CaptureCase>, sink: &JsonlSink) -> CaptureSummary {
        let total = cases.len();
        info!(
            total,
            concurrency = self.options.pool.concurrency,
            sink = %sink.path().display(),
            "capture started"
        );

        let results = run_pool(cases, &self.options.pool, |case| async move {
            let record = self.capture_case(&case).await;
            match sink.append(&record).await {
                Ok(()) => Ok(record),
                Err(err) => {
                    warn!(case = %record.id, error = %err, "failed to append record");
                    Err(format!("{}: {err}", record.id))
                }
            }
        })
        .await;

        let mut summary = CaptureSummary {
            total,
            ..CaptureSummary::default()
        };
        for result in results {
            match result {
                Ok(record) => {
                    summary.written += 1;
                    if !record.errors.is_empty() {
                        summary.with_errors += 1;
                    }
                    if let Some(score) = &record.score {
                        summary.scored += 1;
                        if score.pass {
                            summary.passed += 1;
                        }
                    }
                }
                Err(failure) => summary.write_failures.push(failure),
            }
        }
        info!(
            total,
            written = summary.written,
            with_errors = summary.with_errors,
            passed = summary.passed,
            "capture finished"
        );
        summary
    }

    /// Runs one case: create, each turn in order, normalize, score, destroy.
    ///
    /// Never fails; session and scorer problems are recorded on the returned record. The
    /// conversation stops early when a turn times out.
    pub async fn capture_case(&self, case: &CaptureCase) -> CaptureRecord {
        let started = Instant::now();
        let mut builder = TrajectoryBuilder::starting_at(started);
        let mut errors = Vec::new();
        let mut timed_out = false;
        let mut last_output = None;
        let mut turns = 0;

        match self.manager.create(self.options.cwd.clone()).await {
            Ok(session) => {
                for (index, input) in case.input.turns().into_iter().enumerate() {
                    turns += 1;
                    match self.manager.prompt(&session, input).await {
                        Ok(turn) => {
                            turn.replay_into(&mut builder);
                            errors.extend(
                                turn.errors
                                    .iter()
                                    .map(|err| format!("turn {}: {err}", index + 1)),
                            );
                            last_output = turn.output.clone();
                            if turn.timed_out() {
                                timed_out = true;
                                break;
                            }
                        }
                        Err(err) => {
                            errors.push(format!("turn {}: {err}", index + 1));
                            break;
                        }
                    }
                }
                self.manager.destroy(&session).await;
            }
            Err(err) => {
                warn!(case = %case.id, error = %err, "session create failed");
                errors.push(err.to_string());
            }
        }

        let trajectory = builder.finish(timed_out, last_output);
        let mut record = CaptureRecord {
            id: case.id.clone(),
            input: case.input.clone(),
            output: trajectory.output,
            expected: case.expected.clone(),
            hint: case.hint.clone(),
            trajectory: trajectory.steps,
            metadata: case.metadata.clone(),
            timing: Timing {
                duration_ms: 0,
                turns,
            },
            tool_errors: trajectory.tool_errors || !errors.is_empty(),
            richness: trajectory.richness,
            errors,
            score: None,
            score_error: None,
        };

        if let Some(scorer) = &self.options.scorer {
            let request = ScoreRequest {
                input: record.input.clone(),
                output: record.output.clone(),
                expected: record.expected.clone(),
                hint: record.hint.clone(),
                trajectory: record.trajectory.clone(),
                cwd: self.options.cwd.clone(),
            };
            match scorer.score(&request).await {
                Ok(outcome) => {
                    debug!(case = %case.id, scorer = scorer.name(), pass = outcome.pass, score = outcome.score, "case scored");
                    record.score = Some(outcome);
                }
                Err(err) => {
                    warn!(case = %case.id, scorer = scorer.name(), error = %err, "scoring failed");
                    record.score_error = Some(err.to_string());
                }
            }
        }

        record.timing.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            case = %case.id,
            turns,
            duration_ms = record.timing.duration_ms,
            errors = record.errors.len(),
            "case captured"
        );
        record
    }
}
