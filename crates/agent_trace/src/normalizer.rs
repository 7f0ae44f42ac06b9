use std::time::Instant;

use serde_json::Value;

use crate::correlator::{Correlation, ToolCallCorrelator};
use crate::trajectory::{
    classify_richness, has_tool_errors, message_output, NormalizedTrajectory, TrajectoryStep,
};
use crate::update::{ParsedUpdate, UpdateKind, UpdateSource};

/// Builds the ordered trace for one turn or one conversation.
///
/// Updates are applied in arrival order. Timestamps are measured against the builder's start
/// instant, so feeding several turns into the same builder yields conversation-relative times.
#[derive(Debug)]
pub struct TrajectoryBuilder {
    started: Instant,
    steps: Vec<TrajectoryStep>,
    correlator: ToolCallCorrelator,
}

impl Default for TrajectoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TrajectoryBuilder {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(started: Instant) -> Self {
        Self {
            started,
            steps: Vec::new(),
            correlator: ToolCallCorrelator::new(),
        }
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn steps(&self) -> &[TrajectoryStep] {
        &self.steps
    }

    /// Applies an update that arrived at `at`. Instants before the start clamp to zero.
    pub fn push_at(&mut self, update: &ParsedUpdate, at: Instant) -> Option<Correlation> {
        let elapsed = at.saturating_duration_since(self.started);
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.push_elapsed(update, elapsed_ms)
    }

    pub fn push(&mut self, update: &ParsedUpdate) -> Option<Correlation> {
        self.push_at(update, Instant::now())
    }

    /// Applies an update with an explicit elapsed time. Returns the correlation outcome for
    /// `tool_call` updates.
    pub fn push_elapsed(&mut self, update: &ParsedUpdate, elapsed_ms: u64) -> Option<Correlation> {
        let timestamp = elapsed_ms;
        match update.kind {
            UpdateKind::Thought => self.steps.push(TrajectoryStep::Thought {
                content: update.content.clone().unwrap_or_default(),
                timestamp,
            }),
            UpdateKind::Message => self.steps.push(TrajectoryStep::Message {
                content: update.content.clone().unwrap_or_default(),
                timestamp,
            }),
            UpdateKind::Plan => self.steps.push(TrajectoryStep::Plan {
                entries: update.entries.clone(),
                timestamp,
            }),
            UpdateKind::ToolCall => {
                return Some(self.correlator.apply(update, timestamp, &mut self.steps));
            }
        }
        None
    }

    /// Classifies `record` with `source` and applies the result. Unclassified records are
    /// ignored and return `false`.
    pub fn ingest<S: UpdateSource>(&mut self, source: &S, record: &Value, at: Instant) -> bool {
        match source.classify(record) {
            Some(update) => {
                self.push_at(&update, at);
                true
            }
            None => false,
        }
    }

    /// Consumes the builder. `output_override` is the terminal text the session exposed directly;
    /// when absent the newline-joined message contents are used.
    pub fn finish(self, timed_out: bool, output_override: Option<String>) -> NormalizedTrajectory {
        let output = output_override.unwrap_or_else(|| message_output(&self.steps));
        let tool_errors = has_tool_errors(&self.steps, timed_out);
        let richness = classify_richness(&self.steps);
        NormalizedTrajectory {
            steps: self.steps,
            output,
            tool_errors,
            richness,
        }
    }
}

/// Normalizes a batch of raw records that arrived at known elapsed offsets.
pub fn normalize_records<'a, S, I>(source: &S, records: I, timed_out: bool) -> NormalizedTrajectory
where
    S: UpdateSource,
    I: IntoIterator<Item = (u64, &'a Value)>,
{
    let mut builder = TrajectoryBuilder::new();
    for (elapsed_ms, record) in records {
        if let Some(update) = source.classify(record) {
            builder.push_elapsed(&update, elapsed_ms);
        }
    }
    builder.finish(timed_out, None)
}
