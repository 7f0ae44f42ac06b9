use std::collections::HashMap;

use tracing::debug;

use crate::trajectory::{TrajectoryStep, STATUS_COMPLETED, STATUS_PENDING};
use crate::update::ParsedUpdate;

#[derive(Debug, Clone, Copy)]
struct OpenCall {
    started_at_ms: u64,
    step_index: usize,
}

/// What the correlator did with one `tool_call` update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    /// First sighting; a new step was appended at `step_index`.
    Opened { id: String, step_index: usize },
    /// A completion was merged into the step at `step_index`.
    Completed { id: String, step_index: usize },
    /// A non-completion update for an id that is already open; nothing changed.
    Dropped { id: String },
}

/// Tracks open tool calls for one turn or conversation.
///
/// Only two transitions are observable: the first sighting of an id opens a step, and a later
/// `completed` status merges into it. Any other status for a known id is discarded, so at most
/// one step is ever emitted per id. Entries live until the correlator is dropped.
#[derive(Debug, Default)]
pub struct ToolCallCorrelator {
    open: HashMap<String, OpenCall>,
    synthetic: u64,
}

impl ToolCallCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    fn identity(&mut self, update: &ParsedUpdate, now_ms: u64) -> String {
        if let Some(id) = update.call_id.as_ref().filter(|id| !id.is_empty()) {
            return id.clone();
        }
        if let Some(title) = update.title.as_ref().filter(|title| !title.is_empty()) {
            return title.clone();
        }
        self.synthetic += 1;
        format!("tool-{now_ms}-{}", self.synthetic)
    }

    pub fn apply(
        &mut self,
        update: &ParsedUpdate,
        now_ms: u64,
        steps: &mut Vec<TrajectoryStep>,
    ) -> Correlation {
        let id = self.identity(update, now_ms);

        let Some(open) = self.open.get(&id).copied() else {
            let step_index = steps.len();
            steps.push(TrajectoryStep::ToolCall {
                name: update
                    .title
                    .clone()
                    .or_else(|| update.call_id.clone())
                    .unwrap_or_else(|| id.clone()),
                status: update
                    .status
                    .clone()
                    .unwrap_or_else(|| STATUS_PENDING.to_string()),
                input: update.input.clone(),
                output: None,
                timestamp: now_ms,
                duration: None,
            });
            self.open.insert(
                id.clone(),
                OpenCall {
                    started_at_ms: now_ms,
                    step_index,
                },
            );
            return Correlation::Opened { id, step_index };
        };

        if update.status.as_deref() != Some(STATUS_COMPLETED) {
            debug!(tool_call = %id, status = ?update.status, "dropping intermediate tool call update");
            return Correlation::Dropped { id };
        }

        if let Some(TrajectoryStep::ToolCall {
            status,
            output,
            duration,
            ..
        }) = steps.get_mut(open.step_index)
        {
            *status = STATUS_COMPLETED.to_string();
            *duration = Some(now_ms.saturating_sub(open.started_at_ms));
            if update.output.is_some() {
                *output = update.output.clone();
            }
        }
        Correlation::Completed {
            id,
            step_index: open.step_index,
        }
    }
}
