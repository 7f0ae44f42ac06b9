use std::time::Instant;

use agent_trace::{message_output, ParsedUpdate, TrajectoryBuilder, UpdateKind};

use crate::{process::ExitInfo, TurnError};

/// A classified update and the instant its raw record arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedUpdate {
    pub at: Instant,
    pub update: ParsedUpdate,
}

/// Everything one `prompt` call produced.
///
/// Partial data survives failures: updates captured before a timeout or crash stay in
/// `updates`, and the failure itself is appended to `errors`.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    pub updates: Vec<TimedUpdate>,
    /// Terminal text from the result record (headless) when the agent exposes one.
    pub output: Option<String>,
    pub exit: ExitInfo,
    pub errors: Vec<TurnError>,
    /// Session id captured from the agent's output for use on the next turn.
    pub resume_id: Option<String>,
    /// Raw text of output lines that were not JSON.
    pub unparsed: Vec<String>,
}

impl TurnResult {
    pub(crate) fn empty() -> Self {
        Self {
            updates: Vec::new(),
            output: None,
            exit: ExitInfo::default(),
            errors: Vec::new(),
            resume_id: None,
            unparsed: Vec::new(),
        }
    }

    pub(crate) fn from_error(err: TurnError) -> Self {
        let mut result = Self::empty();
        result.errors.push(err);
        result
    }

    pub fn timed_out(&self) -> bool {
        self.exit.timed_out
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.exit.timed_out
    }

    /// The result record's text, or the turn's message contents joined with newlines.
    pub fn output_text(&self) -> String {
        if let Some(output) = &self.output {
            return output.clone();
        }
        let mut scratch = TrajectoryBuilder::new();
        for timed in &self.updates {
            if timed.update.kind == UpdateKind::Message {
                scratch.push_elapsed(&timed.update, 0);
            }
        }
        message_output(scratch.steps())
    }

    /// Replays this turn's updates into a conversation-wide builder.
    pub fn replay_into(&self, builder: &mut TrajectoryBuilder) {
        for timed in &self.updates {
            builder.push_at(&timed.update, timed.at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed(update: ParsedUpdate) -> TimedUpdate {
        TimedUpdate {
            at: Instant::now(),
            update,
        }
    }

    #[test]
    fn output_text_prefers_result_record() {
        let mut result = TurnResult::empty();
        result.updates.push(timed(ParsedUpdate::message("draft")));
        assert_eq!(result.output_text(), "draft");

        result.output = Some("final".to_string());
        assert_eq!(result.output_text(), "final");
    }

    #[test]
    fn output_text_joins_messages_only() {
        let mut result = TurnResult::empty();
        result.updates.push(timed(ParsedUpdate::message("a")));
        result.updates.push(timed(ParsedUpdate::thought("hmm")));
        result.updates.push(timed(ParsedUpdate::message("b")));
        assert_eq!(result.output_text(), "a\nb");
    }

    #[test]
    fn replay_preserves_order_and_correlation() {
        let mut result = TurnResult::empty();
        result.updates.push(timed(
            ParsedUpdate::tool_call(Some("Read"), None).with_call_id("c1"),
        ));
        result.updates.push(timed(
            ParsedUpdate::tool_call(Some("Read"), Some("running")).with_call_id("c1"),
        ));
        result.updates.push(timed(
            ParsedUpdate::tool_call(Some("Read"), Some("completed")).with_call_id("c1"),
        ));

        let mut builder = TrajectoryBuilder::new();
        result.replay_into(&mut builder);
        assert_eq!(builder.steps().len(), 1);
        let trajectory = builder.finish(false, None);
        assert!(!trajectory.tool_errors);
    }

    #[test]
    fn errors_and_timeouts_are_not_clean() {
        let mut result = TurnResult::from_error(TurnError::PrematureExit);
        assert!(!result.is_clean());
        result.errors.clear();
        assert!(result.is_clean());
        result.exit.timed_out = true;
        assert!(result.timed_out());
        assert!(!result.is_clean());
    }
}
