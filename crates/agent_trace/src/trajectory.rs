use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

/// One entry of a captured trace. `timestamp` is milliseconds since the owning turn or
/// conversation started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrajectoryStep {
    Thought {
        content: String,
        timestamp: u64,
    },
    Message {
        content: String,
        timestamp: u64,
    },
    ToolCall {
        name: String,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        timestamp: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<u64>,
    },
    Plan {
        entries: Vec<Value>,
        timestamp: u64,
    },
}

impl TrajectoryStep {
    pub fn timestamp(&self) -> u64 {
        match self {
            TrajectoryStep::Thought { timestamp, .. }
            | TrajectoryStep::Message { timestamp, .. }
            | TrajectoryStep::ToolCall { timestamp, .. }
            | TrajectoryStep::Plan { timestamp, .. } => *timestamp,
        }
    }

    pub fn is_failed_tool_call(&self) -> bool {
        matches!(self, TrajectoryStep::ToolCall { status, .. } if status == STATUS_FAILED)
    }
}

/// How much structured detail a capture carries.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Richness {
    Full,
    MessagesOnly,
    Minimal,
}

pub fn classify_richness(steps: &[TrajectoryStep]) -> Richness {
    let mut saw_message = false;
    for step in steps {
        match step {
            TrajectoryStep::Thought { .. }
            | TrajectoryStep::ToolCall { .. }
            | TrajectoryStep::Plan { .. } => return Richness::Full,
            TrajectoryStep::Message { .. } => saw_message = true,
        }
    }
    if saw_message {
        Richness::MessagesOnly
    } else {
        Richness::Minimal
    }
}

/// Newline-joined message contents in trace order.
pub fn message_output(steps: &[TrajectoryStep]) -> String {
    steps
        .iter()
        .filter_map(|step| match step {
            TrajectoryStep::Message { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn has_tool_errors(steps: &[TrajectoryStep], timed_out: bool) -> bool {
    timed_out || steps.iter().any(TrajectoryStep::is_failed_tool_call)
}

/// Final ordered trace plus the signals derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedTrajectory {
    pub steps: Vec<TrajectoryStep>,
    pub output: String,
    pub tool_errors: bool,
    pub richness: Richness,
}
