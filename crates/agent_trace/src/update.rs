use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical update categories every raw agent record is mapped into.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Thought,
    ToolCall,
    Message,
    Plan,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::Thought => "thought",
            UpdateKind::ToolCall => "tool_call",
            UpdateKind::Message => "message",
            UpdateKind::Plan => "plan",
        }
    }
}

/// One classified record.
///
/// Every payload field is best-effort: a field the source did not carry is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedUpdate {
    pub kind: UpdateKind,
    pub content: Option<String>,
    pub title: Option<String>,
    pub status: Option<String>,
    /// Protocol-provided tool call identity, when the source has one.
    pub call_id: Option<String>,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub entries: Vec<Value>,
}

impl ParsedUpdate {
    pub fn new(kind: UpdateKind) -> Self {
        Self {
            kind,
            content: None,
            title: None,
            status: None,
            call_id: None,
            input: None,
            output: None,
            entries: Vec::new(),
        }
    }

    pub fn message(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::new(UpdateKind::Message)
        }
    }

    pub fn thought(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::new(UpdateKind::Thought)
        }
    }

    pub fn tool_call(title: Option<&str>, status: Option<&str>) -> Self {
        Self {
            title: title.map(str::to_string),
            status: status.map(str::to_string),
            ..Self::new(UpdateKind::ToolCall)
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }
}

/// A producer of canonical updates from raw, already-parsed JSON records.
///
/// Both the declarative rule set used for headless CLIs and the fixed mapping used for native
/// protocol notifications implement this, so one normalizer consumes either.
pub trait UpdateSource {
    /// Returns `None` when the record is not classified (framing noise, unmatched shapes).
    fn classify(&self, record: &Value) -> Option<ParsedUpdate>;
}

impl<T: UpdateSource + ?Sized> UpdateSource for &T {
    fn classify(&self, record: &Value) -> Option<ParsedUpdate> {
        (**self).classify(record)
    }
}
