//! Fixed mapping for native session-protocol `session/update` notifications.
//!
//! The notification params carry `{ sessionId, update: { sessionUpdate, ... } }`; the mapper
//! accepts either the full params object or the bare `update` object.

use serde_json::Value;

use crate::update::{ParsedUpdate, UpdateKind, UpdateSource};

pub const UPDATE_AGENT_THOUGHT: &str = "agent_thought_chunk";
pub const UPDATE_AGENT_MESSAGE: &str = "agent_message_chunk";
pub const UPDATE_TOOL_CALL: &str = "tool_call";
pub const UPDATE_TOOL_CALL_UPDATE: &str = "tool_call_update";
pub const UPDATE_PLAN: &str = "plan";

#[derive(Debug, Clone, Copy, Default)]
pub struct NativeUpdateMapper;

impl NativeUpdateMapper {
    pub fn new() -> Self {
        Self
    }
}

impl UpdateSource for NativeUpdateMapper {
    fn classify(&self, record: &Value) -> Option<ParsedUpdate> {
        let update = record.get("update").unwrap_or(record);
        let tag = update.get("sessionUpdate")?.as_str()?;

        match tag {
            UPDATE_AGENT_THOUGHT => {
                let mut parsed = ParsedUpdate::new(UpdateKind::Thought);
                parsed.content = content_text(update.get("content"));
                Some(parsed)
            }
            UPDATE_AGENT_MESSAGE => {
                let mut parsed = ParsedUpdate::new(UpdateKind::Message);
                parsed.content = content_text(update.get("content"));
                Some(parsed)
            }
            UPDATE_TOOL_CALL | UPDATE_TOOL_CALL_UPDATE => {
                let mut parsed = ParsedUpdate::new(UpdateKind::ToolCall);
                parsed.call_id = string_field(update, "toolCallId");
                parsed.title = string_field(update, "title");
                parsed.status = string_field(update, "status");
                parsed.input = update.get("rawInput").filter(|v| !v.is_null()).cloned();
                parsed.output = update
                    .get("rawOutput")
                    .or_else(|| update.get("content"))
                    .filter(|v| !v.is_null())
                    .cloned();
                Some(parsed)
            }
            UPDATE_PLAN => {
                let mut parsed = ParsedUpdate::new(UpdateKind::Plan);
                parsed.entries = update
                    .get("entries")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                Some(parsed)
            }
            _ => None,
        }
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Text of a content block (`{type: "text", text}`), or of the text blocks in an array.
fn content_text(content: Option<&Value>) -> Option<String> {
    match content? {
        Value::String(text) => Some(text.clone()),
        Value::Array(blocks) => {
            let texts: Vec<&str> = blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect();
            (!texts.is_empty()).then(|| texts.concat())
        }
        block => block.get("text").and_then(Value::as_str).map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_text_chunks() {
        let mapper = NativeUpdateMapper::new();
        let thought = mapper
            .classify(&json!({
                "sessionId": "s1",
                "update": {"sessionUpdate": "agent_thought_chunk", "content": {"type": "text", "text": "thinking"}}
            }))
            .unwrap();
        assert_eq!(thought.kind, UpdateKind::Thought);
        assert_eq!(thought.content.as_deref(), Some("thinking"));

        let message = mapper
            .classify(&json!({"sessionUpdate": "agent_message_chunk", "content": {"type": "text", "text": "4"}}))
            .unwrap();
        assert_eq!(message.kind, UpdateKind::Message);
        assert_eq!(message.content.as_deref(), Some("4"));
    }

    #[test]
    fn maps_tool_calls_with_protocol_ids() {
        let mapper = NativeUpdateMapper::new();
        let start = mapper
            .classify(&json!({"update": {
                "sessionUpdate": "tool_call",
                "toolCallId": "call-1",
                "title": "Read file",
                "status": "pending",
                "rawInput": {"path": "a.rs"}
            }}))
            .unwrap();
        assert_eq!(start.call_id.as_deref(), Some("call-1"));
        assert_eq!(start.title.as_deref(), Some("Read file"));
        assert_eq!(start.input, Some(json!({"path": "a.rs"})));

        let done = mapper
            .classify(&json!({"update": {
                "sessionUpdate": "tool_call_update",
                "toolCallId": "call-1",
                "status": "completed",
                "rawOutput": "ok"
            }}))
            .unwrap();
        assert_eq!(done.kind, UpdateKind::ToolCall);
        assert_eq!(done.status.as_deref(), Some("completed"));
        assert_eq!(done.output, Some(json!("ok")));
        assert_eq!(done.title, None);
    }

    #[test]
    fn maps_plan_entries() {
        let plan = NativeUpdateMapper::new()
            .classify(&json!({"update": {
                "sessionUpdate": "plan",
                "entries": [{"content": "step", "priority": "high", "status": "pending"}]
            }}))
            .unwrap();
        assert_eq!(plan.kind, UpdateKind::Plan);
        assert_eq!(plan.entries.len(), 1);
    }

    #[test]
    fn ignores_other_updates() {
        let mapper = NativeUpdateMapper::new();
        assert!(mapper
            .classify(&json!({"update": {"sessionUpdate": "available_commands_update"}}))
            .is_none());
        assert!(mapper.classify(&json!({"jsonrpc": "2.0"})).is_none());
    }
}
