use std::io::Cursor;

use agent_trace::{
    IngestLimits, LineIngestor, NativeUpdateMapper, OutputEventRule, Richness, RuleInterpreter,
    TrajectoryBuilder, TrajectoryStep, UpdateSource,
};
use serde_json::{json, Value};

fn headless_rules() -> Vec<OutputEventRule> {
    serde_json::from_value(json!([
        {"match": {"path": "$.type", "value": "thinking"}, "emitAs": "thought", "extract": {"content": "$.text"}},
        {"match": {"path": "$.type", "value": "tool_use"}, "emitAs": "tool_call", "extract": {"title": "$.name", "status": "'pending'"}},
        {"match": {"path": "$.type", "value": "tool_result"}, "emitAs": "tool_call", "extract": {"title": "$.name", "status": "'completed'"}},
        {"match": {"path": "$.type", "value": "message"}, "emitAs": "message", "extract": {"content": "$.text"}},
        {"match": {"path": "$.type", "value": "message"}, "emitAs": "thought", "extract": {"content": "$.text"}}
    ]))
    .expect("rules")
}

fn run(source: &impl UpdateSource, lines: &[Value]) -> agent_trace::NormalizedTrajectory {
    let mut builder = TrajectoryBuilder::new();
    for (idx, line) in lines.iter().enumerate() {
        if let Some(update) = source.classify(line) {
            builder.push_elapsed(&update, idx as u64 * 10);
        }
    }
    builder.finish(false, None)
}

#[test]
fn headless_stream_normalizes_in_arrival_order() {
    let rules = headless_rules();
    let jsonl = concat!(
        "{\"type\":\"system\",\"session_id\":\"abc\"}\n",
        "{\"type\":\"thinking\",\"text\":\"plan it\"}\n",
        "{\"type\":\"tool_use\",\"name\":\"Bash\"}\n",
        "garbage line\n",
        "{\"type\":\"tool_result\",\"name\":\"Bash\"}\n",
        "{\"type\":\"message\",\"text\":\"done\"}\n",
    );
    let lines: Vec<Value> = LineIngestor::new(Cursor::new(jsonl), IngestLimits::default())
        .filter_map(|record| record.outcome.ok())
        .collect();
    assert_eq!(lines.len(), 5);

    let trajectory = run(&RuleInterpreter::new(&rules), &lines);
    assert_eq!(trajectory.steps.len(), 3);
    assert!(matches!(&trajectory.steps[0], TrajectoryStep::Thought { content, .. } if content == "plan it"));
    match &trajectory.steps[1] {
        TrajectoryStep::ToolCall {
            name,
            status,
            timestamp,
            duration,
            ..
        } => {
            assert_eq!(name, "Bash");
            assert_eq!(status, "completed");
            assert_eq!(*timestamp, 20);
            assert_eq!(*duration, Some(10));
        }
        other => panic!("expected tool call, got {other:?}"),
    }
    assert_eq!(trajectory.output, "done");
    assert_eq!(trajectory.richness, Richness::Full);
    assert!(!trajectory.tool_errors);
}

#[test]
fn native_notifications_share_the_same_trajectory_model() {
    let notifications = vec![
        json!({"sessionId": "s", "update": {"sessionUpdate": "plan", "entries": [{"content": "look", "status": "pending", "priority": "medium"}]}}),
        json!({"sessionId": "s", "update": {"sessionUpdate": "tool_call", "toolCallId": "t1", "title": "Read", "status": "pending"}}),
        json!({"sessionId": "s", "update": {"sessionUpdate": "tool_call_update", "toolCallId": "t1", "status": "in_progress"}}),
        json!({"sessionId": "s", "update": {"sessionUpdate": "tool_call_update", "toolCallId": "t1", "status": "completed", "rawOutput": {"bytes": 12}}}),
        json!({"sessionId": "s", "update": {"sessionUpdate": "agent_message_chunk", "content": {"type": "text", "text": "4"}}}),
    ];

    let trajectory = run(&NativeUpdateMapper::new(), &notifications);
    assert_eq!(trajectory.steps.len(), 3);
    assert!(matches!(&trajectory.steps[0], TrajectoryStep::Plan { entries, .. } if entries.len() == 1));
    assert!(matches!(
        &trajectory.steps[1],
        TrajectoryStep::ToolCall { status, duration: Some(20), output: Some(_), .. } if status == "completed"
    ));
    assert_eq!(trajectory.output, "4");
    assert_eq!(trajectory.richness, Richness::Full);
}

#[test]
fn trajectories_serialize_as_typed_steps() {
    let rules = headless_rules();
    let trajectory = run(
        &RuleInterpreter::new(&rules),
        &[json!({"type": "message", "text": "4"})],
    );
    let value = serde_json::to_value(&trajectory).expect("serialize");
    assert_eq!(
        value,
        json!({
            "steps": [{"type": "message", "content": "4", "timestamp": 0}],
            "output": "4",
            "toolErrors": false,
            "richness": "messages-only"
        })
    );
}
