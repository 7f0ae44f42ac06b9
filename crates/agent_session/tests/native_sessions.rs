#[cfg(unix)]
mod unix {
    use std::{fs, path::Path, path::PathBuf};

    use agent_session::{NativeAgentConfig, SessionManager, TurnError};
    use agent_trace::{Richness, TrajectoryBuilder, TrajectoryStep, UpdateKind};
    use serde_json::json;
    use tempfile::TempDir;

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-native-agent");
        fs::write(&path, body).expect("write script");
        let mut perms = fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    const HANDSHAKE: &str = r#"#!/bin/sh
read -r _init
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":1,"agentCapabilities":{}}}'
read -r _new
echo '{"jsonrpc":"2.0","id":2,"result":{"sessionId":"sess-1"}}'
"#;

    const TURN_LOOP: &str = r#"id=3
while IFS= read -r _prompt; do
  echo '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"sess-1","update":{"sessionUpdate":"agent_thought_chunk","content":{"type":"text","text":"thinking"}}}}'
  echo '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"other","update":{"sessionUpdate":"agent_message_chunk","content":{"type":"text","text":"not mine"}}}}'
  echo '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"sess-1","update":{"sessionUpdate":"tool_call","toolCallId":"call-1","title":"Edit file","status":"pending","rawInput":{"path":"a.txt"}}}}'
  echo '{"jsonrpc":"2.0","id":"fs-1","method":"fs/read_text_file","params":{"path":"a.txt"}}'
  IFS= read -r fs_reply
  case "$fs_reply" in
    *-32601*) echo '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"sess-1","update":{"sessionUpdate":"agent_message_chunk","content":{"type":"text","text":"fs rejected"}}}}' ;;
  esac
  echo '{"jsonrpc":"2.0","id":"perm-1","method":"session/request_permission","params":{"sessionId":"sess-1","options":[{"optionId":"reject","kind":"reject_once"},{"optionId":"allow","kind":"allow_once"}]}}'
  IFS= read -r permission
  case "$permission" in
    *'"optionId":"allow"'*) status=completed ;;
    *) status=in_progress ;;
  esac
  echo "{\"jsonrpc\":\"2.0\",\"method\":\"session/update\",\"params\":{\"sessionId\":\"sess-1\",\"update\":{\"sessionUpdate\":\"tool_call_update\",\"toolCallId\":\"call-1\",\"status\":\"$status\",\"rawOutput\":{\"ok\":true}}}}"
  echo '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"sess-1","update":{"sessionUpdate":"plan","entries":[{"content":"edit a.txt","status":"completed"}]}}}'
  echo '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"sess-1","update":{"sessionUpdate":"agent_message_chunk","content":{"type":"text","text":"done"}}}}'
  echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"stopReason\":\"end_turn\"}}"
  id=$((id+1))
done
"#;

    #[tokio::test]
    async fn native_prompt_collects_updates_until_the_response() {
        let dir = TempDir::new().expect("temp dir");
        let script = write_script(dir.path(), &format!("{HANDSHAKE}{TURN_LOOP}"));
        let config = NativeAgentConfig::new("fake-native", [script.to_string_lossy()]);
        let manager = SessionManager::builder(config).build().expect("manager");

        let id = manager.create(Some(dir.path().to_path_buf())).await.expect("create");
        let turn = manager.prompt(&id, "edit the file").await.expect("known session");

        assert!(turn.errors.is_empty(), "errors: {:?}", turn.errors);
        assert!(!turn.timed_out());
        assert_eq!(turn.output, None);
        let kinds: Vec<UpdateKind> = turn.updates.iter().map(|timed| timed.update.kind).collect();
        assert_eq!(
            kinds,
            vec![
                UpdateKind::Thought,
                UpdateKind::ToolCall,
                UpdateKind::Message,
                UpdateKind::ToolCall,
                UpdateKind::Plan,
                UpdateKind::Message,
            ]
        );
        assert_eq!(turn.output_text(), "fs rejected\ndone");

        let mut builder = TrajectoryBuilder::new();
        turn.replay_into(&mut builder);
        let trajectory = builder.finish(turn.timed_out(), None);
        assert_eq!(trajectory.richness, Richness::Full);
        assert!(!trajectory.tool_errors);
        let tool = trajectory
            .steps
            .iter()
            .find(|step| matches!(step, TrajectoryStep::ToolCall { .. }))
            .expect("tool step");
        let TrajectoryStep::ToolCall {
            name,
            status,
            input,
            output,
            ..
        } = tool
        else {
            unreachable!();
        };
        assert_eq!(name, "Edit file");
        assert_eq!(status, "completed");
        assert_eq!(input, &Some(json!({"path": "a.txt"})));
        assert_eq!(output, &Some(json!({"ok": true})));

        let second = manager.prompt(&id, "again").await.expect("second turn");
        assert!(second.errors.is_empty(), "errors: {:?}", second.errors);
        assert_eq!(second.output_text(), "fs rejected\ndone");
        manager.destroy(&id).await;
    }

    #[tokio::test]
    async fn native_timeout_kills_the_agent() {
        let dir = TempDir::new().expect("temp dir");
        let script = write_script(
            dir.path(),
            &format!(
                "{HANDSHAKE}read -r _prompt\necho '{}'\nexec sleep 30\n",
                r#"{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"sess-1","update":{"sessionUpdate":"agent_message_chunk","content":{"type":"text","text":"partial"}}}}"#
            ),
        );
        let mut config = NativeAgentConfig::new("fake-native", [script.to_string_lossy()]);
        config.timeout = Some(300);
        let manager = SessionManager::builder(config).build().expect("manager");

        let id = manager.create(None).await.expect("create");
        let turn = manager.prompt(&id, "hang").await.expect("known session");
        assert!(turn.timed_out());
        assert!(turn.errors.contains(&TurnError::Timeout { timeout_ms: 300 }));
        assert_eq!(turn.output_text(), "partial");
        manager.destroy(&id).await;
    }

    #[tokio::test]
    async fn failed_handshake_is_reported_by_the_first_prompt() {
        let dir = TempDir::new().expect("temp dir");
        let script = write_script(dir.path(), "#!/bin/sh\nexit 1\n");
        let config = NativeAgentConfig::new("broken", [script.to_string_lossy()]);
        let manager = SessionManager::builder(config).build().expect("manager");

        let id = manager.create(None).await.expect("create is not fatal");
        let turn = manager.prompt(&id, "hi").await.expect("known session");
        assert!(matches!(turn.errors.as_slice(), [TurnError::Protocol(_)]));
        assert!(turn.updates.is_empty());
    }
}
