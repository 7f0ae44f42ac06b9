#[cfg(unix)]
mod unix {
    use std::{
        fs,
        path::{Path, PathBuf},
        sync::Arc,
        time::Duration,
    };

    use agent_capture::{
        load_cases, CaptureCase, CaptureOptions, CaptureRecord, CaptureRunner, FnScorer,
        JsonlSink, ProcessScorer, ScoreOutcome, ScoreRequest,
    };
    use agent_session::{AdapterConfig, SessionManager};
    use agent_trace::{Richness, TrajectoryStep};
    use serde_json::json;
    use tempfile::TempDir;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        fs::write(&path, body).expect("write script");
        let mut perms = fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    const ECHO_AGENT: &str = r#"#!/bin/sh
prompt=""
while [ $# -gt 0 ]; do
  case "$1" in
    -p) prompt="$2"; shift 2 ;;
    *) shift ;;
  esac
done
case "$prompt" in
  *fail*) echo "agent exploded" >&2; exit 4 ;;
esac
echo '{"type":"tool","name":"Read","status":"pending"}'
echo '{"type":"tool","name":"Read","status":"completed"}'
echo "{\"type\":\"assistant\",\"text\":\"thinking about $prompt\"}"
echo "{\"type\":\"result\",\"result\":\"answer: $prompt\"}"
"#;

    fn manager(script: &Path) -> Arc<SessionManager> {
        let doc = json!({
            "version": 2,
            "name": "echo-agent",
            "command": [script.to_string_lossy()],
            "sessionMode": "stream",
            "prompt": {"flag": "-p"},
            "output": {"flag": "--format", "value": "jsonl"},
            "outputEvents": [
                {"match": {"path": "$.type", "value": "assistant"}, "emitAs": "message", "extract": {"content": "$.text"}},
                {"match": {"path": "$.type", "value": "tool"}, "emitAs": "tool_call", "extract": {"title": "$.name", "status": "$.status"}}
            ],
            "result": {"matchPath": "$.type", "matchValue": "result", "contentPath": "$.result"}
        });
        let config = AdapterConfig::from_json_str(&doc.to_string()).expect("adapter");
        let manager = SessionManager::builder(config)
            .timeout(Some(Duration::from_secs(10)))
            .build()
            .expect("manager");
        Arc::new(manager)
    }

    fn read_records(path: &Path) -> Vec<CaptureRecord> {
        fs::read_to_string(path)
            .expect("results")
            .lines()
            .map(|line| serde_json::from_str(line).expect("record"))
            .collect()
    }

    #[tokio::test]
    async fn captures_scores_and_appends_each_case() {
        let dir = TempDir::new().expect("temp dir");
        let script = write_script(dir.path(), "echo-agent", ECHO_AGENT);
        let cases_path = dir.path().join("cases.jsonl");
        fs::write(
            &cases_path,
            concat!(
                "{\"id\":\"single\",\"input\":\"2+2\",\"expected\":\"answer: 2+2\"}\n",
                "{\"id\":\"multi\",\"input\":[\"hello\",\"again\"],\"expected\":\"nope\",\"metadata\":{\"tier\":2}}\n",
                "{\"id\":\"broken\",\"input\":\"please fail\"}\n",
            ),
        )
        .expect("cases");
        let cases = load_cases(&cases_path).await.expect("load");

        let scorer = FnScorer::new("exact", |req: &ScoreRequest| {
            let pass = req.expected.as_deref() == Some(req.output.as_str());
            Ok(ScoreOutcome::new(pass, if pass { 1.0 } else { 0.0 }, "exact match"))
        });
        let options = CaptureOptions::new()
            .with_concurrency(2)
            .with_cwd(dir.path())
            .with_scorer(Arc::new(scorer));
        let runner = CaptureRunner::new(manager(&script), options);
        let results_path = dir.path().join("results.jsonl");
        let sink = JsonlSink::open(&results_path).await.expect("sink");

        let summary = runner.run(cases, &sink).await;
        assert_eq!(summary.total, 3);
        assert_eq!(summary.written, 3);
        assert_eq!(summary.with_errors, 1);
        assert_eq!(summary.scored, 3);
        assert_eq!(summary.passed, 1);
        assert!(summary.write_failures.is_empty());

        let mut records = read_records(&results_path);
        records.sort_by(|a, b| a.id.cmp(&b.id));
        let [broken, multi, single] = records.as_slice() else {
            panic!("expected three records, got {}", records.len());
        };

        assert_eq!(single.output, "answer: 2+2");
        assert_eq!(single.timing.turns, 1);
        assert_eq!(single.richness, Richness::Full);
        assert!(!single.tool_errors);
        assert!(single.errors.is_empty());
        assert!(single.score.as_ref().is_some_and(|score| score.pass));
        assert!(matches!(
            &single.trajectory[0],
            TrajectoryStep::ToolCall { name, status, .. } if name == "Read" && status == "completed"
        ));

        assert_eq!(multi.timing.turns, 2);
        assert_eq!(multi.output, "answer: again");
        assert_eq!(multi.metadata, Some(json!({"tier": 2})));
        let messages: Vec<&str> = multi
            .trajectory
            .iter()
            .filter_map(|step| match step {
                TrajectoryStep::Message { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(messages, vec!["thinking about hello", "thinking about again"]);
        assert!(multi.score.as_ref().is_some_and(|score| !score.pass));

        assert!(broken.tool_errors);
        assert_eq!(broken.richness, Richness::Minimal);
        assert!(broken.errors.iter().any(|err| err.contains("agent exploded")));
        assert_eq!(broken.output, "");
    }

    #[tokio::test]
    async fn process_scorer_failures_become_score_errors() {
        let dir = TempDir::new().expect("temp dir");
        let script = write_script(dir.path(), "echo-agent", ECHO_AGENT);
        let judge = write_script(
            dir.path(),
            "judge",
            r#"#!/bin/sh
read -r payload
case "$payload" in
  *'"output":"answer: ok"'*) echo '{"pass":true,"score":0.9,"reasoning":"fine","outcome":{"checked":true}}' ;;
  *) echo "cannot judge" >&2; exit 1 ;;
esac
"#,
        );
        let options = CaptureOptions::new().with_scorer(Arc::new(ProcessScorer::new([judge
            .to_string_lossy()
            .into_owned()])));
        let runner = CaptureRunner::new(manager(&script), options);

        let good = runner.capture_case(&CaptureCase::new("good", "ok")).await;
        let score = good.score.expect("score");
        assert!(score.pass);
        assert_eq!(score.outcome, Some(json!({"checked": true})));
        assert_eq!(good.score_error, None);

        let bad = runner.capture_case(&CaptureCase::new("bad", "other")).await;
        assert_eq!(bad.score, None);
        assert!(bad
            .score_error
            .as_deref()
            .is_some_and(|err| err.contains("cannot judge")));
    }

    #[tokio::test]
    async fn invalid_working_directory_is_recorded_not_fatal() {
        let dir = TempDir::new().expect("temp dir");
        let script = write_script(dir.path(), "echo-agent", ECHO_AGENT);
        let options = CaptureOptions::new().with_cwd(dir.path().join("missing"));
        let runner = CaptureRunner::new(manager(&script), options);

        let record = runner.capture_case(&CaptureCase::new("lost", "hi")).await;
        assert_eq!(record.timing.turns, 0);
        assert!(record.tool_errors);
        assert_eq!(record.errors.len(), 1);
        assert!(record.trajectory.is_empty());
    }
}
