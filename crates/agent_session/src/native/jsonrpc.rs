use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    process::Stdio,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use agent_trace::{AsyncLineIngestor, IngestLimits};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::{
    io::AsyncWriteExt,
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
    time,
};
use tracing::{debug, warn};

use crate::{
    process::{
        apply_env, drain_stderr, kill_process_tree, kill_tree, settle_stderr, spawn_with_retry,
        ExitInfo, EXIT_GRACE,
    },
    TurnError,
};

pub(crate) type RequestId = u64;

pub(crate) const METHOD_NOT_FOUND: i64 = -32601;
const REQUEST_CANCELLED: i64 = -32800;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub(crate) enum RpcError {
    #[error("agent returned error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("request was cancelled")]
    Cancelled,
    #[error("agent connection closed")]
    ChannelClosed,
    #[error("malformed response: {0}")]
    Transport(String),
}

impl From<RpcError> for TurnError {
    fn from(err: RpcError) -> Self {
        TurnError::Protocol(err.to_string())
    }
}

/// A message the agent initiated.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AgentMessage {
    Notification {
        method: String,
        params: Value,
    },
    /// A request the client must answer; `id` is echoed back verbatim.
    Request {
        id: Value,
        method: String,
        params: Value,
    },
}

pub(crate) type Inbox = mpsc::UnboundedReceiver<(Instant, AgentMessage)>;

type PendingRequests = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Result<Value, RpcError>>>>>;

/// Line-delimited JSON-RPC 2.0 over a child's stdio.
pub(crate) struct JsonRpcTransport {
    writer: mpsc::UnboundedSender<String>,
    pending: PendingRequests,
    next_id: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<()>>,
    child: Child,
    stderr_tail: Arc<std::sync::Mutex<Vec<u8>>>,
    exited: Option<ExitInfo>,
}

impl JsonRpcTransport {
    pub(crate) async fn spawn(
        command: &[String],
        cwd: Option<&Path>,
        env: &BTreeMap<String, String>,
        limits: IngestLimits,
    ) -> Result<(Self, Inbox), TurnError> {
        let Some((program, args)) = command.split_first() else {
            return Err(TurnError::EmptyCommand);
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        apply_env(&mut cmd, env);

        let mut child = spawn_with_retry(&mut cmd, program).await?;
        let stdout = child
            .stdout
            .take()
            .ok_or(TurnError::MissingPipe("stdout"))?;
        let stdin = child.stdin.take().ok_or(TurnError::MissingPipe("stdin"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(TurnError::MissingPipe("stderr"))?;

        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let stderr_tail = Arc::new(std::sync::Mutex::new(Vec::new()));

        let tasks = vec![
            tokio::spawn(writer_task(stdin, writer_rx)),
            tokio::spawn(reader_task(stdout, limits, pending.clone(), inbox_tx)),
        ];
        let stderr_task = tokio::spawn(drain_stderr(stderr, stderr_tail.clone()));

        Ok((
            Self {
                writer: writer_tx,
                pending,
                next_id: AtomicU64::new(1),
                tasks,
                stderr_task: Some(stderr_task),
                child,
                stderr_tail,
                exited: None,
            },
            inbox,
        ))
    }

    pub(crate) async fn request(
        &self,
        method: &str,
        params: Value,
    ) -> Result<(RequestId, oneshot::Receiver<Result<Value, RpcError>>), RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self.writer.send(message.to_string()).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(RpcError::ChannelClosed);
        }
        debug!(id, method, "sent request");
        Ok((id, rx))
    }

    pub(crate) fn notify(&self, method: &str, params: Value) -> Result<(), RpcError> {
        let message = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        });
        self.writer
            .send(message.to_string())
            .map_err(|_| RpcError::ChannelClosed)
    }

    pub(crate) fn respond(&self, id: Value, result: Value) -> Result<(), RpcError> {
        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result
        });
        self.writer
            .send(message.to_string())
            .map_err(|_| RpcError::ChannelClosed)
    }

    pub(crate) fn respond_error(&self, id: Value, code: i64, text: &str) -> Result<(), RpcError> {
        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": text }
        });
        self.writer
            .send(message.to_string())
            .map_err(|_| RpcError::ChannelClosed)
    }

    /// Exit status if the agent is gone, waiting at most `grace`.
    pub(crate) async fn wait_exit(&mut self, grace: Duration) -> Option<ExitInfo> {
        if self.exited.is_some() {
            return self.exited;
        }
        match time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.exited = Some(ExitInfo::from_status(status));
                self.exited
            }
            _ => None,
        }
    }

    pub(crate) async fn kill(&mut self) -> ExitInfo {
        if let Some(exit) = self.exited {
            return exit;
        }
        kill_tree(self.child.id()).await;
        if let Err(err) = self.child.start_kill() {
            debug!(error = %err, "agent kill failed; process may have exited");
        }
        let exit = self.wait_exit(EXIT_GRACE).await.unwrap_or_default();
        self.exited = Some(exit);
        exit
    }

    pub(crate) async fn stderr_tail(&mut self) -> String {
        settle_stderr(&mut self.stderr_task, &self.stderr_tail).await
    }
}

impl Drop for JsonRpcTransport {
    fn drop(&mut self) {
        for handle in &self.tasks {
            handle.abort();
        }
        if let Some(handle) = &self.stderr_task {
            handle.abort();
        }
        if self.exited.is_none() && matches!(self.child.try_wait(), Ok(None)) {
            kill_process_tree(self.child.id());
            let _ = self.child.start_kill();
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    id: Value,
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug)]
enum Incoming {
    Response(RpcResponse),
    Agent(AgentMessage),
}

async fn writer_task(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(message) = rx.recv().await {
        if stdin.write_all(message.as_bytes()).await.is_err() {
            break;
        }
        if stdin.write_all(b"\n").await.is_err() {
            break;
        }
        let _ = stdin.flush().await;
    }

    let _ = stdin.shutdown().await;
}

async fn reader_task(
    stdout: ChildStdout,
    limits: IngestLimits,
    pending: PendingRequests,
    inbox: mpsc::UnboundedSender<(Instant, AgentMessage)>,
) {
    let mut ingestor = AsyncLineIngestor::new(stdout, limits);
    while let Some(record) = ingestor.next_record().await {
        let value = match record.outcome {
            Ok(value) => value,
            Err(err) => {
                warn!(line_number = record.line_number, error = %err, "skipping malformed agent line");
                continue;
            }
        };

        match decode_message(value) {
            Some(Incoming::Response(response)) => handle_response(response, &pending).await,
            Some(Incoming::Agent(message)) => {
                let _ = inbox.send((Instant::now(), message));
            }
            None => warn!("received malformed JSON-RPC message"),
        }
    }

    let mut guard = pending.lock().await;
    for (_, tx) in guard.drain() {
        let _ = tx.send(Err(RpcError::ChannelClosed));
    }
}

fn decode_message(value: Value) -> Option<Incoming> {
    let method = value.get("method").and_then(Value::as_str).map(str::to_string);
    let id = value.get("id").cloned();
    match (method, id) {
        (Some(method), None) => Some(Incoming::Agent(AgentMessage::Notification {
            method,
            params: value.get("params").cloned().unwrap_or(Value::Null),
        })),
        (Some(method), Some(id)) => Some(Incoming::Agent(AgentMessage::Request {
            id,
            method,
            params: value.get("params").cloned().unwrap_or(Value::Null),
        })),
        (None, Some(_)) => serde_json::from_value(value).ok().map(Incoming::Response),
        (None, None) => None,
    }
}

async fn handle_response(response: RpcResponse, pending: &PendingRequests) {
    let Some(id) = parse_request_id(&response.id) else {
        warn!("received response without numeric id");
        return;
    };

    let sender = { pending.lock().await.remove(&id) };
    let Some(tx) = sender else {
        return;
    };

    if let Some(err) = response.error {
        let mapped = if err.code == REQUEST_CANCELLED {
            RpcError::Cancelled
        } else {
            RpcError::Rpc {
                code: err.code,
                message: err.message,
            }
        };
        let _ = tx.send(Err(mapped));
    } else if let Some(result) = response.result {
        let _ = tx.send(Ok(result));
    } else {
        let _ = tx.send(Err(RpcError::Transport(
            "response missing result and error".into(),
        )));
    }
}

fn parse_request_id(value: &Value) -> Option<RequestId> {
    if let Some(num) = value.as_u64() {
        return Some(num);
    }

    value.as_str().and_then(|s| s.parse::<RequestId>().ok())
}
