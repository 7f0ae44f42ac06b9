//! Sessions with agents that speak the native JSON-RPC session protocol on stdio.
//!
//! Flow: `initialize` → `session/new` once per conversation, then one `session/prompt` per
//! turn. The agent streams `session/update` notifications while a prompt is in flight; the
//! prompt's response is the turn's result marker.

mod jsonrpc;

use std::{collections::BTreeMap, path::Path, time::Duration};

use agent_trace::{IngestLimits, NativeUpdateMapper, UpdateSource};
use serde_json::{json, Value};
use tokio::time;
use tracing::{debug, warn};

use crate::{
    config::NativeAgentConfig,
    turn::{TimedUpdate, TurnResult},
    TurnError,
};

use self::jsonrpc::{AgentMessage, Inbox, JsonRpcTransport, RpcError, METHOD_NOT_FOUND};

pub const PROTOCOL_VERSION: u64 = 1;

pub(crate) const METHOD_INITIALIZE: &str = "initialize";
pub(crate) const METHOD_SESSION_NEW: &str = "session/new";
pub(crate) const METHOD_SESSION_PROMPT: &str = "session/prompt";
pub(crate) const METHOD_SESSION_CANCEL: &str = "session/cancel";
pub(crate) const METHOD_SESSION_UPDATE: &str = "session/update";
pub(crate) const METHOD_REQUEST_PERMISSION: &str = "session/request_permission";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const EXIT_SETTLE: Duration = Duration::from_millis(500);

/// One live native agent process bound to one protocol session.
pub(crate) struct NativeConnection {
    transport: JsonRpcTransport,
    inbox: Inbox,
    session_id: String,
    mapper: NativeUpdateMapper,
    alive: bool,
}

impl NativeConnection {
    pub(crate) async fn connect(
        config: &NativeAgentConfig,
        cwd: Option<&Path>,
        env: &BTreeMap<String, String>,
        limits: IngestLimits,
    ) -> Result<Self, TurnError> {
        let (transport, inbox) = JsonRpcTransport::spawn(&config.command, cwd, env, limits).await?;
        let mut connection = Self {
            transport,
            inbox,
            session_id: String::new(),
            mapper: NativeUpdateMapper::new(),
            alive: true,
        };

        let init = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientCapabilities": {
                "fs": { "readTextFile": false, "writeTextFile": false },
                "terminal": false
            }
        });
        connection.call(METHOD_INITIALIZE, init).await?;

        let cwd = match cwd {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().unwrap_or_default(),
        };
        let created = connection
            .call(
                METHOD_SESSION_NEW,
                json!({ "cwd": cwd.to_string_lossy(), "mcpServers": [] }),
            )
            .await?;
        connection.session_id = created
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TurnError::Protocol("session/new response lacks sessionId".into()))?;
        debug!(agent = %config.name, session_id = %connection.session_id, "native session opened");
        Ok(connection)
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive
    }

    /// Handshake request; agent-initiated requests are still answered while waiting.
    async fn call(&mut self, method: &str, params: Value) -> Result<Value, TurnError> {
        let (_, mut rx) = self.transport.request(method, params).await?;
        let deadline = time::Instant::now() + HANDSHAKE_TIMEOUT;
        loop {
            tokio::select! {
                response = &mut rx => {
                    return match response {
                        Ok(result) => result.map_err(TurnError::from),
                        Err(_) => Err(RpcError::ChannelClosed.into()),
                    };
                }
                message = self.inbox.recv() => match message {
                    Some((_, AgentMessage::Request { id, method, params })) => {
                        self.answer(id, &method, &params);
                    }
                    Some(_) => {}
                    // Reader is gone; a response it delivered may still be waiting in `rx`.
                    None => {
                        return match rx.try_recv() {
                            Ok(result) => result.map_err(TurnError::from),
                            Err(_) => Err(RpcError::ChannelClosed.into()),
                        };
                    }
                },
                _ = time::sleep_until(deadline) => {
                    return Err(TurnError::Protocol(format!("{method} timed out after {HANDSHAKE_TIMEOUT:?}")));
                }
            }
        }
    }

    /// Runs one `session/prompt`, collecting every update until its response arrives.
    pub(crate) async fn prompt(&mut self, input: &str, timeout: Option<Duration>) -> TurnResult {
        let mut result = TurnResult::empty();
        let params = json!({
            "sessionId": self.session_id,
            "prompt": [{ "type": "text", "text": input }]
        });
        let mut rx = match self.transport.request(METHOD_SESSION_PROMPT, params).await {
            Ok((_, rx)) => rx,
            Err(err) => {
                result.errors.push(err.into());
                self.mark_dead(&mut result).await;
                return result;
            }
        };

        let deadline = timeout.map(|timeout| time::Instant::now() + timeout);
        loop {
            tokio::select! {
                response = &mut rx => {
                    self.drain_inbox(&mut result);
                    self.settle_prompt(response.unwrap_or(Err(RpcError::ChannelClosed)), &mut result).await;
                    return result;
                }
                message = self.inbox.recv() => match message {
                    Some((at, message)) => self.handle(at, message, &mut result),
                    None => {
                        let response = rx.try_recv().unwrap_or(Err(RpcError::ChannelClosed));
                        self.settle_prompt(response, &mut result).await;
                        return result;
                    }
                },
                _ = sleep_until_opt(deadline) => {
                    self.time_out(timeout.unwrap_or_default(), &mut result).await;
                    return result;
                }
            }
        }
    }

    async fn settle_prompt(&mut self, response: Result<Value, RpcError>, result: &mut TurnResult) {
        match response {
            Ok(value) => {
                let stop_reason = value
                    .get("stopReason")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                debug!(session_id = %self.session_id, stop_reason, "prompt finished");
            }
            Err(RpcError::ChannelClosed) => {
                result.errors.push(TurnError::PrematureExit);
                self.mark_dead(result).await;
            }
            Err(err) => result.errors.push(err.into()),
        }
    }

    fn drain_inbox(&mut self, result: &mut TurnResult) {
        while let Ok((at, message)) = self.inbox.try_recv() {
            self.handle(at, message, result);
        }
    }

    fn handle(&mut self, at: std::time::Instant, message: AgentMessage, result: &mut TurnResult) {
        match message {
            AgentMessage::Notification { method, params } if method == METHOD_SESSION_UPDATE => {
                let for_us = params
                    .get("sessionId")
                    .and_then(Value::as_str)
                    .map_or(true, |id| id == self.session_id);
                if !for_us {
                    return;
                }
                if let Some(update) = self.mapper.classify(&params) {
                    result.updates.push(TimedUpdate { at, update });
                }
            }
            AgentMessage::Notification { method, .. } => {
                debug!(method, "ignoring agent notification");
            }
            AgentMessage::Request { id, method, params } => self.answer(id, &method, &params),
        }
    }

    fn answer(&self, id: Value, method: &str, params: &Value) {
        let sent = if method == METHOD_REQUEST_PERMISSION {
            self.transport.respond(id, permission_outcome(params))
        } else {
            debug!(method, "rejecting unsupported agent request");
            self.transport
                .respond_error(id, METHOD_NOT_FOUND, &format!("method not found: {method}"))
        };
        if let Err(err) = sent {
            warn!(error = %err, method, "failed to answer agent request");
        }
    }

    async fn time_out(&mut self, timeout: Duration, result: &mut TurnResult) {
        warn!(session_id = %self.session_id, ?timeout, "native prompt timed out");
        let _ = self
            .transport
            .notify(METHOD_SESSION_CANCEL, json!({ "sessionId": self.session_id }));
        self.drain_inbox(result);
        let mut exit = self.transport.kill().await;
        exit.timed_out = true;
        result.exit = exit;
        self.alive = false;
        result.errors.push(TurnError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        });
    }

    async fn mark_dead(&mut self, result: &mut TurnResult) {
        self.alive = false;
        let exit = match self.transport.wait_exit(EXIT_SETTLE).await {
            Some(exit) => exit,
            None => self.transport.kill().await,
        };
        result.exit = exit;
        if !exit.success() {
            result.errors.push(TurnError::NonZeroExit {
                code: exit.exit_code,
                signal: exit.signal,
                stderr: self.transport.stderr_tail().await,
            });
        }
    }

    /// Ends the protocol session and kills the agent.
    pub(crate) async fn close(mut self) {
        if self.alive {
            let _ = self
                .transport
                .notify(METHOD_SESSION_CANCEL, json!({ "sessionId": self.session_id }));
        }
        self.transport.kill().await;
    }
}

async fn sleep_until_opt(deadline: Option<time::Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Picks the first allow option, else the first option, else cancels.
pub(crate) fn permission_outcome(params: &Value) -> Value {
    let options = params
        .get("options")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let is_allow = |option: &&Value| {
        option
            .get("kind")
            .and_then(Value::as_str)
            .is_some_and(|kind| kind.starts_with("allow"))
    };
    let chosen = options
        .iter()
        .find(is_allow)
        .or_else(|| options.first())
        .and_then(|option| option.get("optionId").cloned());

    match chosen {
        Some(option_id) => json!({ "outcome": { "outcome": "selected", "optionId": option_id } }),
        None => json!({ "outcome": { "outcome": "cancelled" } }),
    }
}
