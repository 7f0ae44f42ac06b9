use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError,
    },
    time::Duration,
};

use agent_trace::IngestLimits;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    config::{AdapterConfig, NativeAgentConfig, SessionMode},
    headless::HeadlessLaunch,
    history::{render_with_history, HistoryTurn},
    native::NativeConnection,
    process::AgentProcess,
    turn::TurnResult,
    SessionError,
};

/// Opaque handle for one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which kind of agent a manager drives.
#[derive(Debug, Clone)]
pub enum AgentBackend {
    /// A headless CLI described by an adapter config.
    Headless(Arc<AdapterConfig>),
    /// An agent speaking the native JSON-RPC session protocol.
    Native(Arc<NativeAgentConfig>),
}

impl AgentBackend {
    pub fn name(&self) -> &str {
        match self {
            AgentBackend::Headless(config) => &config.name,
            AgentBackend::Native(config) => &config.name,
        }
    }
}

impl From<AdapterConfig> for AgentBackend {
    fn from(config: AdapterConfig) -> Self {
        AgentBackend::Headless(Arc::new(config))
    }
}

impl From<NativeAgentConfig> for AgentBackend {
    fn from(config: NativeAgentConfig) -> Self {
        AgentBackend::Native(Arc::new(config))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Prompting,
    Idle,
}

enum Continuation {
    /// Persistent process (stdin delivery) or per-turn processes chained by a resume id.
    Stream {
        process: Option<AgentProcess>,
        resume_id: Option<String>,
    },
    Iterative {
        history: Vec<HistoryTurn>,
    },
    Native {
        connection: Option<NativeConnection>,
    },
}

struct SessionSlot {
    state: SessionState,
    cwd: Option<PathBuf>,
    continuation: Continuation,
    turns: usize,
}

/// Owns every live conversation, keyed by [`SessionId`].
///
/// Distinct sessions run concurrently; turns within one session are serialized by the
/// session's own lock.
pub struct SessionManager {
    backend: AgentBackend,
    env: BTreeMap<String, String>,
    default_timeout: Option<Duration>,
    limits: IngestLimits,
    sessions: std::sync::Mutex<HashMap<SessionId, Arc<Mutex<SessionSlot>>>>,
    next_id: AtomicU64,
}

impl SessionManager {
    pub(crate) fn new(
        backend: AgentBackend,
        env: BTreeMap<String, String>,
        default_timeout: Option<Duration>,
        limits: IngestLimits,
    ) -> Self {
        Self {
            backend,
            env,
            default_timeout,
            limits,
            sessions: std::sync::Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn builder(backend: impl Into<AgentBackend>) -> crate::SessionManagerBuilder {
        crate::SessionManagerBuilder::new(backend)
    }

    pub fn backend(&self) -> &AgentBackend {
        &self.backend
    }

    /// Opens a conversation. Persistent stream processes and native connections are started
    /// here; a failed start is logged and retried by the first `prompt`.
    pub async fn create(&self, cwd: Option<PathBuf>) -> Result<SessionId, SessionError> {
        if let Some(dir) = &cwd {
            if !dir.is_dir() {
                return Err(SessionError::InvalidWorkingDir(dir.clone()));
            }
        }

        let id = SessionId(format!(
            "session-{}",
            self.next_id.fetch_add(1, Ordering::SeqCst) + 1
        ));
        let continuation = match &self.backend {
            AgentBackend::Headless(config) => match config.session_mode {
                SessionMode::Iterative => Continuation::Iterative {
                    history: Vec::new(),
                },
                SessionMode::Stream => {
                    let process = if config.uses_persistent_process() {
                        match self.headless(config, cwd.as_ref()).spawn_persistent().await {
                            Ok(process) => Some(process),
                            Err(err) => {
                                warn!(session_id = %id, error = %err, "agent spawn failed at create");
                                None
                            }
                        }
                    } else {
                        None
                    };
                    Continuation::Stream {
                        process,
                        resume_id: None,
                    }
                }
            },
            AgentBackend::Native(config) => {
                let connection =
                    match NativeConnection::connect(config, cwd.as_deref(), &self.env, self.limits)
                        .await
                    {
                        Ok(connection) => Some(connection),
                        Err(err) => {
                            warn!(session_id = %id, error = %err, "native connect failed at create");
                            None
                        }
                    };
                Continuation::Native { connection }
            }
        };

        let slot = SessionSlot {
            state: SessionState::Created,
            cwd,
            continuation,
            turns: 0,
        };
        self.lock_sessions()
            .insert(id.clone(), Arc::new(Mutex::new(slot)));
        info!(session_id = %id, agent = self.backend.name(), "session created");
        Ok(id)
    }

    /// Runs one turn. Only an unknown session is an `Err`; every agent failure is reported in
    /// the returned [`TurnResult`].
    pub async fn prompt(&self, id: &SessionId, input: &str) -> Result<TurnResult, SessionError> {
        let slot = self
            .slot(id)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
        let mut slot = slot.lock().await;
        slot.state = SessionState::Prompting;
        slot.turns += 1;
        debug!(session_id = %id, turn = slot.turns, "prompt started");

        let SessionSlot {
            cwd, continuation, ..
        } = &mut *slot;
        let result = match (&self.backend, continuation) {
            (
                AgentBackend::Headless(config),
                Continuation::Stream {
                    process,
                    resume_id,
                },
            ) => {
                let launch = self.headless(config, cwd.as_ref());
                if config.uses_persistent_process() {
                    launch.persistent_turn(process, input).await
                } else {
                    let result = launch.one_shot(input, resume_id.as_deref()).await;
                    if let Some(next) = &result.resume_id {
                        *resume_id = Some(next.clone());
                    }
                    result
                }
            }
            (AgentBackend::Headless(config), Continuation::Iterative { history }) => {
                let rendered =
                    render_with_history(config.history_template.as_ref(), history, input);
                let result = self
                    .headless(config, cwd.as_ref())
                    .one_shot(&rendered, None)
                    .await;
                history.push(HistoryTurn {
                    input: input.to_string(),
                    output: result.output_text(),
                });
                result
            }
            (AgentBackend::Native(config), Continuation::Native { connection }) => {
                self.native_turn(config, cwd.as_ref(), connection, input).await
            }
            _ => TurnResult::from_error(crate::TurnError::Protocol(
                "session continuation does not match backend".to_string(),
            )),
        };

        slot.state = SessionState::Idle;
        debug!(
            session_id = %id,
            updates = result.updates.len(),
            errors = result.errors.len(),
            timed_out = result.exit.timed_out,
            "prompt finished"
        );
        Ok(result)
    }

    /// Tears the session down. Unknown or already destroyed ids are ignored.
    pub async fn destroy(&self, id: &SessionId) {
        let Some(slot) = self.lock_sessions().remove(id) else {
            return;
        };
        let mut slot = slot.lock().await;
        match &mut slot.continuation {
            Continuation::Stream { process, .. } => {
                if let Some(mut process) = process.take() {
                    process.close_stdin().await;
                    process.kill().await;
                }
            }
            Continuation::Iterative { history } => history.clear(),
            Continuation::Native { connection } => {
                if let Some(connection) = connection.take() {
                    connection.close().await;
                }
            }
        }
        info!(session_id = %id, turns = slot.turns, "session destroyed");
    }

    /// `None` once the session is destroyed.
    pub fn state(&self, id: &SessionId) -> Option<SessionState> {
        let slot = self.slot(id)?;
        let state = match slot.try_lock() {
            Ok(guard) => guard.state,
            Err(_) => SessionState::Prompting,
        };
        Some(state)
    }

    pub fn active_sessions(&self) -> usize {
        self.lock_sessions().len()
    }

    fn slot(&self, id: &SessionId) -> Option<Arc<Mutex<SessionSlot>>> {
        self.lock_sessions().get(id).cloned()
    }

    fn lock_sessions(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<SessionId, Arc<Mutex<SessionSlot>>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn headless<'a>(
        &'a self,
        config: &'a AdapterConfig,
        cwd: Option<&'a PathBuf>,
    ) -> HeadlessLaunch<'a> {
        HeadlessLaunch {
            config,
            cwd: cwd.map(PathBuf::as_path),
            env: &self.env,
            limits: self.limits,
            timeout: config.timeout().or(self.default_timeout),
        }
    }

    async fn native_turn(
        &self,
        config: &NativeAgentConfig,
        cwd: Option<&PathBuf>,
        connection: &mut Option<NativeConnection>,
        input: &str,
    ) -> TurnResult {
        if !connection.as_ref().is_some_and(NativeConnection::is_alive) {
            if let Some(stale) = connection.take() {
                stale.close().await;
            }
            match NativeConnection::connect(config, cwd.map(PathBuf::as_path), &self.env, self.limits)
                .await
            {
                Ok(fresh) => *connection = Some(fresh),
                Err(err) => return TurnResult::from_error(err),
            }
        }
        let Some(live) = connection.as_mut() else {
            return TurnResult::from_error(crate::TurnError::MissingPipe("connection"));
        };
        live.prompt(input, config.timeout().or(self.default_timeout))
            .await
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("backend", &self.backend.name())
            .field("default_timeout", &self.default_timeout)
            .field("active_sessions", &self.active_sessions())
            .finish()
    }
}
