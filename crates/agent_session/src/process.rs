use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    process::{ExitStatus, Stdio},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use agent_trace::{AsyncLineIngestor, IngestLimits, LineRecord};
use serde::Serialize;
use serde_json::Value;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::{Child, ChildStdin, Command},
    sync::mpsc,
    task::JoinHandle,
    time,
};
use tracing::{debug, warn};

use crate::{command::AgentInvocation, TurnError};

const STDERR_TAIL_BYTES: usize = 8 * 1024;
pub(crate) const EXIT_GRACE: Duration = Duration::from_secs(2);
const STDERR_SETTLE: Duration = Duration::from_millis(500);

/// How an agent process ended (or did not) for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitInfo {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timed_out: bool,
}

impl ExitInfo {
    pub(crate) fn from_status(status: ExitStatus) -> Self {
        Self {
            exit_code: status.code(),
            signal: exit_signal(status),
            timed_out: false,
        }
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.signal.is_none() && self.exit_code.map_or(true, |code| code == 0)
    }
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: ExitStatus) -> Option<i32> {
    None
}

/// One stdout line stamped with its arrival time.
pub(crate) type TimedRecord = (Instant, LineRecord<Value>);

pub(crate) enum NextRecord {
    Record(TimedRecord),
    Eof,
    Deadline,
}

pub(crate) fn apply_env(command: &mut Command, env: &BTreeMap<String, String>) {
    for (k, v) in env {
        command.env(k, v);
    }
}

pub(crate) async fn spawn_with_retry(command: &mut Command, program: &str) -> Result<Child, TurnError> {
    let mut backoff = Duration::from_millis(2);
    for attempt in 0..5 {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(source) => {
                let is_busy = matches!(source.kind(), std::io::ErrorKind::ExecutableFileBusy)
                    || source.raw_os_error() == Some(26);
                if is_busy && attempt < 4 {
                    time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, Duration::from_millis(50));
                    continue;
                }
                return Err(TurnError::Spawn {
                    program: program.to_string(),
                    message: source.to_string(),
                });
            }
        }
    }

    Err(TurnError::Spawn {
        program: program.to_string(),
        message: "executable stayed busy after retries".to_string(),
    })
}

/// Kills `pid` and every process descended from it, children first.
///
/// Agents are often wrapper scripts (`sh`, `npx`) whose real worker is a grandchild; killing
/// only the direct child would leave it running. Must be called before the root is reaped.
pub(crate) fn kill_process_tree(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    let root = sysinfo::Pid::from_u32(pid);

    let mut sys = sysinfo::System::new();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);

    let mut children: HashMap<sysinfo::Pid, Vec<sysinfo::Pid>> = HashMap::new();
    for (pid, process) in sys.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut tree = Vec::new();
    collect_tree(root, &children, &mut tree);
    for pid in tree.into_iter().rev() {
        if let Some(process) = sys.process(pid) {
            if process.kill_with(sysinfo::Signal::Kill) != Some(true) {
                let _ = process.kill();
            }
        }
    }
}

fn collect_tree(
    pid: sysinfo::Pid,
    children: &HashMap<sysinfo::Pid, Vec<sysinfo::Pid>>,
    out: &mut Vec<sysinfo::Pid>,
) {
    out.push(pid);
    if let Some(kids) = children.get(&pid) {
        for kid in kids {
            collect_tree(*kid, children, out);
        }
    }
}

/// [`kill_process_tree`] off the async worker threads.
pub(crate) async fn kill_tree(pid: Option<u32>) {
    if let Err(err) = tokio::task::spawn_blocking(move || kill_process_tree(pid)).await {
        debug!(error = %err, "process tree kill task failed");
    }
}

/// Keeps the last `STDERR_TAIL_BYTES` of a stream.
pub(crate) async fn drain_stderr<R>(mut reader: R, tail: Arc<Mutex<Vec<u8>>>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let Ok(mut guard) = tail.lock() else {
            break;
        };
        guard.extend_from_slice(&chunk[..n]);
        if guard.len() > STDERR_TAIL_BYTES {
            let excess = guard.len() - STDERR_TAIL_BYTES;
            guard.drain(..excess);
        }
    }
}

/// Lets the drain task reach EOF (bounded by `STDERR_SETTLE`) before taking the tail.
pub(crate) async fn settle_stderr(task: &mut Option<JoinHandle<()>>, tail: &Arc<Mutex<Vec<u8>>>) -> String {
    if let Some(handle) = task.take() {
        let _ = time::timeout(STDERR_SETTLE, handle).await;
    }
    take_stderr(tail)
}

pub(crate) fn take_stderr(tail: &Arc<Mutex<Vec<u8>>>) -> String {
    match tail.lock() {
        Ok(mut guard) => String::from_utf8_lossy(&std::mem::take(&mut *guard))
            .trim_end()
            .to_string(),
        Err(_) => String::new(),
    }
}

/// A spawned headless agent with its stdout decoded into JSON line records on a background task.
pub(crate) struct AgentProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    records: mpsc::UnboundedReceiver<TimedRecord>,
    stderr_tail: Arc<Mutex<Vec<u8>>>,
    reader_task: JoinHandle<()>,
    stderr_task: Option<JoinHandle<()>>,
    stdin_task: Option<JoinHandle<()>>,
    exited: Option<ExitInfo>,
}

impl AgentProcess {
    pub(crate) async fn spawn(
        invocation: &AgentInvocation,
        cwd: Option<&Path>,
        env: &BTreeMap<String, String>,
        limits: IngestLimits,
    ) -> Result<Self, TurnError> {
        if invocation.program.trim().is_empty() {
            return Err(TurnError::EmptyCommand);
        }

        let wants_stdin = invocation.stdin.is_some() || invocation.keep_stdin_open;
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(if wants_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        apply_env(&mut command, env);

        debug!(program = %invocation.program, args = ?invocation.args, "spawning agent");
        let mut child = spawn_with_retry(&mut command, &invocation.program).await?;

        let stdout = child
            .stdout
            .take()
            .ok_or(TurnError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(TurnError::MissingPipe("stderr"))?;
        let mut stdin = child.stdin.take();

        let (tx, records) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(async move {
            let mut ingestor = AsyncLineIngestor::new(stdout, limits);
            while let Some(record) = ingestor.next_record().await {
                if tx.send((Instant::now(), record)).is_err() {
                    break;
                }
            }
        });
        let stderr_tail = Arc::new(Mutex::new(Vec::new()));
        let stderr_task = tokio::spawn(drain_stderr(stderr, stderr_tail.clone()));

        // A prompt delivered at launch is written on its own task so an agent that never reads
        // stdin cannot stall the turn past its deadline.
        let stdin_task = match invocation.stdin.clone() {
            Some(text) => {
                let pipe = stdin.take().ok_or(TurnError::MissingPipe("stdin"))?;
                Some(tokio::spawn(feed_stdin(pipe, text)))
            }
            None => None,
        };

        Ok(Self {
            child,
            stdin,
            records,
            stderr_tail,
            reader_task,
            stderr_task: Some(stderr_task),
            stdin_task,
            exited: None,
        })
    }

    /// Writes `text` plus a newline. A closed pipe is tolerated; the exit will be observed on
    /// stdout instead.
    pub(crate) async fn write_line(&mut self, text: &str) -> Result<(), TurnError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(TurnError::MissingPipe("stdin"));
        };
        for chunk in [text.as_bytes(), b"\n"] {
            if let Err(source) = stdin.write_all(chunk).await {
                if source.kind() == std::io::ErrorKind::BrokenPipe {
                    return Ok(());
                }
                return Err(TurnError::StdinWrite(source.to_string()));
            }
        }
        if let Err(source) = stdin.flush().await {
            if source.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(TurnError::StdinWrite(source.to_string()));
            }
        }
        Ok(())
    }

    pub(crate) async fn close_stdin(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }
    }

    pub(crate) async fn next_record(&mut self, deadline: Option<time::Instant>) -> NextRecord {
        let next = match deadline {
            Some(deadline) => match time::timeout_at(deadline, self.records.recv()).await {
                Ok(next) => next,
                Err(_) => return NextRecord::Deadline,
            },
            None => self.records.recv().await,
        };
        match next {
            Some(record) => NextRecord::Record(record),
            None => NextRecord::Eof,
        }
    }

    /// Waits for exit until `deadline`; `None` means the process is still running.
    pub(crate) async fn wait_until(
        &mut self,
        deadline: Option<time::Instant>,
    ) -> Result<Option<ExitInfo>, TurnError> {
        if let Some(exit) = self.exited {
            return Ok(Some(exit));
        }
        let status = match deadline {
            Some(deadline) => match time::timeout_at(deadline, self.child.wait()).await {
                Ok(status) => status,
                Err(_) => return Ok(None),
            },
            None => self.child.wait().await,
        };
        let exit = ExitInfo::from_status(status.map_err(|err| TurnError::Wait(err.to_string()))?);
        self.exited = Some(exit);
        Ok(Some(exit))
    }

    /// Kills the agent and its descendants.
    pub(crate) async fn kill(&mut self) -> ExitInfo {
        if let Some(exit) = self.exited {
            return exit;
        }
        kill_tree(self.child.id()).await;
        if let Err(err) = self.child.start_kill() {
            debug!(error = %err, "agent kill failed; process may have exited");
        }
        let exit = match time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => ExitInfo::from_status(status),
            _ => ExitInfo::default(),
        };
        self.exited = Some(exit);
        exit
    }

    pub(crate) fn has_exited(&mut self) -> bool {
        if self.exited.is_some() {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exited = Some(ExitInfo::from_status(status));
                true
            }
            Ok(None) => false,
            Err(_) => true,
        }
    }

    pub(crate) async fn stderr_tail(&mut self) -> String {
        settle_stderr(&mut self.stderr_task, &self.stderr_tail).await
    }
}

async fn feed_stdin(mut stdin: ChildStdin, text: String) {
    let mut result = stdin.write_all(text.as_bytes()).await;
    if result.is_ok() {
        result = stdin.write_all(b"\n").await;
    }
    if result.is_ok() {
        result = stdin.shutdown().await;
    }
    match result {
        Err(err) if err.kind() != std::io::ErrorKind::BrokenPipe => {
            warn!(error = %err, "failed to write prompt to agent stdin");
        }
        _ => {}
    }
}

impl Drop for AgentProcess {
    fn drop(&mut self) {
        self.reader_task.abort();
        for handle in [&self.stderr_task, &self.stdin_task].into_iter().flatten() {
            handle.abort();
        }
        if self.exited.is_none() && matches!(self.child.try_wait(), Ok(None)) {
            kill_process_tree(self.child.id());
            let _ = self.child.start_kill();
        }
    }
}
