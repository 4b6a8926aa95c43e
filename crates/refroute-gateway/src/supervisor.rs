use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

use crate::codec::{encode_frame, LineCodec};
use crate::correlation::CorrelationTable;
use crate::error::GatewayError;

pub(crate) const PROTOCOL_VERSION: &str = "2024-11-05";
const CLIENT_NAME: &str = "backend-gateway";
const CLIENT_VERSION: &str = "1.0.0";
const INITIALIZED_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// How to launch the tool server child and how long to wait on it.
#[derive(Debug, Clone)]
pub struct ToolServerConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Extra variables layered over the inherited environment.
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub handshake_timeout: Duration,
    pub call_timeout: Duration,
}

impl ToolServerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Stopped,
    Starting,
    Handshaking,
    Ready,
    Exited,
}

/// Shared handle to a live child: the serialized stdin writer plus the flag
/// the reader task clears when the process goes away.
#[derive(Clone)]
pub struct ProcessHandle {
    pub(crate) stdin: Arc<AsyncMutex<ChildStdin>>,
    alive: Arc<AtomicBool>,
}

impl ProcessHandle {
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

struct Slot {
    state: ProcessState,
    child: Option<Child>,
    handle: Option<ProcessHandle>,
    reader_task: Option<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<()>>,
}

/// Owns the child process lifecycle: lazy spawn, initialize/initialized
/// handshake, exit detection, and respawn on the next call after an exit.
///
/// All lifecycle mutation happens under one async mutex, so concurrent
/// callers arriving during `Starting`/`Handshaking` wait on the same spawn
/// attempt instead of racing a second one.
pub struct ProcessSupervisor {
    config: ToolServerConfig,
    pending: Arc<CorrelationTable>,
    next_id: AtomicU64,
    slot: AsyncMutex<Slot>,
}

impl ProcessSupervisor {
    pub fn new(config: ToolServerConfig) -> Self {
        Self {
            config,
            pending: Arc::new(CorrelationTable::new()),
            next_id: AtomicU64::new(0),
            slot: AsyncMutex::new(Slot {
                state: ProcessState::Stopped,
                child: None,
                handle: None,
                reader_task: None,
                stderr_task: None,
            }),
        }
    }

    pub fn config(&self) -> &ToolServerConfig {
        &self.config
    }

    pub fn pending(&self) -> &Arc<CorrelationTable> {
        &self.pending
    }

    /// Ids are unique for the supervisor's lifetime, never reused across
    /// respawns, so a late response from a dead process cannot match a new
    /// request.
    pub fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub async fn state(&self) -> ProcessState {
        let slot = self.slot.lock().await;
        match &slot.handle {
            Some(handle)
                if !handle.is_alive()
                    && matches!(
                        slot.state,
                        ProcessState::Ready | ProcessState::Handshaking
                    ) =>
            {
                ProcessState::Exited
            }
            _ => slot.state,
        }
    }

    /// Returns a handle to a live, handshaked child, spawning one if needed.
    pub async fn ensure_ready(&self) -> Result<ProcessHandle, GatewayError> {
        let mut slot = self.slot.lock().await;
        if slot.state == ProcessState::Ready {
            if let Some(handle) = &slot.handle {
                if handle.is_alive() {
                    return Ok(handle.clone());
                }
            }
            slot.state = ProcessState::Exited;
        }

        self.teardown_locked(&mut slot);
        slot.state = ProcessState::Starting;
        match self.spawn_and_handshake(&mut slot).await {
            Ok(handle) => {
                slot.state = ProcessState::Ready;
                Ok(handle)
            }
            Err(err) => {
                self.teardown_locked(&mut slot);
                slot.state = ProcessState::Exited;
                Err(err)
            }
        }
    }

    /// Kills the child and drains the correlation table. Called by the
    /// embedding application during its own graceful-shutdown sequence.
    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        self.teardown_locked(&mut slot);
        slot.state = ProcessState::Stopped;
    }

    pub(crate) async fn write_frame(
        &self,
        handle: &ProcessHandle,
        message: &Value,
    ) -> Result<(), GatewayError> {
        let bytes = encode_frame(message).map_err(|e| GatewayError::Protocol(e.to_string()))?;
        let mut stdin = handle.stdin.lock().await;
        stdin
            .write_all(&bytes)
            .await
            .map_err(|_| GatewayError::ProcessExited)?;
        stdin.flush().await.map_err(|_| GatewayError::ProcessExited)
    }

    async fn spawn_and_handshake(&self, slot: &mut Slot) -> Result<ProcessHandle, GatewayError> {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.config.cwd {
            command.current_dir(cwd);
        }

        let mut child = command
            .spawn()
            .map_err(|e| GatewayError::Spawn(e.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::Spawn("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::Spawn("child stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| GatewayError::Spawn("child stderr unavailable".to_string()))?;

        let alive = Arc::new(AtomicBool::new(true));
        let handle = ProcessHandle {
            stdin: Arc::new(AsyncMutex::new(stdin)),
            alive: Arc::clone(&alive),
        };

        slot.reader_task = Some(tokio::spawn(read_frames(
            stdout,
            Arc::clone(&self.pending),
            alive,
        )));
        slot.stderr_task = Some(tokio::spawn(forward_fault_lines(stderr)));
        slot.child = Some(child);
        slot.handle = Some(handle.clone());

        slot.state = ProcessState::Handshaking;
        self.handshake(&handle).await?;
        Ok(handle)
    }

    async fn handshake(&self, handle: &ProcessHandle) -> Result<(), GatewayError> {
        let id = self.next_request_id();
        let receiver = self.pending.register(id);
        let deadline = Instant::now() + self.config.handshake_timeout;

        let initialize = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": CLIENT_NAME, "version": CLIENT_VERSION}
            }
        });
        if let Err(err) = self.write_frame(handle, &initialize).await {
            self.pending.remove(id);
            return Err(err);
        }

        // The initialized notification is sent on a fixed delay, not gated on
        // the initialize response.
        sleep(INITIALIZED_DELAY).await;
        let initialized = json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        });
        if let Err(err) = self.write_frame(handle, &initialized).await {
            self.pending.remove(id);
            return Err(err);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, receiver).await {
            Err(_) => {
                self.pending.remove(id);
                Err(GatewayError::HandshakeTimeout)
            }
            Ok(Err(_)) => Err(GatewayError::ProcessExited),
            Ok(Ok(result)) => result.map(|_| ()),
        }
    }

    fn teardown_locked(&self, slot: &mut Slot) {
        if let Some(task) = slot.reader_task.take() {
            task.abort();
        }
        if let Some(task) = slot.stderr_task.take() {
            task.abort();
        }
        if let Some(handle) = slot.handle.take() {
            handle.alive.store(false, Ordering::Release);
        }
        if let Some(mut child) = slot.child.take() {
            let _ = child.start_kill();
        }
        self.pending.reject_all(&GatewayError::ProcessExited);
    }
}

/// Reader task: feeds child stdout through the line codec and dispatches each
/// complete message by id. On EOF or read error the process is gone: mark the
/// handle dead and reject every outstanding call at once.
async fn read_frames(
    mut stdout: ChildStdout,
    pending: Arc<CorrelationTable>,
    alive: Arc<AtomicBool>,
) {
    let mut codec = LineCodec::new();
    let mut chunk = [0_u8; 4096];
    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                for message in codec.push(&chunk[..n]) {
                    pending.dispatch(&message);
                }
            }
        }
    }
    alive.store(false, Ordering::Release);
    pending.reject_all(&GatewayError::ProcessExited);
}

/// Stderr task: lines carrying fault markers are surfaced to the host's log;
/// everything else the child prints is swallowed.
async fn forward_fault_lines(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.contains("Error") || line.contains("Failed") {
            eprintln!("[tool server] {line}");
        }
    }
}
