//! Subprocess transport bridge.
//!
//! Spawns one bridge process per initialization attempt and talks to it over
//! stdio using the JSON Lines protocol from `relayd-transport-protocol`.
//! Lifecycle events are forwarded to the session's [`EventSink`]; command
//! replies resolve the request that issued them.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use relayd_transport_protocol::{BridgeCommand, BridgeEvent};

use crate::session::SessionId;

use super::{EventSink, TransportError, TransportEvent, TransportFactory, TransportHandle};

/// Environment variable carrying the session id to the bridge.
pub const SESSION_ID_ENV: &str = "RELAYD_SESSION_ID";

/// Environment variable carrying the credential directory to the bridge.
pub const AUTH_PATH_ENV: &str = "RELAYD_AUTH_PATH";

/// Buffered commands per bridge.
const COMMAND_BUFFER: usize = 32;

type PendingReplies = Arc<DashMap<String, oneshot::Sender<Result<(), String>>>>;

// ============================================================================
// Configuration
// ============================================================================

/// How to launch and talk to a bridge process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// How long `initialize` waits for the bridge to report the client started.
    pub init_timeout: Duration,
    /// How long a send waits for its reply.
    pub request_timeout: Duration,
    /// How long a bridge gets to exit after `shutdown` before it is killed.
    pub shutdown_grace: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: "relayd-bridge".to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            init_timeout: Duration::from_secs(120),
            request_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_millis(500),
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Builds a [`SubprocessTransport`] by spawning the configured bridge.
pub struct SubprocessTransportFactory {
    config: Arc<BridgeConfig>,
}

impl SubprocessTransportFactory {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl TransportFactory for SubprocessTransportFactory {
    async fn construct(
        &self,
        session_id: &SessionId,
        credential_path: &Path,
        events: EventSink,
    ) -> Result<Arc<dyn TransportHandle>, TransportError> {
        info!(
            session_id = %session_id,
            command = %self.config.command,
            "Spawning transport bridge"
        );

        let mut child = spawn_child(&self.config, session_id, credential_path)
            .map_err(TransportError::Spawn)?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill().await;
            return Err(TransportError::Closed);
        };

        let pending: PendingReplies = Arc::new(DashMap::new());
        let closing = CancellationToken::new();
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

        tokio::spawn(write_commands(session_id.clone(), stdin, cmd_rx));
        tokio::spawn(read_events(
            session_id.clone(),
            stdout,
            events,
            pending.clone(),
            closing.clone(),
        ));

        Ok(Arc::new(SubprocessTransport {
            session_id: session_id.clone(),
            config: self.config.clone(),
            cmd_tx,
            pending,
            closing,
            child: Mutex::new(Some(child)),
        }))
    }
}

/// Spawn the bridge with the session's environment.
fn spawn_child(
    config: &BridgeConfig,
    session_id: &SessionId,
    credential_path: &Path,
) -> std::io::Result<Child> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .envs(&config.env)
        .env(SESSION_ID_ENV, session_id.as_str())
        .env(AUTH_PATH_ENV, credential_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    // On Linux, make sure the bridge dies with us.
    #[cfg(target_os = "linux")]
    unsafe {
        cmd.pre_exec(|| {
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    cmd.spawn()
}

// ============================================================================
// Transport
// ============================================================================

/// One running bridge process.
pub struct SubprocessTransport {
    session_id: SessionId,
    config: Arc<BridgeConfig>,
    cmd_tx: mpsc::Sender<BridgeCommand>,
    pending: PendingReplies,
    /// Cancelled once `destroy` starts, so the exit is not reported as a drop.
    closing: CancellationToken,
    child: Mutex<Option<Child>>,
}

impl SubprocessTransport {
    /// Send a command and wait for its reply.
    async fn request(
        &self,
        timeout: Duration,
        make: impl FnOnce(String) -> BridgeCommand,
    ) -> Result<(), TransportError> {
        let request_id = Ulid::new().to_string();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), reply_tx);

        if self.cmd_tx.send(make(request_id.clone())).await.is_err() {
            self.pending.remove(&request_id);
            return Err(TransportError::Closed);
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(TransportError::Rejected(message)),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(TransportError::Timeout(timeout))
            }
        }
    }
}

#[async_trait]
impl TransportHandle for SubprocessTransport {
    async fn initialize(&self) -> Result<(), TransportError> {
        self.request(self.config.init_timeout, |request_id| {
            BridgeCommand::Initialize { request_id }
        })
        .await
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        self.closing.cancel();

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        let _ = self.cmd_tx.send(BridgeCommand::Shutdown).await;

        match tokio::time::timeout(self.config.shutdown_grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(session_id = %self.session_id, status = %status, "Bridge exited");
                Ok(())
            }
            Ok(Err(e)) => Err(TransportError::Process(e)),
            Err(_) => {
                warn!(session_id = %self.session_id, "Bridge ignored shutdown, killing");
                child.kill().await.map_err(TransportError::Process)
            }
        }
    }

    async fn send_to(&self, address: &str, body: &str) -> Result<(), TransportError> {
        self.request(self.config.request_timeout, |request_id| {
            BridgeCommand::SendMessage {
                request_id,
                to: address.to_string(),
                body: body.to_string(),
            }
        })
        .await
    }
}

// ============================================================================
// Stdio pumps
// ============================================================================

async fn write_commands(
    session_id: SessionId,
    mut stdin: ChildStdin,
    mut cmd_rx: mpsc::Receiver<BridgeCommand>,
) {
    while let Some(command) = cmd_rx.recv().await {
        let is_shutdown = matches!(command, BridgeCommand::Shutdown);
        let json = match serde_json::to_string(&command) {
            Ok(json) => json,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Failed to serialize command");
                continue;
            }
        };

        let line = format!("{json}\n");
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            warn!(session_id = %session_id, error = %e, "Failed to write to bridge stdin");
            break;
        }
        if let Err(e) = stdin.flush().await {
            warn!(session_id = %session_id, error = %e, "Failed to flush bridge stdin");
            break;
        }
        if is_shutdown {
            break;
        }
    }
    debug!(session_id = %session_id, "Bridge command writer stopped");
}

async fn read_events(
    session_id: SessionId,
    stdout: ChildStdout,
    events: EventSink,
    pending: PendingReplies,
    closing: CancellationToken,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(session_id = %session_id, "Bridge stdout closed");
                break;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Error reading bridge stdout");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event = match serde_json::from_str::<BridgeEvent>(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(session_id = %session_id, line = %line, error = %e, "Failed to parse bridge event");
                continue;
            }
        };

        match event {
            BridgeEvent::CommandOk { request_id } => resolve(&pending, &request_id, Ok(())),
            BridgeEvent::CommandError {
                request_id,
                message,
            } => resolve(&pending, &request_id, Err(message)),
            other => {
                if let Some(event) = lifecycle_event(other)
                    && !events.emit(event).await
                {
                    debug!(session_id = %session_id, "Session gone, stopping bridge reader");
                    break;
                }
            }
        }
    }

    // Outstanding requests fail with `Closed`.
    pending.clear();

    if !closing.is_cancelled() {
        events
            .emit(TransportEvent::Disconnected(
                "transport bridge exited".to_string(),
            ))
            .await;
    }
}

fn resolve(pending: &PendingReplies, request_id: &str, result: Result<(), String>) {
    match pending.remove(request_id) {
        Some((_, reply)) => {
            let _ = reply.send(result);
        }
        None => debug!(request_id, "Reply for unknown or expired request"),
    }
}

/// Map a bridge event to a session lifecycle event. Replies map to `None`.
fn lifecycle_event(event: BridgeEvent) -> Option<TransportEvent> {
    match event {
        BridgeEvent::CodeIssued { code } => Some(TransportEvent::CodeIssued(code)),
        BridgeEvent::Authenticated => Some(TransportEvent::Authenticated),
        BridgeEvent::Ready => Some(TransportEvent::Ready),
        BridgeEvent::AuthFailure { reason } => Some(TransportEvent::AuthFailure(reason)),
        BridgeEvent::Disconnected { reason } => Some(TransportEvent::Disconnected(reason)),
        BridgeEvent::CommandOk { .. } | BridgeEvent::CommandError { .. } => None,
    }
}
