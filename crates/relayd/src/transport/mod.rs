//! Transport capability used by session actors.
//!
//! relayd does not speak the messaging transport's protocol itself. Each
//! session owns one [`TransportHandle`] built by a [`TransportFactory`]; the
//! handle performs the handshake and message delivery and reports lifecycle
//! changes back through an [`EventSink`].
//!
//! ```text
//!  SessionActor ──construct──▶ TransportFactory
//!       ▲                            │
//!       │ TransportEvent             ▼
//!   EventSink ◀──────────────── TransportHandle ──▶ external client
//! ```

pub mod subprocess;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::session::{SessionCommand, SessionId};

pub use subprocess::{BridgeConfig, SubprocessTransportFactory};

// ============================================================================
// Events
// ============================================================================

/// Lifecycle events emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A provisioning code is ready to be scanned.
    CodeIssued(String),
    /// Credentials were accepted.
    Authenticated,
    /// The connection is live.
    Ready,
    /// Credentials were rejected.
    AuthFailure(String),
    /// The connection was lost.
    Disconnected(String),
}

impl TransportEvent {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CodeIssued(_) => "code_issued",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::AuthFailure(_) => "auth_failure",
            Self::Disconnected(_) => "disconnected",
        }
    }
}

/// Delivers transport events to exactly one session actor.
///
/// Each initialization attempt gets its own sink tagged with the attempt's
/// generation, so events from a transport that has since been replaced are
/// recognised and dropped by the actor.
#[derive(Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::Sender<SessionCommand>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::Sender<SessionCommand>) -> Self {
        Self { generation, tx }
    }

    /// Forward an event to the owning session.
    ///
    /// Returns `false` if the session actor has shut down.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(SessionCommand::Transport {
                generation: self.generation,
                event,
            })
            .await
            .is_ok()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors reported by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport could not be started.
    #[error("failed to start transport: {0}")]
    Spawn(#[source] std::io::Error),

    /// The transport process could not be stopped or waited on.
    #[error("transport process error: {0}")]
    Process(#[source] std::io::Error),

    /// The transport refused or failed a request.
    #[error("transport rejected request: {0}")]
    Rejected(String),

    /// The transport went away while a request was outstanding.
    #[error("transport channel closed")]
    Closed,

    /// The transport did not reply in time.
    #[error("transport did not reply within {}s", .0.as_secs())]
    Timeout(Duration),
}

// ============================================================================
// Capability traits
// ============================================================================

/// Builds one transport per initialization attempt.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Construct a transport for `session_id` whose credentials live under
    /// `credential_path`. Lifecycle events must be delivered through `events`.
    async fn construct(
        &self,
        session_id: &SessionId,
        credential_path: &Path,
        events: EventSink,
    ) -> Result<Arc<dyn TransportHandle>, TransportError>;
}

/// One live or pending connection to the messaging transport.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Start the client. Completes once the transport has finished starting,
    /// which may be after a code has been issued.
    async fn initialize(&self) -> Result<(), TransportError>;

    /// Tear the client down and release any files it holds.
    async fn destroy(&self) -> Result<(), TransportError>;

    /// Deliver `body` to a normalized address.
    async fn send_to(&self, address: &str, body: &str) -> Result<(), TransportError>;
}
