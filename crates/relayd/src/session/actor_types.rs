//! Session actor types and protocol.
//!
//! This module defines the command protocol for communicating with session actors,
//! the state they publish, and their timing configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;

use crate::transport::{TransportEvent, TransportHandle};

use super::error::SessionError;

// ============================================================================
// Session Command
// ============================================================================

/// Commands that can be sent to a session actor.
pub enum SessionCommand {
    /// Start an initialization attempt unless one is already in flight.
    Initialize {
        reply: oneshot::Sender<Result<InitializeOutcome, SessionError>>,
    },
    /// Tear the session down, wipe its credentials and return to `Idle`.
    Disconnect { reply: oneshot::Sender<()> },
    /// Current state, after every previously queued command has been applied.
    GetView { reply: oneshot::Sender<SessionView> },

    // Internal: produced by transports, attempts and the reconnect timer.
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    Constructed {
        generation: u64,
        transport: Arc<dyn TransportHandle>,
    },
    AttemptFinished {
        generation: u64,
        result: Result<(), SessionError>,
    },
    RetryDue { ticket: u64 },
}

/// Result of an initialize request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializeOutcome {
    /// A new attempt was started.
    Started,
    /// An attempt is already in flight; the request was collapsed into it.
    AlreadyInitializing,
    /// The session already has a live transport.
    AlreadyActive,
}

// ============================================================================
// State
// ============================================================================

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Initializing,
    AwaitingCode,
    Authenticated,
    Connected,
    Failed,
    Disconnected,
}

impl SessionPhase {
    /// Phases in which a transport is expected to be running.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Self::Initializing | Self::AwaitingCode | Self::Authenticated | Self::Connected
        )
    }

    /// Phases from which the reconnect scheduler may start a new attempt.
    pub fn is_recovering(self) -> bool {
        matches!(self, Self::Failed | Self::Disconnected)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::AwaitingCode => "awaiting_code",
            Self::Authenticated => "authenticated",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Snapshot of actor state published after every transition.
///
/// Reads (status, send) go through this snapshot instead of the actor's
/// command queue, so they never wait behind a slow teardown.
#[derive(Clone)]
pub struct SessionView {
    pub phase: SessionPhase,
    pub connected: bool,
    pub transport: Option<Arc<dyn TransportHandle>>,
}

impl SessionView {
    pub(crate) fn idle() -> Self {
        Self {
            phase: SessionPhase::Idle,
            connected: false,
            transport: None,
        }
    }
}

impl fmt::Debug for SessionView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionView")
            .field("phase", &self.phase)
            .field("connected", &self.connected)
            .field("has_transport", &self.transport.is_some())
            .finish()
    }
}

/// Connection status reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub connected: bool,
    pub has_code: bool,
    pub phase: SessionPhase,
}

// ============================================================================
// Configuration
// ============================================================================

/// Timing and retry settings shared by every session actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Delay before retrying after auth failure or disconnection.
    pub retry_delay: Duration,
    /// Delay before retrying after the transport failed to construct or start.
    pub construct_error_delay: Duration,
    /// Consecutive retries allowed before giving up. `None` retries forever.
    pub max_retry_attempts: Option<u32>,
    /// Pause after a transport is destroyed, before its storage is touched.
    pub teardown_grace: Duration,
    /// Spacing between provisioning code polls.
    pub poll_interval: Duration,
    /// Number of polls before a provisioning wait gives up.
    pub poll_attempts: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            construct_error_delay: Duration::from_secs(10),
            max_retry_attempts: None,
            teardown_grace: Duration::from_secs(3),
            poll_interval: Duration::from_secs(1),
            poll_attempts: 10,
        }
    }
}

// ============================================================================
// Constants
// ============================================================================

/// Channel capacity for actor commands, including transport events.
pub const CHANNEL_CAPACITY: usize = 256;

/// How long a disconnect waits for a cancelled attempt to unwind.
pub const ATTEMPT_CANCEL_TIMEOUT: Duration = Duration::from_secs(5);
