//! Bridge protocol types for communication between relayd and transport bridges.
//!
//! A transport bridge is an external process that owns one live connection to
//! the messaging transport (for example, a small script around a browser-driven
//! client). relayd spawns one bridge per session and talks to it over stdio:
//!
//! - **Commands** (relayd → bridge): instructions such as initialize or send
//! - **Events** (bridge → relayd): lifecycle notifications and command replies
//!
//! Both directions are JSON Lines (one JSON object per line).
//!
//! # Example: Minimal Bridge
//!
//! ```ignore
//! use relayd_transport_protocol::{BridgeCommand, BridgeEvent};
//!
//! let command: BridgeCommand = serde_json::from_str(&read_line_from_stdin())?;
//! if let BridgeCommand::Initialize { request_id } = command {
//!     println!("{}", serde_json::to_string(&BridgeEvent::CodeIssued { code: "2@abc".into() })?);
//!     println!("{}", serde_json::to_string(&BridgeEvent::CommandOk { request_id })?);
//! }
//! ```

use serde::{Deserialize, Serialize};

// ============================================================================
// Commands (relayd → Bridge)
// ============================================================================

/// Commands sent from relayd to a transport bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    /// Start the client. The bridge replies with `command_ok` once the client
    /// has finished initializing, or `command_error` if it could not start.
    Initialize { request_id: String },

    /// Deliver a text message to a normalized address (digits only).
    SendMessage {
        request_id: String,
        to: String,
        body: String,
    },

    /// Request graceful shutdown. No reply is expected.
    Shutdown,
}

impl BridgeCommand {
    /// Request ID carried by this command, if it expects a reply.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Initialize { request_id } | Self::SendMessage { request_id, .. } => {
                Some(request_id)
            }
            Self::Shutdown => None,
        }
    }
}

// ============================================================================
// Events (Bridge → relayd)
// ============================================================================

/// Events sent from a transport bridge to relayd.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// A provisioning code is available to scan.
    CodeIssued { code: String },

    /// The code was scanned and credentials were accepted.
    Authenticated,

    /// The client is connected and can send messages.
    Ready,

    /// The transport rejected the stored or scanned credentials.
    AuthFailure {
        #[serde(default)]
        reason: String,
    },

    /// The connection was lost.
    Disconnected {
        #[serde(default)]
        reason: String,
    },

    /// A command completed successfully.
    CommandOk { request_id: String },

    /// A command failed.
    CommandError { request_id: String, message: String },
}

impl BridgeEvent {
    /// Whether this event is a reply to a previously issued command.
    pub fn is_reply(&self) -> bool {
        matches!(self, Self::CommandOk { .. } | Self::CommandError { .. })
    }
}
