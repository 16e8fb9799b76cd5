//! Session error types.

use thiserror::Error;

use crate::store::StorageError;
use crate::transport::TransportError;

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session id was empty.
    #[error("session id is required")]
    InvalidSessionId,

    /// No session exists for the given id.
    #[error("session not initialized")]
    SessionUnknown,

    /// The session exists but no provisioning code has been issued yet.
    #[error("no provisioning code available yet")]
    CodeNotReady,

    /// No code was issued within the provisioning wait.
    #[error("provisioning code not issued after {attempts} polls")]
    CodeTimeout { attempts: u32 },

    /// The session is not connected.
    #[error("session is not connected")]
    SessionNotConnected,

    /// The session reports connected but has no transport.
    #[error("transport client not found")]
    ClientMissing,

    /// The destination does not look like a phone number.
    #[error("invalid destination '{raw}': must contain 9-10 digits")]
    InvalidDestination { raw: String },

    /// The transport failed to deliver the message.
    #[error("failed to send message: {0}")]
    SendFailed(#[source] TransportError),

    /// Resetting the credential area failed after all retries.
    #[error("credential reset failed: {0}")]
    StorageResetFailed(#[source] StorageError),

    /// The transport could not be constructed or initialized.
    #[error("transport construction failed: {0}")]
    TransportConstructError(#[source] TransportError),

    /// The session actor has shut down.
    #[error("session actor has shut down")]
    ActorShutdown,
}
