//! Credential storage trait.
//!
//! Defines the interface for the per-session durable credential area that the
//! transport reads and writes between process restarts.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::session::SessionId;

use super::error::StorageResult;

/// Storage interface for session credential material.
#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Location handed to the transport when it is constructed.
    fn credential_path(&self, session_id: &SessionId) -> PathBuf;

    /// Destroy and recreate the credential area as empty.
    ///
    /// Must be idempotent: resetting a missing or already-empty area succeeds.
    /// Callers must tear down the transport before calling this.
    async fn reset(&self, session_id: &SessionId) -> StorageResult<()>;
}
