//! File-based credential storage.
//!
//! Directory structure:
//! ```text
//! {auth_dir}/
//!   session-{session_id}/    # Owned by the transport while it runs
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::session::SessionId;
use crate::store::auth::AuthStore;
use crate::store::error::{StorageError, StorageResult};

/// Retry and settle timings for credential area resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetPolicy {
    /// Extra removal attempts after the first failure.
    pub retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub backoff: Duration,
    /// Pause after the area is recreated, before the transport may use it.
    pub settle: Duration,
}

impl Default for ResetPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_millis(100),
            settle: Duration::from_secs(2),
        }
    }
}

/// File-based implementation of `AuthStore`.
#[derive(Debug, Clone)]
pub struct FileAuthStore {
    root: PathBuf,
    policy: ResetPolicy,
}

impl FileAuthStore {
    /// Create a store rooted at `root`. Nothing is created until the first reset.
    pub fn new(root: impl Into<PathBuf>, policy: ResetPolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }

    /// Remove `dir` recursively, retrying transient failures.
    ///
    /// A transport that is still shutting down can hold files open for a
    /// moment after `destroy()` returns, which makes removal fail spuriously.
    async fn remove_with_retry(&self, dir: &Path) -> StorageResult<()> {
        let mut backoff = self.policy.backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match fs::remove_dir_all(dir).await {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
                Err(e) if attempt > self.policy.retries => {
                    return Err(StorageError::reset_exhausted(dir, attempt, e));
                }
                Err(e) => {
                    warn!(
                        path = %dir.display(),
                        attempt = attempt,
                        error = %e,
                        "Failed to remove credential area, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
}

#[async_trait]
impl AuthStore for FileAuthStore {
    fn credential_path(&self, session_id: &SessionId) -> PathBuf {
        self.root.join(format!("session-{}", session_id))
    }

    async fn reset(&self, session_id: &SessionId) -> StorageResult<()> {
        let dir = self.credential_path(session_id);

        self.remove_with_retry(&dir).await?;
        debug!(session_id = %session_id, path = %dir.display(), "Credential area removed");

        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::file_io(&dir, e))?;
        debug!(session_id = %session_id, "Credential area recreated");

        if !self.policy.settle.is_zero() {
            tokio::time::sleep(self.policy.settle).await;
        }
        Ok(())
    }
}
