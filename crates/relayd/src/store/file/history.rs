//! File-based message history.
//!
//! Stores one JSON object per sent message in a single JSONL file.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::store::error::{StorageError, StorageResult};
use crate::store::history::{HistoryRecord, HistoryStore};

/// File-based implementation of `HistoryStore`.
#[derive(Debug, Clone)]
pub struct FileHistoryStore {
    path: PathBuf,
    /// Serializes appends so concurrent sends never interleave lines.
    write_lock: Arc<Mutex<()>>,
}

impl FileHistoryStore {
    /// Create a history store writing to `path`. Parent directories are
    /// created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn append(&self, record: &HistoryRecord) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::file_io(parent, e))?;
        }

        let mut line =
            serde_json::to_string(record).map_err(|e| StorageError::serialization(e.to_string()))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StorageError::file_io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StorageError::file_io(&self.path, e))?;
        file.flush()
            .await
            .map_err(|e| StorageError::file_io(&self.path, e))?;

        Ok(())
    }
}
