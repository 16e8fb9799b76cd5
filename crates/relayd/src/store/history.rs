//! Message history storage trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::StorageResult;

/// Delivery outcome recorded with a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
}

/// One outbound message accepted by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub session_id: String,
    pub destination: String,
    pub body: String,
    pub status: DeliveryStatus,
    pub timestamp: DateTime<Utc>,
}

impl HistoryRecord {
    /// Record for a message the transport accepted just now.
    pub fn sent(
        session_id: impl Into<String>,
        destination: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            destination: destination.into(),
            body: body.into(),
            status: DeliveryStatus::Sent,
            timestamp: Utc::now(),
        }
    }
}

/// Append-only log of sent messages.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one record.
    async fn append(&self, record: &HistoryRecord) -> StorageResult<()>;
}
