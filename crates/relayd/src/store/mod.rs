//! Storage interfaces and their file-based implementations.

mod auth;
mod error;
pub mod file;
mod history;

pub use auth::AuthStore;
pub use error::{StorageError, StorageResult};
pub use history::{DeliveryStatus, HistoryRecord, HistoryStore};
