//! File-based storage implementations.
//!
//! - Credential areas are plain directories owned by the transport
//! - Message history is an append-only JSONL file

mod auth;
mod history;

pub use auth::{FileAuthStore, ResetPolicy};
pub use history::FileHistoryStore;
