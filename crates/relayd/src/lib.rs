//! relayd - session lifecycle manager for a phone-number messaging transport.

pub mod config;
pub mod dispatch;
pub mod session;
pub mod store;
pub mod transport;
