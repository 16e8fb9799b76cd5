//! Session lifecycle management.
//!
//! # Architecture
//!
//! ```text
//!  ┌─────────────────┐        ┌───────────────┐  construct   ┌──────────────────┐
//!  │ SessionRegistry │──owns──▶ SessionActor  │─────────────▶│ TransportFactory │
//!  │  (ID → Handle)  │        │  owns phase,  │              └──────────────────┘
//!  └────────┬────────┘        │  transport,   │◀── TransportEvent (EventSink)
//!           │                 │  retries      │
//!           │ clone           └───▲───────┬───┘
//!           ▼                     │       │ publish
//!  ┌─────────────────┐  mpsc      │       ▼
//!  │  SessionHandle  │────────────┘   SessionView (watch) + QrCache
//!  └─────────────────┘
//! ```
//!
//! - **SessionActor** owns mutable session state and processes commands and
//!   transport events sequentially, so no locks are held across awaits.
//! - **SessionHandle** is the cloneable front for one actor. Reads go through
//!   the published [`SessionView`]; writes go through the command channel.
//! - **SessionRegistry** maps ids to handles, creates actors on first use
//!   and owns shutdown.
//! - **QrCache** holds the current provisioning code per session.

mod actor;
mod actor_types;
mod attempt;
mod error;
mod handle;
mod id;
mod qr_cache;
mod reconnect;
mod registry;

pub use actor_types::{
    ATTEMPT_CANCEL_TIMEOUT, CHANNEL_CAPACITY, InitializeOutcome, SessionPhase, SessionSettings,
    SessionStatus, SessionView,
};
pub use error::SessionError;
pub use handle::SessionHandle;
pub use id::SessionId;
pub use qr_cache::QrCache;
pub use registry::SessionRegistry;

pub(crate) use actor_types::SessionCommand;
