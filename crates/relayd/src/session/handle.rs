//! Session handle for communicating with a session actor.
//!
//! `SessionHandle` wraps the actor's command sender and the receiver for its
//! published [`SessionView`]. It is cheap to clone.

use tokio::sync::{mpsc, oneshot, watch};

use super::actor_types::{InitializeOutcome, SessionCommand, SessionView};
use super::error::SessionError;
use super::id::SessionId;

/// Handle for interacting with a session actor.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    tx: mpsc::Sender<SessionCommand>,
    view_rx: watch::Receiver<SessionView>,
}

impl SessionHandle {
    pub(crate) fn new(
        id: SessionId,
        tx: mpsc::Sender<SessionCommand>,
        view_rx: watch::Receiver<SessionView>,
    ) -> Self {
        Self { id, tx, view_rx }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Ask the actor to start an initialization attempt.
    ///
    /// Returns once the attempt has been dispatched, not once it completes.
    pub async fn initialize(&self) -> Result<InitializeOutcome, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Initialize { reply: reply_tx })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;

        reply_rx.await.map_err(|_| SessionError::ActorShutdown)?
    }

    /// Tear the session down. Completes once the session is `Idle`.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Disconnect { reply: reply_tx })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;

        reply_rx.await.map_err(|_| SessionError::ActorShutdown)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Latest published state.
    pub fn view(&self) -> SessionView {
        self.view_rx.borrow().clone()
    }

    /// State as the actor sees it once everything queued so far is handled.
    pub async fn current_view(&self) -> Result<SessionView, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::GetView { reply: reply_tx })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;

        reply_rx.await.map_err(|_| SessionError::ActorShutdown)
    }

    /// Receiver that observes every published state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view_rx.clone()
    }

    /// Whether the actor is still running.
    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}
