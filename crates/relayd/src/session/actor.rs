//! Per-session actor that owns the connection state machine.
//!
//! Each session gets a dedicated actor task that:
//! - Serializes every state change (caller requests and transport events)
//! - Owns the session's transport and its credential resets
//! - Publishes a [`SessionView`] snapshot after every transition
//!
//! ```text
//!            initialize()
//!   Idle ───────────────▶ Initializing ──code──▶ AwaitingCode
//!                              │                     │
//!                              └──authenticated──────┴──▶ Authenticated ──ready──▶ Connected
//!
//!   any live phase ──auth_failure──▶ Failed ───────┐
//!   any live phase ──disconnected──▶ Disconnected ─┴─ retry timer ──▶ Initializing
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::store::AuthStore;
use crate::transport::{TransportEvent, TransportFactory, TransportHandle};

use super::actor_types::{
    ATTEMPT_CANCEL_TIMEOUT, CHANNEL_CAPACITY, InitializeOutcome, SessionCommand, SessionPhase,
    SessionSettings, SessionView,
};
use super::attempt::{Attempt, InitFlag, InitGuard};
use super::error::SessionError;
use super::id::SessionId;
use super::qr_cache::QrCache;
use super::reconnect::ReconnectScheduler;

// ============================================================================
// Configuration
// ============================================================================

/// Dependencies for spawning a session actor.
pub(crate) struct ActorConfig {
    pub id: SessionId,
    pub auth: Arc<dyn AuthStore>,
    pub factory: Arc<dyn TransportFactory>,
    pub qr: QrCache,
    pub settings: SessionSettings,
}

/// The attempt task currently running, if any.
struct InFlightAttempt {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

// ============================================================================
// Session Actor
// ============================================================================

/// Per-session actor that owns state and handles transitions.
pub(crate) struct SessionActor {
    id: SessionId,

    // State
    phase: SessionPhase,
    connected: bool,
    transport: Option<Arc<dyn TransportHandle>>,
    /// Bumped for every attempt and every disconnect; tags transport events.
    generation: u64,
    init_flag: InitFlag,
    attempt: Option<InFlightAttempt>,
    reconnect: ReconnectScheduler,

    // Collaborators
    qr: QrCache,
    auth: Arc<dyn AuthStore>,
    factory: Arc<dyn TransportFactory>,
    settings: SessionSettings,

    // Communication
    view_tx: watch::Sender<SessionView>,
    self_tx: mpsc::WeakSender<SessionCommand>,
    command_rx: mpsc::Receiver<SessionCommand>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionActor {
    /// Spawn a new actor in the `Idle` phase.
    ///
    /// Returns the command sender, a receiver for published state, and the
    /// actor's JoinHandle.
    pub(crate) fn spawn(
        config: ActorConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (
        mpsc::Sender<SessionCommand>,
        watch::Receiver<SessionView>,
        JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (view_tx, view_rx) = watch::channel(SessionView::idle());

        let actor = Self {
            reconnect: ReconnectScheduler::new(
                config.id.clone(),
                config.settings.max_retry_attempts,
            ),
            id: config.id,
            phase: SessionPhase::Idle,
            connected: false,
            transport: None,
            generation: 0,
            init_flag: InitFlag::default(),
            attempt: None,
            qr: config.qr,
            auth: config.auth,
            factory: config.factory,
            settings: config.settings,
            view_tx,
            self_tx: tx.downgrade(),
            command_rx: rx,
            shutdown_rx,
        };

        let handle = tokio::spawn(actor.run());
        (tx, view_rx, handle)
    }

    /// Main command processing loop.
    async fn run(mut self) {
        debug!(session_id = %self.id, "Session actor started");

        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        debug!(session_id = %self.id, "Session actor received shutdown signal");
                        break;
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            debug!(session_id = %self.id, "All handles dropped, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown().await;
        debug!(session_id = %self.id, "Session actor stopped");
    }

    /// Handle a single command.
    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Initialize { reply } => {
                let result = self.initialize().await;
                let _ = reply.send(result);
            }
            SessionCommand::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            SessionCommand::GetView { reply } => {
                let _ = reply.send(self.view_tx.borrow().clone());
            }
            SessionCommand::Transport { generation, event } => {
                self.on_transport_event(generation, event).await;
            }
            SessionCommand::Constructed {
                generation,
                transport,
            } => self.on_constructed(generation, transport),
            SessionCommand::AttemptFinished { generation, result } => {
                self.on_attempt_finished(generation, result).await;
            }
            SessionCommand::RetryDue { ticket } => self.on_retry_due(ticket).await,
        }

        self.check_invariants();
    }

    // ------------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------------

    async fn initialize(&mut self) -> Result<InitializeOutcome, SessionError> {
        if self.transport.is_some() && self.phase.is_live() {
            debug!(session_id = %self.id, phase = %self.phase, "Session already active");
            return Ok(InitializeOutcome::AlreadyActive);
        }

        let Some(guard) = self.init_flag.try_acquire() else {
            debug!(session_id = %self.id, "Initialization already in flight");
            return Ok(InitializeOutcome::AlreadyInitializing);
        };

        self.begin_attempt(guard).await
    }

    async fn begin_attempt(&mut self, guard: InitGuard) -> Result<InitializeOutcome, SessionError> {
        // This attempt supersedes any pending retry.
        self.reconnect.cancel();
        self.generation += 1;
        let generation = self.generation;

        self.connected = false;
        self.qr.clear_code(&self.id);
        self.set_phase(SessionPhase::Initializing);

        // The attempt wipes storage, so the previous transport must be gone.
        self.teardown_transport().await;

        let Some(actor_tx) = self.self_tx.upgrade() else {
            return Err(SessionError::ActorShutdown);
        };

        info!(session_id = %self.id, generation, "Starting initialization");

        let cancel = CancellationToken::new();
        let attempt = Attempt {
            id: self.id.clone(),
            generation,
            auth: self.auth.clone(),
            factory: self.factory.clone(),
            actor_tx,
            cancel: cancel.clone(),
            guard,
        };
        let task = tokio::spawn(attempt.run());
        self.attempt = Some(InFlightAttempt {
            generation,
            cancel,
            task,
        });

        Ok(InitializeOutcome::Started)
    }

    fn on_constructed(&mut self, generation: u64, transport: Arc<dyn TransportHandle>) {
        if generation != self.generation || !self.phase.is_live() {
            debug!(
                session_id = %self.id,
                generation,
                current = self.generation,
                "Discarding transport from superseded attempt"
            );
            tokio::spawn(async move {
                let _ = transport.destroy().await;
            });
            return;
        }

        self.transport = Some(transport);
        self.publish();
    }

    async fn on_attempt_finished(&mut self, generation: u64, result: Result<(), SessionError>) {
        if generation != self.generation {
            debug!(session_id = %self.id, generation, "Ignoring result of superseded attempt");
            return;
        }
        if self
            .attempt
            .as_ref()
            .is_some_and(|a| a.generation == generation)
        {
            self.attempt = None;
        }

        match result {
            Ok(()) => {
                info!(session_id = %self.id, generation, "Transport initialized");
            }
            Err(e) if self.phase.is_live() => {
                error!(session_id = %self.id, generation, error = %e, "Initialization failed");
                self.connected = false;
                self.qr.clear_code(&self.id);
                self.set_phase(SessionPhase::Failed);
                self.teardown_transport().await;
                self.schedule_retry(self.settings.construct_error_delay);
            }
            Err(e) => {
                debug!(
                    session_id = %self.id,
                    phase = %self.phase,
                    error = %e,
                    "Attempt failed after session already left live phase"
                );
            }
        }
    }

    async fn on_retry_due(&mut self, ticket: u64) {
        if !self.reconnect.take_due(ticket) {
            debug!(session_id = %self.id, ticket, "Ignoring cancelled reconnect");
            return;
        }
        if self.init_flag.is_set() {
            debug!(session_id = %self.id, "Attempt already in flight, skipping reconnect");
            return;
        }
        if !self.phase.is_recovering() {
            debug!(session_id = %self.id, phase = %self.phase, "Session no longer needs reconnect");
            return;
        }

        match self.initialize().await {
            Ok(outcome) => {
                debug!(session_id = %self.id, outcome = ?outcome, "Reconnect attempt dispatched");
            }
            Err(e) => warn!(session_id = %self.id, error = %e, "Reconnect attempt not started"),
        }
    }

    // ------------------------------------------------------------------------
    // Transport events
    // ------------------------------------------------------------------------

    async fn on_transport_event(&mut self, generation: u64, event: TransportEvent) {
        if generation != self.generation || !self.phase.is_live() {
            debug!(
                session_id = %self.id,
                event = event.name(),
                generation,
                phase = %self.phase,
                "Ignoring event from inactive transport"
            );
            return;
        }

        match event {
            TransportEvent::CodeIssued(code) => match self.phase {
                SessionPhase::Initializing | SessionPhase::AwaitingCode => {
                    info!(session_id = %self.id, "Provisioning code issued");
                    debug!(session_id = %self.id, code = %code, "Provisioning code");
                    self.qr.set_code(&self.id, code);
                    self.set_phase(SessionPhase::AwaitingCode);
                }
                phase => {
                    debug!(session_id = %self.id, phase = %phase, "Ignoring code outside provisioning");
                }
            },

            TransportEvent::Authenticated => match self.phase {
                SessionPhase::Initializing | SessionPhase::AwaitingCode => {
                    self.qr.clear_code(&self.id);
                    self.set_phase(SessionPhase::Authenticated);
                    info!(session_id = %self.id, "Session authenticated");
                }
                phase => {
                    debug!(session_id = %self.id, phase = %phase, "Ignoring repeated authentication");
                }
            },

            TransportEvent::Ready => {
                self.qr.clear_code(&self.id);
                self.connected = true;
                self.reconnect.reset_attempts();
                self.set_phase(SessionPhase::Connected);
                info!(session_id = %self.id, "Session connected");
            }

            TransportEvent::AuthFailure(reason) => {
                error!(session_id = %self.id, reason = %reason, "Authentication failed");
                self.recover(SessionPhase::Failed).await;
            }

            TransportEvent::Disconnected(reason) => {
                warn!(session_id = %self.id, reason = %reason, "Session disconnected");
                self.recover(SessionPhase::Disconnected).await;
            }
        }
    }

    /// Leave the live phases: stop the transport, wipe credentials, retry later.
    async fn recover(&mut self, phase: SessionPhase) {
        self.connected = false;
        self.qr.clear_code(&self.id);
        self.set_phase(phase);

        self.cancel_attempt().await;
        self.teardown_transport().await;
        self.reset_storage().await;
        self.schedule_retry(self.settings.retry_delay);
    }

    // ------------------------------------------------------------------------
    // Disconnect / shutdown
    // ------------------------------------------------------------------------

    async fn disconnect(&mut self) {
        info!(session_id = %self.id, phase = %self.phase, "Disconnecting session");

        self.reconnect.cancel();
        self.cancel_attempt().await;
        // Any event still queued from the old transport is now stale.
        self.generation += 1;

        self.connected = false;
        self.qr.clear_code(&self.id);
        self.set_phase(SessionPhase::Idle);

        self.teardown_transport().await;
        self.reset_storage().await;
        self.reconnect.reset_attempts();
    }

    async fn shutdown(&mut self) {
        self.reconnect.cancel();
        self.cancel_attempt().await;
        self.destroy_transport().await;
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    async fn cancel_attempt(&mut self) {
        let Some(attempt) = self.attempt.take() else {
            return;
        };

        attempt.cancel.cancel();
        if tokio::time::timeout(ATTEMPT_CANCEL_TIMEOUT, attempt.task)
            .await
            .is_err()
        {
            warn!(
                session_id = %self.id,
                generation = attempt.generation,
                "Cancelled attempt did not finish in time"
            );
        }
    }

    /// Destroy the transport, if any. Returns true if one was destroyed.
    async fn destroy_transport(&mut self) -> bool {
        let Some(transport) = self.transport.take() else {
            return false;
        };
        self.publish();

        match transport.destroy().await {
            Ok(()) => debug!(session_id = %self.id, "Transport destroyed"),
            Err(e) => warn!(session_id = %self.id, error = %e, "Error destroying transport"),
        }
        true
    }

    /// Destroy the transport and wait for it to release its files.
    async fn teardown_transport(&mut self) {
        if self.destroy_transport().await && !self.settings.teardown_grace.is_zero() {
            tokio::time::sleep(self.settings.teardown_grace).await;
        }
    }

    async fn reset_storage(&self) {
        if let Err(e) = self.auth.reset(&self.id).await {
            warn!(
                session_id = %self.id,
                error = %SessionError::StorageResetFailed(e),
                "Credential reset incomplete"
            );
        }
    }

    fn schedule_retry(&mut self, delay: std::time::Duration) {
        self.reconnect.schedule(delay, self.self_tx.clone());
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            debug!(session_id = %self.id, from = %self.phase, to = %phase, "Phase transition");
        }
        self.phase = phase;
        self.publish();
    }

    fn publish(&self) {
        self.view_tx.send_replace(SessionView {
            phase: self.phase,
            connected: self.connected,
            transport: self.transport.clone(),
        });
    }

    fn check_invariants(&self) {
        debug_assert!(
            !(self.connected && self.qr.contains(&self.id)),
            "connected session {} still has a provisioning code",
            self.id
        );
        debug_assert!(
            !self.connected || self.phase == SessionPhase::Connected,
            "session {} connected in phase {}",
            self.id,
            self.phase
        );
    }
}
