//! Session registry for managing actor lifecycles.
//!
//! The registry is responsible for:
//! - Creating session actors on first use
//! - Routing caller requests to the right actor
//! - Provisioning code lookups and waits
//! - Graceful shutdown of all actors

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatch::{MessageDispatcher, SendReceipt};
use crate::store::{AuthStore, HistoryStore};
use crate::transport::TransportFactory;

use super::actor::{ActorConfig, SessionActor};
use super::actor_types::{InitializeOutcome, SessionSettings, SessionStatus};
use super::error::SessionError;
use super::handle::SessionHandle;
use super::id::SessionId;
use super::qr_cache::QrCache;

// ============================================================================
// Session Registry
// ============================================================================

/// Registry for session actors.
///
/// Owns the mapping from session id to actor, the shared provisioning code
/// cache and the message dispatcher. Thread-safe and cheap to clone.
#[derive(Clone)]
pub struct SessionRegistry {
    /// Session handles by ID.
    handles: Arc<DashMap<SessionId, SessionHandle>>,
    /// Actor task handles for graceful shutdown.
    task_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    qr: QrCache,
    factory: Arc<dyn TransportFactory>,
    auth: Arc<dyn AuthStore>,
    dispatcher: MessageDispatcher,
    settings: SessionSettings,
    /// Shutdown signal sender.
    shutdown_tx: Arc<watch::Sender<bool>>,
    /// Shutdown signal receiver (cloned for each actor).
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionRegistry {
    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Create a new session registry.
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        auth: Arc<dyn AuthStore>,
        settings: SessionSettings,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            handles: Arc::new(DashMap::new()),
            task_handles: Arc::new(Mutex::new(Vec::new())),
            qr: QrCache::new(),
            factory,
            auth,
            dispatcher: MessageDispatcher::new(),
            settings,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Record successful sends to `history`.
    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.dispatcher = MessageDispatcher::with_history(history);
        self
    }

    /// Gracefully shutdown all session actors.
    ///
    /// Sends the shutdown signal and waits for every actor to destroy its
    /// transport. Credential areas are left intact.
    pub async fn shutdown(&self) {
        info!(sessions = self.handles.len(), "Shutting down session registry");

        if self.shutdown_tx.send(true).is_err() {
            warn!("Failed to send shutdown signal");
            return;
        }

        let task_handles = {
            let mut handles = self.task_handles.lock().await;
            std::mem::take(&mut *handles)
        };

        for task_handle in task_handles {
            if let Err(e) = task_handle.await {
                warn!(error = ?e, "Actor task panicked during shutdown");
            }
        }

        info!("Session registry shutdown complete");
    }

    // ------------------------------------------------------------------------
    // Session management
    // ------------------------------------------------------------------------

    /// Request initialization, creating the session if needed.
    ///
    /// Concurrent calls for the same session collapse into one attempt.
    pub async fn initialize(&self, raw_id: &str) -> Result<InitializeOutcome, SessionError> {
        let id = SessionId::parse(raw_id)?;
        let handle = self.get_or_create(&id).await;
        handle.initialize().await
    }

    /// Return the session, initializing it unless a transport is already live.
    ///
    /// An idle session (new, only queried, or disconnected) starts an attempt,
    /// as does one waiting out a retry. Live sessions are left alone.
    pub async fn get_or_init_session(&self, raw_id: &str) -> Result<SessionHandle, SessionError> {
        let id = SessionId::parse(raw_id)?;
        let (handle, created) = self.lookup_or_spawn(&id).await;
        if created || !handle.view().phase.is_live() {
            let outcome = handle.initialize().await?;
            debug!(session_id = %id, created, outcome = ?outcome, "Initialized session");
        }
        Ok(handle)
    }

    /// Tear a session down and return it to `Idle`.
    pub async fn disconnect(&self, raw_id: &str) -> Result<(), SessionError> {
        let id = SessionId::parse(raw_id)?;
        let handle = self.get_or_create(&id).await;
        handle.disconnect().await
    }

    /// Get a session handle by ID.
    pub fn get(&self, raw_id: &str) -> Option<SessionHandle> {
        let id = SessionId::parse(raw_id).ok()?;
        self.handles.get(&id).map(|r| r.clone())
    }

    /// Ids of every known session, sorted.
    pub fn list(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.handles.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// The shared provisioning code cache.
    pub fn qr_cache(&self) -> &QrCache {
        &self.qr
    }

    // ------------------------------------------------------------------------
    // Status and provisioning
    // ------------------------------------------------------------------------

    /// Current connection status. Creates an idle session for an unseen id.
    pub async fn status(&self, raw_id: &str) -> Result<SessionStatus, SessionError> {
        let id = SessionId::parse(raw_id)?;
        let view = self.get_or_create(&id).await.view();

        Ok(SessionStatus {
            connected: view.connected,
            has_code: !view.connected && self.qr.contains(&id),
            phase: view.phase,
        })
    }

    /// Current provisioning code, without creating or initializing anything.
    pub fn current_code(&self, raw_id: &str) -> Result<String, SessionError> {
        let id = SessionId::parse(raw_id)?;
        if !self.handles.contains_key(&id) {
            return Err(SessionError::SessionUnknown);
        }
        self.qr.get(&id).ok_or(SessionError::CodeNotReady)
    }

    /// Wait for a provisioning code, initializing the session if it is not live.
    ///
    /// Polls the cache every `poll_interval` up to `poll_attempts` times. Only
    /// the calling task is suspended.
    pub async fn wait_for_code(&self, raw_id: &str) -> Result<String, SessionError> {
        let id = SessionId::parse(raw_id)?;
        self.get_or_init_session(raw_id).await?;

        if let Some(code) = self.qr.get(&id) {
            return Ok(code);
        }

        let attempts = self.settings.poll_attempts;
        for attempt in 1..=attempts {
            tokio::time::sleep(self.settings.poll_interval).await;
            if let Some(code) = self.qr.get(&id) {
                debug!(session_id = %id, attempt, "Provisioning code available");
                return Ok(code);
            }
        }

        warn!(session_id = %id, attempts, "Timed out waiting for provisioning code");
        Err(SessionError::CodeTimeout { attempts })
    }

    // ------------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------------

    /// Send a message through a connected session.
    ///
    /// Never creates a session: an unknown id is simply not connected.
    pub async fn send(
        &self,
        raw_id: &str,
        destination: &str,
        body: &str,
        recipient_name: Option<&str>,
    ) -> Result<SendReceipt, SessionError> {
        let id = SessionId::parse(raw_id)?;
        let Some(handle) = self.handles.get(&id).map(|r| r.clone()) else {
            return Err(SessionError::SessionNotConnected);
        };

        let view = handle.view();
        self.dispatcher
            .send(&id, &view, destination, body, recipient_name)
            .await
    }

    // ------------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------------

    async fn get_or_create(&self, id: &SessionId) -> SessionHandle {
        self.lookup_or_spawn(id).await.0
    }

    /// Returns the handle and whether this call created it.
    async fn lookup_or_spawn(&self, id: &SessionId) -> (SessionHandle, bool) {
        let (handle, task_handle) = match self.handles.entry(id.clone()) {
            Entry::Occupied(entry) => return (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let config = ActorConfig {
                    id: id.clone(),
                    auth: self.auth.clone(),
                    factory: self.factory.clone(),
                    qr: self.qr.clone(),
                    settings: self.settings,
                };
                let (tx, view_rx, task_handle) =
                    SessionActor::spawn(config, self.shutdown_rx.clone());
                let handle = SessionHandle::new(id.clone(), tx, view_rx);
                entry.insert(handle.clone());
                (handle, task_handle)
            }
        };

        debug!(session_id = %id, "Created session");

        let mut guard = self.task_handles.lock().await;
        guard.retain(|h| !h.is_finished());
        guard.push(task_handle);

        (handle, true)
    }
}
