//! Initialization attempts.
//!
//! An attempt resets the credential area, constructs a transport and waits for
//! it to start. It runs as its own task so the session actor keeps consuming
//! transport events (a provisioning code is usually issued before the
//! transport finishes starting).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::store::AuthStore;
use crate::transport::{EventSink, TransportFactory};

use super::actor_types::SessionCommand;
use super::error::SessionError;
use super::id::SessionId;

// ============================================================================
// In-flight guard
// ============================================================================

/// The per-session `initializing` flag.
#[derive(Debug, Clone, Default)]
pub(crate) struct InitFlag(Arc<AtomicBool>);

impl InitFlag {
    /// Atomically claim the flag. Returns `None` if an attempt is in flight.
    pub(crate) fn try_acquire(&self) -> Option<InitGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InitGuard(self.0.clone()))
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Releases the `initializing` flag when dropped.
#[derive(Debug)]
pub(crate) struct InitGuard(Arc<AtomicBool>);

impl Drop for InitGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ============================================================================
// Attempt task
// ============================================================================

/// Everything an attempt needs, moved into its task.
pub(crate) struct Attempt {
    pub id: SessionId,
    pub generation: u64,
    pub auth: Arc<dyn AuthStore>,
    pub factory: Arc<dyn TransportFactory>,
    pub actor_tx: mpsc::Sender<SessionCommand>,
    pub cancel: CancellationToken,
    pub guard: InitGuard,
}

impl Attempt {
    /// Run the attempt to completion or cancellation and report back.
    pub(crate) async fn run(self) {
        let Attempt {
            id,
            generation,
            auth,
            factory,
            actor_tx,
            cancel,
            guard,
        } = self;

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(session_id = %id, generation, "Initialization attempt cancelled");
                return;
            }
            result = start_transport(&id, generation, auth.as_ref(), factory.as_ref(), &actor_tx) => result,
        };

        // Release before reporting so the actor sees an accurate flag.
        drop(guard);

        let _ = actor_tx
            .send(SessionCommand::AttemptFinished { generation, result })
            .await;
    }
}

async fn start_transport(
    id: &SessionId,
    generation: u64,
    auth: &dyn AuthStore,
    factory: &dyn TransportFactory,
    actor_tx: &mpsc::Sender<SessionCommand>,
) -> Result<(), SessionError> {
    // Best-effort: a stale area is wiped again on the next failure cycle.
    if let Err(e) = auth.reset(id).await {
        warn!(
            session_id = %id,
            error = %SessionError::StorageResetFailed(e),
            "Proceeding with initialization despite reset failure"
        );
    }

    let credential_path = auth.credential_path(id);
    let events = EventSink::new(generation, actor_tx.clone());
    let transport = factory
        .construct(id, &credential_path, events)
        .await
        .map_err(SessionError::TransportConstructError)?;
    debug!(session_id = %id, generation, "Transport constructed");

    // Hand the transport over before starting it so a `ready` event emitted
    // during startup finds it in place.
    actor_tx
        .send(SessionCommand::Constructed {
            generation,
            transport: transport.clone(),
        })
        .await
        .map_err(|_| SessionError::ActorShutdown)?;

    transport
        .initialize()
        .await
        .map_err(SessionError::TransportConstructError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_admits_one_holder() {
        let flag = InitFlag::default();
        let guard = flag.try_acquire().expect("first acquire");
        assert!(flag.is_set());
        assert!(flag.try_acquire().is_none());

        drop(guard);
        assert!(!flag.is_set());
        assert!(flag.try_acquire().is_some());
    }

    #[test]
    fn guard_releases_on_unwind() {
        let flag = InitFlag::default();
        let cloned = flag.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = cloned.try_acquire().unwrap();
            panic!("construction blew up");
        });
        assert!(result.is_err());
        assert!(!flag.is_set());
    }
}
