//! Deferred re-initialization after failure or disconnection.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::actor_types::SessionCommand;
use super::id::SessionId;

/// One pending retry: the ticket the timer will deliver and its cancel token.
struct PendingRetry {
    ticket: u64,
    cancel: CancellationToken,
}

/// Per-session retry timer.
///
/// Holds at most one pending retry. Scheduling again supersedes the previous
/// timer, and [`cancel`](Self::cancel) invalidates it deterministically: a
/// timer that already fired is still rejected by [`take_due`](Self::take_due)
/// because its ticket no longer matches.
pub(crate) struct ReconnectScheduler {
    session_id: SessionId,
    pending: Option<PendingRetry>,
    next_ticket: u64,
    /// Consecutive retries since the last successful connection.
    attempts: u32,
    max_attempts: Option<u32>,
}

impl ReconnectScheduler {
    pub(crate) fn new(session_id: SessionId, max_attempts: Option<u32>) -> Self {
        Self {
            session_id,
            pending: None,
            next_ticket: 0,
            attempts: 0,
            max_attempts,
        }
    }

    /// Schedule a retry after `delay`, replacing any pending one.
    ///
    /// Returns `false` without scheduling if the retry cap has been reached.
    pub(crate) fn schedule(&mut self, delay: Duration, tx: mpsc::WeakSender<SessionCommand>) -> bool {
        self.cancel();

        if let Some(max) = self.max_attempts
            && self.attempts >= max
        {
            error!(
                session_id = %self.session_id,
                attempts = self.attempts,
                "Retry limit reached, giving up on session"
            );
            return false;
        }

        self.attempts += 1;
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let cancel = CancellationToken::new();
        self.pending = Some(PendingRetry {
            ticket,
            cancel: cancel.clone(),
        });

        info!(
            session_id = %self.session_id,
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduled reconnect"
        );

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(tx) = tx.upgrade() {
                        let _ = tx.send(SessionCommand::RetryDue { ticket }).await;
                    }
                }
            }
        });
        true
    }

    /// Cancel the pending retry, if any.
    pub(crate) fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel.cancel();
            debug!(
                session_id = %self.session_id,
                ticket = pending.ticket,
                "Cancelled pending reconnect"
            );
        }
    }

    /// Consume the pending retry if `ticket` is the current one.
    pub(crate) fn take_due(&mut self, ticket: u64) -> bool {
        match &self.pending {
            Some(pending) if pending.ticket == ticket => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Forget past failures after a successful connection.
    pub(crate) fn reset_attempts(&mut self) {
        self.attempts = 0;
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
