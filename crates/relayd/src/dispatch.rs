//! Outbound message dispatch.
//!
//! Validates a send against the session's published state, normalizes the
//! destination to the transport's address form and forwards the message.
//! Successful sends are appended to the history log in the background.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::session::{SessionError, SessionId, SessionView};
use crate::store::{HistoryRecord, HistoryStore};

/// Country code prepended to national numbers.
pub const COUNTRY_CODE: &str = "972";

/// Placeholder replaced by the recipient's name.
pub const NAME_PLACEHOLDER: &str = "{name}";

/// Digit count accepted for national numbers (with or without trunk `0`).
const NATIONAL_DIGITS: std::ops::RangeInclusive<usize> = 9..=10;

/// Digit count accepted for numbers given in `+` international form.
const INTERNATIONAL_DIGITS: std::ops::RangeInclusive<usize> = 9..=15;

/// What the transport accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    /// Normalized address the message was sent to.
    pub destination: String,
    /// Final body after template substitution.
    pub body: String,
}

/// Sends messages through a session's transport.
#[derive(Clone, Default)]
pub struct MessageDispatcher {
    history: Option<Arc<dyn HistoryStore>>,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: Arc<dyn HistoryStore>) -> Self {
        Self {
            history: Some(history),
        }
    }

    /// Send `body` to `destination` through the session described by `view`.
    ///
    /// Checks run in order: connectivity, transport presence, destination.
    /// Transport failures are returned as-is and never retried.
    pub async fn send(
        &self,
        session_id: &SessionId,
        view: &SessionView,
        destination: &str,
        body: &str,
        recipient_name: Option<&str>,
    ) -> Result<SendReceipt, SessionError> {
        if !view.connected {
            debug!(session_id = %session_id, phase = %view.phase, "Rejecting send on unconnected session");
            return Err(SessionError::SessionNotConnected);
        }
        let Some(transport) = view.transport.as_ref() else {
            warn!(session_id = %session_id, "Connected session has no transport");
            return Err(SessionError::ClientMissing);
        };

        let address = normalize_destination(destination)?;
        let body = apply_recipient_name(body, recipient_name);

        transport
            .send_to(&address, &body)
            .await
            .map_err(SessionError::SendFailed)?;
        info!(session_id = %session_id, destination = %address, "Message sent");

        if let Some(history) = &self.history {
            let history = history.clone();
            let record = HistoryRecord::sent(session_id.as_str(), address.as_str(), body.as_str());
            tokio::spawn(async move {
                if let Err(e) = history.append(&record).await {
                    warn!(
                        session_id = %record.session_id,
                        error = %e,
                        "Failed to record sent message"
                    );
                }
            });
        }

        Ok(SendReceipt {
            destination: address,
            body,
        })
    }
}

/// Normalize a phone number to the transport's address form.
///
/// - `+972521234567` → `972521234567` (leading `+` dropped)
/// - `0521234567` → `972521234567` (trunk `0` replaced by the country code)
/// - `521234567` → `972521234567`
///
/// Formatting characters are ignored. National numbers must have 9-10
/// digits; `+` numbers may carry a country code and have up to 15.
pub fn normalize_destination(raw: &str) -> Result<String, SessionError> {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    let invalid = || SessionError::InvalidDestination {
        raw: raw.to_string(),
    };

    if trimmed.starts_with('+') {
        if !INTERNATIONAL_DIGITS.contains(&digits.len()) {
            return Err(invalid());
        }
        return Ok(digits);
    }

    if !NATIONAL_DIGITS.contains(&digits.len()) {
        return Err(invalid());
    }

    let national = digits.strip_prefix('0').unwrap_or(&digits);
    Ok(format!("{COUNTRY_CODE}{national}"))
}

/// Replace the first `{name}` in `body` with the trimmed recipient name.
///
/// A missing or blank name leaves the body untouched.
pub fn apply_recipient_name(body: &str, recipient_name: Option<&str>) -> String {
    match recipient_name.map(str::trim) {
        Some(name) if !name.is_empty() => body.replacen(NAME_PLACEHOLDER, name, 1),
        _ => body.to_string(),
    }
}
