//! Provisioning code cache.

use std::sync::Arc;

use dashmap::DashMap;

use super::id::SessionId;

/// Current provisioning code per session.
///
/// Only session actors mutate the cache, and only while handling a state
/// transition; everyone else reads.
#[derive(Clone, Default)]
pub struct QrCache {
    codes: Arc<DashMap<SessionId, String>>,
}

impl QrCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current code for a session, if one has been issued and not yet expired.
    pub fn get(&self, session_id: &SessionId) -> Option<String> {
        self.codes.get(session_id).map(|code| code.value().clone())
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.codes.contains_key(session_id)
    }

    pub(crate) fn set_code(&self, session_id: &SessionId, code: String) {
        self.codes.insert(session_id.clone(), code);
    }

    /// Returns true if a code was removed.
    pub(crate) fn clear_code(&self, session_id: &SessionId) -> bool {
        self.codes.remove(session_id).is_some()
    }
}
