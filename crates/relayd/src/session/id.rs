//! Session identifiers.

use std::fmt;

use serde::Serialize;

use super::error::SessionError;

/// A sanitized session identifier.
///
/// Every character outside `[A-Za-z0-9_-]` is replaced with `_`, so the id is
/// safe to use as a path component and map key. Distinct raw inputs that
/// sanitize to the same value name the same session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Sanitize a caller-supplied identifier.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        if raw.is_empty() {
            return Err(SessionError::InvalidSessionId);
        }

        let sanitized = raw
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        Ok(Self(sanitized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_characters_pass_through() {
        assert_eq!(SessionId::parse("shop-01_A").unwrap().as_str(), "shop-01_A");
    }

    #[test]
    fn disallowed_characters_become_underscores() {
        assert_eq!(
            SessionId::parse("../etc/passwd").unwrap().as_str(),
            "___etc_passwd"
        );
        assert_eq!(SessionId::parse("a b").unwrap().as_str(), "a_b");
        assert_eq!(SessionId::parse("שלום").unwrap().as_str(), "____");
    }

    #[test]
    fn colliding_inputs_are_the_same_session() {
        assert_eq!(
            SessionId::parse("a.b").unwrap(),
            SessionId::parse("a/b").unwrap()
        );
    }

    #[test]
    fn empty_is_rejected() {
        assert!(matches!(
            SessionId::parse(""),
            Err(SessionError::InvalidSessionId)
        ));
    }
}
