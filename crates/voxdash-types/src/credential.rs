//! Short-lived session credential.

use std::fmt;

/// Access token authorising exactly one call session.
///
/// The wrapper has no `Display` impl and its `Debug` output is redacted, so
/// the token cannot reach a log line by accident. Use [`Credential::expose`]
/// only at the point where the token is handed to the RTC client.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&"[REDACTED]").finish()
    }
}
