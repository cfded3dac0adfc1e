use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;
use uuid::Uuid;

/// Opaque capability string gating hub connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn generate() -> Self {
        SessionToken(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionToken {
    fn from(value: String) -> Self {
        SessionToken(value)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Owns the single valid session token.
#[derive(Debug, Clone)]
pub struct SessionAuthority {
    current: SessionToken,
}

impl SessionAuthority {
    pub fn new() -> Self {
        Self::with_token(SessionToken::generate())
    }

    pub fn with_token(token: SessionToken) -> Self {
        SessionAuthority { current: token }
    }

    pub fn current_token(&self) -> &SessionToken {
        &self.current
    }

    pub fn validate(&self, candidate: &str) -> bool {
        self.current.as_str() == candidate
    }

    /// Replace the token; the previous value is never valid again.
    ///
    /// Closing existing connections is the caller's job, since authorization
    /// is only checked at accept time.
    pub fn rotate(&mut self) -> &SessionToken {
        let mut next = SessionToken::generate();
        while next == self.current {
            next = SessionToken::generate();
        }
        self.current = next;
        info!(token = %self.current, "New session token generated");
        &self.current
    }
}

impl Default for SessionAuthority {
    fn default() -> Self {
        Self::new()
    }
}
