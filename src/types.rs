//! Basic type definitions
//!
//! Provides newtype wrappers for type safety:
//! - `SubscriberId`: identifies one event subscriber

use uuid::Uuid;

/// Event subscriber identifier (newtype pattern)
///
/// Callers usually pass their own id (a user or session id); `random()`
/// produces a UUID v4 based one for anonymous subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub String);

impl SubscriberId {
    /// Create a subscriber id from any string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a new random subscriber id
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl From<&str> for SubscriberId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SubscriberId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
