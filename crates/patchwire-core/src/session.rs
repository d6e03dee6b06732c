//! In-memory session registry.
//!
//! Sessions are opaque identifiers grouping the observers that should see
//! the same broadcast events. They live until the process exits.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use uuid::Uuid;

/// Issues session ids and answers existence queries.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashSet<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new session and return its id (a random UUID).
    pub fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone());
        tracing::debug!(session_id = %id, "session created");
        id
    }

    pub fn exists(&self, session_id: &str) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
