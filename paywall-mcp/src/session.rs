//! Session manager (C8): maps `mcp-session-id` values to per-session
//! transport state.
//!
//! Sessions are created on `initialize` and destroyed on shutdown or on
//! explicit client teardown. The map itself needs no external locking;
//! `DashMap` shards internally, matching the plan-metadata cache's
//! time-bounded, lock-light style elsewhere in this workspace.

use dashmap::DashMap;

/// Per-session state tracked by the session manager.
///
/// Holds only what the HTTP handler needs to route subsequent requests for
/// the same `mcp-session-id`; the MCP SDK's own transport/session objects
/// are opaque to this crate.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// The `initialize` request's declared protocol version.
    pub protocol_version: String,
}

/// Tracks live MCP sessions keyed by the `mcp-session-id` header value.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: DashMap<String, SessionState>,
}

impl SessionManager {
    /// Creates an empty session manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new session with a freshly generated id, returning the id.
    #[must_use]
    pub fn create(&self, protocol_version: impl Into<String>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.sessions.insert(id.clone(), SessionState { protocol_version: protocol_version.into() });
        id
    }

    /// Returns a clone of the session state for `id`, if it exists.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<SessionState> {
        self.sessions.get(id).map(|entry| entry.clone())
    }

    /// Destroys the session named by `id`. A no-op if it does not exist.
    pub fn destroy(&self, id: &str) {
        self.sessions.remove(id);
    }

    /// Destroys every tracked session, used when the server manager
    /// transitions from `Running` back to `Idle`.
    pub fn clear(&self) {
        self.sessions.clear();
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// `true` when no sessions are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_destroy_round_trips() {
        let manager = SessionManager::new();
        let id = manager.create("2024-11-05");
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.get(&id).unwrap().protocol_version, "2024-11-05");
        manager.destroy(&id);
        assert!(manager.is_empty());
    }

    #[test]
    fn clear_destroys_every_session() {
        let manager = SessionManager::new();
        manager.create("v1");
        manager.create("v2");
        assert_eq!(manager.len(), 2);
        manager.clear();
        assert!(manager.is_empty());
    }
}
