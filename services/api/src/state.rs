use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use interview_core::{Orchestrator, SessionStore};
use std::time::Duration;

/// Live WebSocket connections keyed by session id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, DateTime<Utc>>,
}

impl ConnectionRegistry {
    /// Registers a connection. Returns `false` if the id already has one.
    pub fn register(&self, session_id: &str) -> bool {
        match self.connections.entry(session_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                true
            }
        }
    }

    pub fn unregister(&self, session_id: &str) {
        if let Some((_, connected_at)) = self.connections.remove(session_id) {
            let seconds = (Utc::now() - connected_at).num_seconds();
            tracing::info!(session_id = %session_id, connected_for_secs = seconds, "connection unregistered");
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.connections.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Everything a connection needs, shared by all of them.
pub struct AppState {
    pub store: SessionStore,
    pub orchestrator: Orchestrator,
    pub connections: ConnectionRegistry,
    /// How long a connection stays open after a failed start so the client
    /// can read the final messages.
    pub close_grace: Duration,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, close_grace: Duration) -> Self {
        Self {
            store: SessionStore::new(),
            orchestrator,
            connections: ConnectionRegistry::default(),
            close_grace,
        }
    }
}
