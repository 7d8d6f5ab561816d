//! In-memory registry of live interview sessions.
//!
//! Sessions are independent, so the store only needs per-entry locking. The
//! `DashMap` shards keep unrelated interviews from contending on one lock.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::session_state::{InterviewSession, SessionError};

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, InterviewSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a new session.
    ///
    /// An id that is already tracked is rejected; the existing session is
    /// left as it is.
    pub fn create(&self, id: &str) -> Result<InterviewSession, SessionError> {
        match self.sessions.entry(id.to_string()) {
            Entry::Occupied(_) => Err(SessionError::DuplicateSession(id.to_string())),
            Entry::Vacant(slot) => {
                let session = InterviewSession::new(id);
                slot.insert(session.clone());
                tracing::info!(session_id = %id, "interview session created");
                Ok(session)
            }
        }
    }

    /// Returns a snapshot of the session.
    pub fn get(&self, id: &str) -> Option<InterviewSession> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Runs `f` against the stored session while holding its entry lock.
    pub fn update<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut InterviewSession) -> T,
    ) -> Result<T, SessionError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        Ok(f(entry.value_mut()))
    }

    pub fn remove(&self, id: &str) -> Option<InterviewSession> {
        let removed = self.sessions.remove(id).map(|(_, session)| session);
        if removed.is_some() {
            tracing::info!(session_id = %id, "interview session removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_state::TurnRole;
    use interview_types::InterviewState;
    use std::sync::Arc;

    #[test]
    fn test_create_and_get() {
        let store = SessionStore::new();
        let session = store.create("s1").unwrap();

        assert_eq!(session.state(), InterviewState::AskingInitial);
        assert_eq!(store.get("s1").unwrap().id(), "s1");
        assert!(store.get("missing").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_duplicate_create_is_rejected_and_keeps_existing() {
        let store = SessionStore::new();
        store.create("s1").unwrap();
        store
            .update("s1", |s| s.transition_to(InterviewState::AiSpeaking))
            .unwrap()
            .unwrap();

        let err = store.create("s1").unwrap_err();

        assert_eq!(err, SessionError::DuplicateSession("s1".to_string()));
        assert_eq!(store.get("s1").unwrap().state(), InterviewState::AiSpeaking);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_missing_session() {
        let store = SessionStore::new();
        let err = store.update("ghost", |s| s.force_end()).unwrap_err();
        assert_eq!(err, SessionError::NotFound("ghost".to_string()));
    }

    #[test]
    fn test_update_mutates_in_place() {
        let store = SessionStore::new();
        store.create("s1").unwrap();

        store
            .update("s1", |s| {
                s.record_turn(TurnRole::User, "hello");
                s.increment_question_count();
            })
            .unwrap();

        let session = store.get("s1").unwrap();
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.question_count(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = SessionStore::new();
        store.create("s1").unwrap();

        assert!(store.remove("s1").is_some());
        assert!(store.remove("s1").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_sessions_do_not_interfere() {
        let store = Arc::new(SessionStore::new());
        let mut handles = vec![];
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("session-{i}");
                store.create(&id).unwrap();
                store
                    .update(&id, |s| s.transition_to(InterviewState::AiSpeaking))
                    .unwrap()
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 16);
        assert_eq!(
            store.get("session-7").unwrap().state(),
            InterviewState::AiSpeaking
        );
    }
}
