//! Picks a provider for each session and falls back between them.
//!
//! A session stays on the provider that greeted it for as long as that
//! provider keeps answering. Switching providers loses context, so it only
//! happens when the bound provider is unreachable or fails a call, and every
//! switch is logged with both provider names.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::provider::{InterviewProvider, ProviderError, ProviderKind, ProviderReply};

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum OrchestratorError {
    #[error("No AI provider is available")]
    NoProviderAvailable,
    #[error("Interview {0} has not been initialized")]
    SessionNotInitialized(String),
    #[error("{provider} provider failed: {source}")]
    ProviderFailed {
        provider: ProviderKind,
        #[source]
        source: ProviderError,
    },
    #[error("Both providers failed. Primary: {primary}. Secondary: {secondary}")]
    BothProvidersFailed {
        primary: ProviderError,
        secondary: ProviderError,
    },
}

impl OrchestratorError {
    /// True when the failure came from not reaching any backend at all, as
    /// opposed to a backend answering badly.
    pub fn is_unavailable(&self) -> bool {
        match self {
            OrchestratorError::NoProviderAvailable => true,
            OrchestratorError::ProviderFailed { source, .. } => {
                matches!(source, ProviderError::Unavailable { .. })
            }
            OrchestratorError::BothProvidersFailed { primary, secondary } => {
                matches!(primary, ProviderError::Unavailable { .. })
                    && matches!(secondary, ProviderError::Unavailable { .. })
            }
            OrchestratorError::SessionNotInitialized(_) => false,
        }
    }
}

pub struct Orchestrator {
    providers: [Option<Arc<dyn InterviewProvider>>; 2],
    prefer_primary: bool,
    bindings: DashMap<String, ProviderKind>,
}

impl Orchestrator {
    pub fn new(
        primary: Option<Arc<dyn InterviewProvider>>,
        secondary: Option<Arc<dyn InterviewProvider>>,
        prefer_primary: bool,
    ) -> Self {
        Self {
            providers: [primary, secondary],
            prefer_primary,
            bindings: DashMap::new(),
        }
    }

    /// The provider currently servicing `session_id`.
    pub fn binding(&self, session_id: &str) -> Option<ProviderKind> {
        self.bindings.get(session_id).map(|entry| *entry.value())
    }

    pub fn active_bindings(&self) -> usize {
        self.bindings.len()
    }

    /// Whether any configured provider is worth calling right now.
    pub fn has_available_provider(&self) -> bool {
        ProviderKind::ALL
            .iter()
            .any(|kind| self.resolve(*kind).is_some())
    }

    fn configured(&self, kind: ProviderKind) -> Option<&Arc<dyn InterviewProvider>> {
        self.providers[kind.index()].as_ref()
    }

    fn resolve(&self, kind: ProviderKind) -> Option<Arc<dyn InterviewProvider>> {
        self.configured(kind)
            .filter(|provider| provider.is_available())
            .cloned()
    }

    fn rebind(&self, session_id: &str, kind: ProviderKind) {
        if let Some(mut entry) = self.bindings.get_mut(session_id) {
            *entry = kind;
        }
    }

    /// Returns the provider for `session_id`, binding one if needed.
    ///
    /// An existing binding wins as long as its provider resolves. Otherwise
    /// the binding is dropped and the primary is chosen when preferred and
    /// available, then the secondary.
    pub fn ensure_bound(
        &self,
        session_id: &str,
    ) -> Result<(ProviderKind, Arc<dyn InterviewProvider>), OrchestratorError> {
        if let Some(kind) = self.binding(session_id) {
            if let Some(provider) = self.resolve(kind) {
                return Ok((kind, provider));
            }
            warn!(session_id = %session_id, provider = %kind, "bound provider no longer available, clearing binding");
            self.bindings.remove(session_id);
        }

        let candidates: &[ProviderKind] = if self.prefer_primary {
            &[ProviderKind::Primary, ProviderKind::Secondary]
        } else {
            &[ProviderKind::Secondary]
        };

        for &kind in candidates {
            if let Some(provider) = self.resolve(kind) {
                self.bindings.insert(session_id.to_string(), kind);
                info!(session_id = %session_id, provider = %kind, "bound session to provider");
                return Ok((kind, provider));
            }
        }

        Err(OrchestratorError::NoProviderAvailable)
    }

    /// Starts a conversation and returns the greeting.
    ///
    /// A failing primary gets exactly one fallback to the secondary.
    pub async fn initialize_conversation(
        &self,
        session_id: &str,
    ) -> Result<String, OrchestratorError> {
        let (kind, provider) = self.ensure_bound(session_id)?;

        let primary_error = match provider.initialize_conversation(session_id).await {
            Ok(greeting) => {
                info!(session_id = %session_id, provider = %kind, "conversation initialized");
                return Ok(greeting);
            }
            Err(e) if kind == ProviderKind::Primary => e,
            Err(e) => {
                self.bindings.remove(session_id);
                return Err(OrchestratorError::ProviderFailed {
                    provider: kind,
                    source: e,
                });
            }
        };

        self.bindings.remove(session_id);
        let Some(secondary) = self.resolve(ProviderKind::Secondary) else {
            warn!(session_id = %session_id, error = %primary_error, "primary provider failed and no secondary provider is available");
            return Err(OrchestratorError::ProviderFailed {
                provider: ProviderKind::Primary,
                source: primary_error,
            });
        };

        warn!(
            session_id = %session_id,
            from = %ProviderKind::Primary,
            to = %ProviderKind::Secondary,
            error = %primary_error,
            "primary provider failed to initialize, falling back"
        );

        match secondary.initialize_conversation(session_id).await {
            Ok(greeting) => {
                self.bindings
                    .insert(session_id.to_string(), ProviderKind::Secondary);
                info!(session_id = %session_id, provider = %ProviderKind::Secondary, "conversation initialized after fallback");
                Ok(greeting)
            }
            Err(secondary_error) => Err(OrchestratorError::BothProvidersFailed {
                primary: primary_error,
                secondary: secondary_error,
            }),
        }
    }

    /// Sends an answer to the session's provider.
    ///
    /// If the bound provider became unreachable the session moves to the
    /// other one before the call. If the primary fails the call, the
    /// secondary gets one try. Either move counts as the single fallback.
    pub async fn process_answer(
        &self,
        session_id: &str,
        answer: &str,
    ) -> Result<ProviderReply, OrchestratorError> {
        let bound = self
            .binding(session_id)
            .ok_or_else(|| OrchestratorError::SessionNotInitialized(session_id.to_string()))?;

        if self.resolve(bound).is_none() {
            let target = bound.other();
            let provider = self
                .resolve(target)
                .ok_or(OrchestratorError::NoProviderAvailable)?;
            warn!(
                session_id = %session_id,
                from = %bound,
                to = %target,
                "bound provider unreachable, switching mid-interview; earlier turns are not carried over"
            );
            self.rebind(session_id, target);
            return seed_and_process(target, provider.as_ref(), session_id, answer)
                .await
                .map_err(|source| OrchestratorError::ProviderFailed {
                    provider: target,
                    source,
                });
        }

        let (kind, provider) = self.ensure_bound(session_id)?;
        let primary_error = match provider.process_answer(session_id, answer).await {
            Ok(reply) => return Ok(reply),
            Err(ProviderError::SessionNotInitialized(_)) => {
                return Err(OrchestratorError::SessionNotInitialized(
                    session_id.to_string(),
                ));
            }
            Err(e) if kind == ProviderKind::Primary => e,
            Err(e) => {
                return Err(OrchestratorError::ProviderFailed {
                    provider: kind,
                    source: e,
                });
            }
        };

        let Some(secondary) = self.resolve(ProviderKind::Secondary) else {
            warn!(session_id = %session_id, error = %primary_error, "primary provider failed and no secondary provider is available");
            return Err(OrchestratorError::ProviderFailed {
                provider: ProviderKind::Primary,
                source: primary_error,
            });
        };

        warn!(
            session_id = %session_id,
            from = %ProviderKind::Primary,
            to = %ProviderKind::Secondary,
            error = %primary_error,
            "primary provider failed to process answer, falling back"
        );

        match seed_and_process(ProviderKind::Secondary, secondary.as_ref(), session_id, answer).await
        {
            Ok(reply) => {
                self.rebind(session_id, ProviderKind::Secondary);
                Ok(reply)
            }
            Err(secondary_error) => Err(OrchestratorError::BothProvidersFailed {
                primary: primary_error,
                secondary: secondary_error,
            }),
        }
    }

    /// Drops the session from both providers and forgets its binding.
    pub async fn cleanup(&self, session_id: &str) {
        for provider in self.providers.iter().flatten() {
            provider.cleanup(session_id).await;
        }
        if self.bindings.remove(session_id).is_some() {
            info!(session_id = %session_id, "provider binding removed");
        }
    }
}

/// Calls `process_answer`, first opening a conversation if the provider has
/// never seen this session.
async fn seed_and_process(
    kind: ProviderKind,
    provider: &dyn InterviewProvider,
    session_id: &str,
    answer: &str,
) -> Result<ProviderReply, ProviderError> {
    match provider.process_answer(session_id, answer).await {
        Err(ProviderError::SessionNotInitialized(_)) => {
            info!(session_id = %session_id, provider = %kind, "seeding conversation on fallback provider");
            provider.initialize_conversation(session_id).await?;
            provider.process_answer(session_id, answer).await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockInterviewProvider;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Stateful stand-in for a backend that remembers which sessions it greeted.
    struct FakeProvider {
        name: &'static str,
        available: AtomicBool,
        fail_init: AtomicBool,
        fail_process: AtomicBool,
        sessions: Mutex<HashSet<String>>,
        inits: AtomicUsize,
        answers: AtomicUsize,
        cleanups: AtomicUsize,
    }

    impl FakeProvider {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                available: AtomicBool::new(true),
                fail_init: AtomicBool::new(false),
                fail_process: AtomicBool::new(false),
                sessions: Mutex::new(HashSet::new()),
                inits: AtomicUsize::new(0),
                answers: AtomicUsize::new(0),
                cleanups: AtomicUsize::new(0),
            })
        }

        fn failure(&self) -> ProviderError {
            ProviderError::CallFailed {
                provider: self.name,
                reason: "simulated failure".to_string(),
            }
        }

        fn has_session(&self, id: &str) -> bool {
            self.sessions.lock().unwrap().contains(id)
        }
    }

    #[async_trait]
    impl InterviewProvider for FakeProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_available(&self) -> bool {
            self.available.load(Ordering::SeqCst)
        }

        async fn initialize_conversation(&self, session_id: &str) -> Result<String, ProviderError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            if self.fail_init.load(Ordering::SeqCst) {
                return Err(self.failure());
            }
            self.sessions.lock().unwrap().insert(session_id.to_string());
            Ok(format!("Hello from {}", self.name))
        }

        async fn process_answer(
            &self,
            session_id: &str,
            _answer: &str,
        ) -> Result<ProviderReply, ProviderError> {
            if !self.has_session(session_id) {
                return Err(ProviderError::SessionNotInitialized(session_id.to_string()));
            }
            if self.fail_process.load(Ordering::SeqCst) {
                return Err(self.failure());
            }
            let n = self.answers.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ProviderReply::Question {
                text: format!("{} question {n}", self.name),
            })
        }

        async fn cleanup(&self, session_id: &str) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            self.sessions.lock().unwrap().remove(session_id);
        }
    }

    fn orchestrator(primary: &Arc<FakeProvider>, secondary: &Arc<FakeProvider>) -> Orchestrator {
        Orchestrator::new(Some(primary.clone()), Some(secondary.clone()), true)
    }

    #[tokio::test]
    async fn test_primary_then_fallback_scenario() {
        let primary = FakeProvider::new("lm_studio");
        let secondary = FakeProvider::new("gemini");
        let orchestrator = orchestrator(&primary, &secondary);

        let greeting = orchestrator.initialize_conversation("s1").await.unwrap();
        assert_eq!(greeting, "Hello from lm_studio");
        assert_eq!(orchestrator.binding("s1"), Some(ProviderKind::Primary));

        let reply = orchestrator
            .process_answer("s1", "I have 5 years experience")
            .await
            .unwrap();
        assert_eq!(
            reply,
            ProviderReply::Question {
                text: "lm_studio question 1".to_string()
            }
        );

        primary.fail_process.store(true, Ordering::SeqCst);
        let reply = orchestrator
            .process_answer("s1", "I led a team of four")
            .await
            .unwrap();

        assert_eq!(
            reply,
            ProviderReply::Question {
                text: "gemini question 1".to_string()
            }
        );
        assert_eq!(orchestrator.binding("s1"), Some(ProviderKind::Secondary));
        assert_eq!(secondary.inits.load(Ordering::SeqCst), 1, "secondary was seeded");
    }

    #[tokio::test]
    async fn test_binding_is_sticky() {
        let primary = FakeProvider::new("lm_studio");
        let secondary = FakeProvider::new("gemini");
        let orchestrator = orchestrator(&primary, &secondary);
        orchestrator.initialize_conversation("s1").await.unwrap();

        orchestrator.process_answer("s1", "one").await.unwrap();
        orchestrator.process_answer("s1", "two").await.unwrap();

        assert_eq!(primary.answers.load(Ordering::SeqCst), 2);
        assert_eq!(secondary.answers.load(Ordering::SeqCst), 0);
        assert_eq!(orchestrator.binding("s1"), Some(ProviderKind::Primary));
    }

    #[tokio::test]
    async fn test_failing_primary_initializes_on_secondary() {
        let primary = FakeProvider::new("lm_studio");
        let secondary = FakeProvider::new("gemini");
        primary.fail_init.store(true, Ordering::SeqCst);
        let orchestrator = orchestrator(&primary, &secondary);

        let greeting = orchestrator.initialize_conversation("s1").await.unwrap();
        assert_eq!(greeting, "Hello from gemini");
        assert_eq!(orchestrator.binding("s1"), Some(ProviderKind::Secondary));

        // Stays on the secondary even once the primary would work again.
        primary.fail_init.store(false, Ordering::SeqCst);
        orchestrator.process_answer("s1", "answer").await.unwrap();
        assert_eq!(secondary.answers.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.binding("s1"), Some(ProviderKind::Secondary));
    }

    #[tokio::test]
    async fn test_both_providers_fail_to_initialize() {
        let primary = FakeProvider::new("lm_studio");
        let secondary = FakeProvider::new("gemini");
        primary.fail_init.store(true, Ordering::SeqCst);
        secondary.fail_init.store(true, Ordering::SeqCst);
        let orchestrator = orchestrator(&primary, &secondary);

        let err = orchestrator.initialize_conversation("s1").await.unwrap_err();

        assert!(matches!(err, OrchestratorError::BothProvidersFailed { .. }));
        assert!(!err.is_unavailable());
        assert_eq!(orchestrator.binding("s1"), None);
    }

    #[tokio::test]
    async fn test_secondary_failure_is_not_retried() {
        let secondary = FakeProvider::new("gemini");
        secondary.fail_init.store(true, Ordering::SeqCst);
        let orchestrator = Orchestrator::new(None, Some(secondary.clone()), true);

        let err = orchestrator.initialize_conversation("s1").await.unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::ProviderFailed {
                provider: ProviderKind::Secondary,
                ..
            }
        ));
        assert_eq!(secondary.inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_provider_available() {
        let primary = FakeProvider::new("lm_studio");
        primary.available.store(false, Ordering::SeqCst);
        let orchestrator = Orchestrator::new(Some(primary), None, true);

        let err = orchestrator.initialize_conversation("s1").await.unwrap_err();

        assert_eq!(err, OrchestratorError::NoProviderAvailable);
        assert!(err.is_unavailable());
        assert!(!orchestrator.has_available_provider());
    }

    #[tokio::test]
    async fn test_unpreferred_primary_is_not_selected() {
        let primary = FakeProvider::new("lm_studio");
        let secondary = FakeProvider::new("gemini");
        let orchestrator = Orchestrator::new(Some(primary.clone()), Some(secondary), false);

        orchestrator.initialize_conversation("s1").await.unwrap();

        assert_eq!(orchestrator.binding("s1"), Some(ProviderKind::Secondary));
        assert_eq!(primary.inits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unavailable_primary_is_skipped_at_selection() {
        let primary = FakeProvider::new("lm_studio");
        let secondary = FakeProvider::new("gemini");
        primary.available.store(false, Ordering::SeqCst);
        let orchestrator = orchestrator(&primary, &secondary);

        orchestrator.initialize_conversation("s1").await.unwrap();

        assert_eq!(orchestrator.binding("s1"), Some(ProviderKind::Secondary));
        assert_eq!(primary.inits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mid_interview_switch_when_bound_provider_unreachable() {
        let primary = FakeProvider::new("lm_studio");
        let secondary = FakeProvider::new("gemini");
        let orchestrator = orchestrator(&primary, &secondary);
        orchestrator.initialize_conversation("s1").await.unwrap();

        primary.available.store(false, Ordering::SeqCst);
        let reply = orchestrator.process_answer("s1", "answer").await.unwrap();

        assert_eq!(
            reply,
            ProviderReply::Question {
                text: "gemini question 1".to_string()
            }
        );
        assert_eq!(orchestrator.binding("s1"), Some(ProviderKind::Secondary));
        assert!(secondary.has_session("s1"));
    }

    #[tokio::test]
    async fn test_primary_process_failure_without_secondary() {
        let primary = FakeProvider::new("lm_studio");
        let orchestrator = Orchestrator::new(Some(primary.clone()), None, true);
        orchestrator.initialize_conversation("s1").await.unwrap();
        primary.fail_process.store(true, Ordering::SeqCst);

        let err = orchestrator.process_answer("s1", "answer").await.unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::ProviderFailed {
                provider: ProviderKind::Primary,
                ..
            }
        ));
        assert_eq!(orchestrator.binding("s1"), Some(ProviderKind::Primary));
    }

    #[tokio::test]
    async fn test_both_providers_fail_to_process() {
        let primary = FakeProvider::new("lm_studio");
        let secondary = FakeProvider::new("gemini");
        let orchestrator = orchestrator(&primary, &secondary);
        orchestrator.initialize_conversation("s1").await.unwrap();
        primary.fail_process.store(true, Ordering::SeqCst);
        secondary.fail_process.store(true, Ordering::SeqCst);

        let err = orchestrator.process_answer("s1", "answer").await.unwrap_err();

        assert!(matches!(err, OrchestratorError::BothProvidersFailed { .. }));
        assert_eq!(orchestrator.binding("s1"), Some(ProviderKind::Primary));
    }

    #[tokio::test]
    async fn test_process_without_initialize() {
        let primary = FakeProvider::new("lm_studio");
        let secondary = FakeProvider::new("gemini");
        let orchestrator = orchestrator(&primary, &secondary);

        let err = orchestrator.process_answer("s1", "hello").await.unwrap_err();

        assert_eq!(err, OrchestratorError::SessionNotInitialized("s1".to_string()));
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent_and_ends_session() {
        let primary = FakeProvider::new("lm_studio");
        let secondary = FakeProvider::new("gemini");
        let orchestrator = orchestrator(&primary, &secondary);
        orchestrator.initialize_conversation("s1").await.unwrap();

        orchestrator.cleanup("s1").await;
        orchestrator.cleanup("s1").await;

        assert_eq!(orchestrator.binding("s1"), None);
        assert_eq!(orchestrator.active_bindings(), 0);
        assert!(!primary.has_session("s1"));
        assert_eq!(primary.cleanups.load(Ordering::SeqCst), 2);
        assert_eq!(secondary.cleanups.load(Ordering::SeqCst), 2);

        let err = orchestrator.process_answer("s1", "late").await.unwrap_err();
        assert_eq!(err, OrchestratorError::SessionNotInitialized("s1".to_string()));
    }

    #[tokio::test]
    async fn test_cleanup_reaches_both_providers() {
        let mut primary = MockInterviewProvider::new();
        primary
            .expect_cleanup()
            .withf(|id| id == "s1")
            .times(1)
            .returning(|_| ());
        let mut secondary = MockInterviewProvider::new();
        secondary
            .expect_cleanup()
            .withf(|id| id == "s1")
            .times(1)
            .returning(|_| ());

        let orchestrator = Orchestrator::new(Some(Arc::new(primary)), Some(Arc::new(secondary)), true);

        orchestrator.cleanup("s1").await;
    }

    #[tokio::test]
    async fn test_unavailable_primary_error_is_reported_as_unavailable() {
        let mut primary = MockInterviewProvider::new();
        primary.expect_is_available().return_const(true);
        primary
            .expect_initialize_conversation()
            .times(1)
            .returning(|_| {
                Err(ProviderError::Unavailable {
                    provider: "lm_studio",
                    reason: "connection refused".to_string(),
                })
            });

        let orchestrator = Orchestrator::new(Some(Arc::new(primary)), None, true);
        let err = orchestrator.initialize_conversation("s1").await.unwrap_err();

        assert!(err.is_unavailable());
        assert_eq!(orchestrator.binding("s1"), None);
    }
}
