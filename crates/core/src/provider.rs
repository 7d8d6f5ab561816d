use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::fmt;

/// Which of the two backends is servicing a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Local backend, preferred when configured.
    Primary,
    /// Remote backend used as the fallback.
    Secondary,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Primary, ProviderKind::Secondary];

    pub fn other(self) -> Self {
        match self {
            ProviderKind::Primary => ProviderKind::Secondary,
            ProviderKind::Secondary => ProviderKind::Primary,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            ProviderKind::Primary => 0,
            ProviderKind::Secondary => 1,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Primary => f.write_str("primary"),
            ProviderKind::Secondary => f.write_str("secondary"),
        }
    }
}

/// What a provider decided after hearing an answer.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderReply {
    Question {
        text: String,
    },
    End {
        feedback: String,
        score: f64,
        summary: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} provider is unavailable: {reason}")]
    Unavailable {
        provider: &'static str,
        reason: String,
    },
    #[error("{provider} provider call failed: {reason}")]
    CallFailed {
        provider: &'static str,
        reason: String,
    },
    #[error("No conversation initialized for session {0}")]
    SessionNotInitialized(String),
}

/// A conversational backend that can run an interview.
///
/// Implementations keep their own per-session conversation; callers only see
/// the greeting, each reply, and a best-effort cleanup.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InterviewProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether the backend is currently worth calling.
    fn is_available(&self) -> bool;

    /// Opens a conversation for `session_id` and returns the greeting.
    ///
    /// Calling it again for the same id starts the conversation over.
    async fn initialize_conversation(&self, session_id: &str) -> Result<String, ProviderError>;

    async fn process_answer(
        &self,
        session_id: &str,
        answer: &str,
    ) -> Result<ProviderReply, ProviderError>;

    /// Drops any state held for `session_id`. Unknown ids are ignored.
    async fn cleanup(&self, session_id: &str);
}
