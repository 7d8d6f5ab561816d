use dashmap::DashMap;

use crate::prompt::InterviewPrompts;
use crate::provider::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// The authoritative history an adapter sends to its backend.
///
/// It always opens with the system prompt, the opening instruction and the
/// greeting the backend produced for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn open(prompts: &InterviewPrompts, greeting: &str) -> Self {
        Self {
            messages: vec![
                ChatMessage::new(ChatRole::System, prompts.system.clone()),
                ChatMessage::new(ChatRole::User, prompts.opening.clone()),
                ChatMessage::new(ChatRole::Assistant, greeting),
            ],
        }
    }

    /// The messages needed to ask for a greeting.
    pub fn opening_messages(prompts: &InterviewPrompts) -> Vec<ChatMessage> {
        vec![
            ChatMessage::new(ChatRole::System, prompts.system.clone()),
            ChatMessage::new(ChatRole::User, prompts.opening.clone()),
        ]
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// A copy of the history with `answer` appended, for sending to the backend.
    pub fn with_answer(&self, answer: &str) -> Vec<ChatMessage> {
        let mut messages = self.messages.clone();
        messages.push(ChatMessage::new(ChatRole::User, answer));
        messages
    }

    /// Records a completed exchange.
    pub fn commit(&mut self, answer: &str, reply: &str) {
        self.messages.push(ChatMessage::new(ChatRole::User, answer));
        self.messages.push(ChatMessage::new(ChatRole::Assistant, reply));
    }
}

/// Per-session conversations owned by one adapter.
#[derive(Debug, Default)]
pub struct ConversationBook {
    conversations: DashMap<String, Conversation>,
}

impl ConversationBook {
    pub fn insert(&self, session_id: &str, conversation: Conversation) {
        self.conversations
            .insert(session_id.to_string(), conversation);
    }

    /// Snapshot of a session's conversation, or `SessionNotInitialized`.
    pub fn snapshot(&self, session_id: &str) -> Result<Conversation, ProviderError> {
        self.conversations
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ProviderError::SessionNotInitialized(session_id.to_string()))
    }

    /// Commits an exchange if the session still exists.
    ///
    /// Returns `false` when the conversation was cleaned up while the backend
    /// call was in flight.
    pub fn commit(&self, session_id: &str, answer: &str, reply: &str) -> bool {
        match self.conversations.get_mut(session_id) {
            Some(mut entry) => {
                entry.commit(answer, reply);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.conversations.remove(session_id).is_some()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.conversations.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
