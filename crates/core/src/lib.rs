pub mod conversation;
pub mod gemini;
pub mod lm_studio;
pub mod orchestrator;
pub mod outcome;
pub mod prompt;
pub mod provider;
pub mod session_state;
pub mod session_store;

pub use interview_types as types;
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use provider::{InterviewProvider, ProviderError, ProviderKind, ProviderReply};
pub use session_state::{InterviewSession, SessionError, Turn, TurnRole};
pub use session_store::SessionStore;
