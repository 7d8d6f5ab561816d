use serde::{Deserialize, Serialize};
use std::fmt;

/// Phases an interview moves through.
///
/// Every session starts in `AskingInitial`. `Ended` is absorbing and can be
/// entered from any phase, which gives error paths an unconditional way out.
///
/// State flow:
/// `AskingInitial -> AISpeaking -> WaitingForUser -> UserSpeaking -> SilenceDetected
/// -> ProcessingAnswer -> NextQuestionReady -> AISpeaking (loop)` or `-> Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterviewState {
    AskingInitial,
    #[serde(rename = "AISpeaking")]
    AiSpeaking,
    WaitingForUser,
    UserSpeaking,
    SilenceDetected,
    ProcessingAnswer,
    NextQuestionReady,
    Ended,
}

impl InterviewState {
    pub const ALL: [InterviewState; 8] = [
        InterviewState::AskingInitial,
        InterviewState::AiSpeaking,
        InterviewState::WaitingForUser,
        InterviewState::UserSpeaking,
        InterviewState::SilenceDetected,
        InterviewState::ProcessingAnswer,
        InterviewState::NextQuestionReady,
        InterviewState::Ended,
    ];

    /// Targets listed in the transition table for this state.
    ///
    /// The unconditional move to `Ended` is not part of this list; use
    /// [`InterviewState::can_transition_to`] to check a move.
    pub fn allowed_targets(self) -> &'static [InterviewState] {
        use InterviewState::*;
        match self {
            AskingInitial => &[AiSpeaking, ProcessingAnswer],
            AiSpeaking => &[WaitingForUser],
            WaitingForUser => &[UserSpeaking],
            UserSpeaking => &[SilenceDetected],
            SilenceDetected => &[ProcessingAnswer],
            ProcessingAnswer => &[NextQuestionReady, Ended],
            NextQuestionReady => &[AiSpeaking],
            Ended => &[],
        }
    }

    pub fn can_transition_to(self, target: InterviewState) -> bool {
        target == InterviewState::Ended || self.allowed_targets().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        self == InterviewState::Ended
    }

    /// The name used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            InterviewState::AskingInitial => "AskingInitial",
            InterviewState::AiSpeaking => "AISpeaking",
            InterviewState::WaitingForUser => "WaitingForUser",
            InterviewState::UserSpeaking => "UserSpeaking",
            InterviewState::SilenceDetected => "SilenceDetected",
            InterviewState::ProcessingAnswer => "ProcessingAnswer",
            InterviewState::NextQuestionReady => "NextQuestionReady",
            InterviewState::Ended => "Ended",
        }
    }
}

impl fmt::Display for InterviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
