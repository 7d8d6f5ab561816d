use chrono::{DateTime, Utc};
use interview_types::InterviewState;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: InterviewState,
        to: InterviewState,
    },
    #[error("Interview session not found: {0}")]
    NotFound(String),
    #[error("Interview session already exists: {0}")]
    DuplicateSession(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
}

/// One utterance in the interview transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A single candidate's interview.
///
/// The session owns the phase the interview is in and a transcript of what was
/// said. The transcript is for inspection only; each provider keeps its own
/// conversation for generating questions.
#[derive(Debug, Clone)]
pub struct InterviewSession {
    id: String,
    state: InterviewState,
    created_at: DateTime<Utc>,
    history: Vec<Turn>,
    question_count: u32,
}

impl InterviewSession {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: InterviewState::AskingInitial,
            created_at: Utc::now(),
            history: vec![],
            question_count: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> InterviewState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn question_count(&self) -> u32 {
        self.question_count
    }

    /// Moves to `target` if the transition table allows it.
    ///
    /// On rejection the state is left untouched. Moving to `Ended` always
    /// succeeds.
    pub fn transition_to(&mut self, target: InterviewState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(target) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: target,
            });
        }
        tracing::debug!(session_id = %self.id, from = %self.state, to = %target, "state transition");
        self.state = target;
        Ok(())
    }

    /// Applies a chain of transitions as one step: either every hop is legal
    /// and the session lands on the last state, or nothing changes.
    pub fn transition_through(&mut self, path: &[InterviewState]) -> Result<(), SessionError> {
        let mut current = self.state;
        for &next in path {
            if !current.can_transition_to(next) {
                return Err(SessionError::InvalidTransition {
                    from: current,
                    to: next,
                });
            }
            current = next;
        }
        if let Some(&last) = path.last() {
            tracing::debug!(session_id = %self.id, from = %self.state, to = %last, "state transition");
            self.state = last;
        }
        Ok(())
    }

    /// Moves from wherever the candidate's turn currently is into
    /// `ProcessingAnswer`.
    ///
    /// A final transcript means the candidate spoke and then went quiet, so the
    /// intermediate speaking/silence phases are passed through on the way.
    pub fn begin_processing_answer(&mut self) -> Result<(), SessionError> {
        use InterviewState::*;
        let path: &[InterviewState] = match self.state {
            WaitingForUser => &[UserSpeaking, SilenceDetected, ProcessingAnswer],
            UserSpeaking => &[SilenceDetected, ProcessingAnswer],
            _ => &[ProcessingAnswer],
        };
        self.transition_through(path)
    }

    /// Puts the next question in the AI's mouth: `-> NextQuestionReady -> AISpeaking`.
    pub fn begin_next_question(&mut self) -> Result<(), SessionError> {
        use InterviewState::*;
        self.transition_through(&[NextQuestionReady, AiSpeaking])
    }

    /// Hands the floor back to the candidate after a failed answer.
    ///
    /// There is no direct edge from `ProcessingAnswer` to `WaitingForUser`, so
    /// the session takes the question loop back around without a new question.
    pub fn return_to_waiting(&mut self) -> Result<(), SessionError> {
        use InterviewState::*;
        match self.state {
            WaitingForUser => Ok(()),
            ProcessingAnswer => {
                self.transition_through(&[NextQuestionReady, AiSpeaking, WaitingForUser])
            }
            NextQuestionReady => self.transition_through(&[AiSpeaking, WaitingForUser]),
            _ => self.transition_to(WaitingForUser),
        }
    }

    /// Ends the interview regardless of the current phase.
    pub fn force_end(&mut self) {
        if self.state != InterviewState::Ended {
            tracing::debug!(session_id = %self.id, from = %self.state, "forcing interview end");
        }
        self.state = InterviewState::Ended;
    }

    pub fn record_turn(&mut self, role: TurnRole, content: &str) {
        self.history.push(Turn {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn increment_question_count(&mut self) {
        self.question_count += 1;
    }
}
