use crate::state::InterviewState;
use chrono::Utc;

/// Machine-readable codes carried by `ERROR` events.
pub mod error_codes {
    pub const INIT_ERROR: &str = "INIT_ERROR";
    pub const PROCESSING_ERROR: &str = "PROCESSING_ERROR";
    pub const UNKNOWN_MESSAGE_TYPE: &str = "UNKNOWN_MESSAGE_TYPE";
    pub const MESSAGE_ERROR: &str = "MESSAGE_ERROR";
    pub const SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";
    pub const DUPLICATE_SESSION: &str = "DUPLICATE_SESSION";
    pub const INVALID_TRANSITION: &str = "INVALID_TRANSITION";
}

/// Current time as Unix seconds, the timestamp format used by every event.
pub fn now_timestamp() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientEvent {
    UserTranscript(UserTranscriptEvent),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerEvent {
    ConnectionAck(ConnectionAckEvent),
    AiQuestion(AiQuestionEvent),
    InterviewState(InterviewStateEvent),
    InterviewEnd(InterviewEndEvent),
    Error(ErrorEvent),
}

impl ServerEvent {
    pub fn connection_ack(session_id: &str) -> Self {
        ServerEvent::ConnectionAck(ConnectionAckEvent {
            session_id: session_id.to_string(),
            message: "Connected successfully".to_string(),
            timestamp: now_timestamp(),
        })
    }

    pub fn question(session_id: &str, question: &str) -> Self {
        ServerEvent::AiQuestion(AiQuestionEvent {
            session_id: session_id.to_string(),
            question: question.to_string(),
            timestamp: now_timestamp(),
        })
    }

    pub fn state_changed(session_id: &str, state: InterviewState) -> Self {
        ServerEvent::InterviewState(InterviewStateEvent {
            session_id: session_id.to_string(),
            state,
            timestamp: now_timestamp(),
        })
    }

    /// The wire `type` tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::ConnectionAck(_) => "CONNECTION_ACK",
            ServerEvent::AiQuestion(_) => "AI_QUESTION",
            ServerEvent::InterviewState(_) => "INTERVIEW_STATE",
            ServerEvent::InterviewEnd(_) => "INTERVIEW_END",
            ServerEvent::Error(_) => "ERROR",
        }
    }
}

impl From<InterviewEndEvent> for ServerEvent {
    fn from(event: InterviewEndEvent) -> Self {
        ServerEvent::InterviewEnd(event)
    }
}

impl From<ErrorEvent> for ServerEvent {
    fn from(event: ErrorEvent) -> Self {
        ServerEvent::Error(event)
    }
}

/// `USER_TRANSCRIPT` event, sent once the candidate stops speaking.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTranscriptEvent {
    #[serde(default, alias = "interview_id")]
    session_id: Option<String>,
    transcript: String,
    #[serde(default)]
    timestamp: Option<f64>,
}

impl UserTranscriptEvent {
    pub fn new(session_id: &str, transcript: &str) -> Self {
        Self {
            session_id: Some(session_id.to_string()),
            transcript: transcript.to_string(),
            timestamp: Some(now_timestamp()),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn timestamp(&self) -> Option<f64> {
        self.timestamp
    }
}

/// `CONNECTION_ACK` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionAckEvent {
    session_id: String,
    message: String,
    timestamp: f64,
}

impl ConnectionAckEvent {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// `AI_QUESTION` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiQuestionEvent {
    session_id: String,
    question: String,
    timestamp: f64,
}

impl AiQuestionEvent {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn question(&self) -> &str {
        &self.question
    }
}

/// `INTERVIEW_STATE` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewStateEvent {
    session_id: String,
    state: InterviewState,
    timestamp: f64,
}

impl InterviewStateEvent {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> InterviewState {
        self.state
    }
}

/// `INTERVIEW_END` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewEndEvent {
    session_id: String,
    feedback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    timestamp: f64,
}

impl InterviewEndEvent {
    pub fn new(session_id: &str, feedback: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            feedback: feedback.to_string(),
            score: None,
            summary: None,
            timestamp: now_timestamp(),
        }
    }

    /// Scores are kept within 0..=100.
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score.clamp(0.0, 100.0));
        self
    }

    pub fn with_summary(mut self, summary: &str) -> Self {
        self.summary = Some(summary.to_string());
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn feedback(&self) -> &str {
        &self.feedback
    }

    pub fn score(&self) -> Option<f64> {
        self.score
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }
}

/// `ERROR` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    timestamp: f64,
}

impl ErrorEvent {
    pub fn new(error: &str) -> Self {
        Self {
            session_id: None,
            error: error.to_string(),
            code: None,
            timestamp: now_timestamp(),
        }
    }

    pub fn with_session_id(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

/// Reasons an inbound frame could not be turned into a [`ClientEvent`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Error processing message: {0}")]
    Malformed(String),
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Transcript must not be empty")]
    EmptyTranscript,
}

impl ProtocolError {
    /// The `ERROR` code reported to the client for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::UnknownType(_) => error_codes::UNKNOWN_MESSAGE_TYPE,
            ProtocolError::Malformed(_) | ProtocolError::EmptyTranscript => {
                error_codes::MESSAGE_ERROR
            }
        }
    }
}

/// Parses one inbound text frame.
///
/// The `type` tag is inspected before the body so that an unrecognised type is
/// reported as such rather than as a malformed message.
pub fn parse_client_event(text: &str) -> Result<ClientEvent, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    match value.get("type").and_then(|t| t.as_str()) {
        Some("USER_TRANSCRIPT") => {}
        Some(other) => return Err(ProtocolError::UnknownType(other.to_string())),
        None => return Err(ProtocolError::UnknownType("none".to_string())),
    }

    let event: ClientEvent =
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    match &event {
        ClientEvent::UserTranscript(t) if t.transcript().trim().is_empty() => {
            Err(ProtocolError::EmptyTranscript)
        }
        _ => Ok(event),
    }
}
