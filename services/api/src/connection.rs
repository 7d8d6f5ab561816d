//! One interview per connection.
//!
//! The driver only sees channels: inbound text frames and outbound
//! [`ServerEvent`]s. The WebSocket pump in [`crate::ws`] sits on the other
//! end, which keeps this logic testable without a socket.
//!
//! Flow:
//! `ACK -> initialize -> (AISpeaking, question, WaitingForUser) -> loop { transcript ->
//! ProcessingAnswer -> next question | end }`, then teardown.

use interview_core::{
    InterviewSession, OrchestratorError, ProviderReply, SessionError, TurnRole,
};
use interview_types::{
    ClientEvent, ErrorEvent, InterviewEndEvent, InterviewState, ServerEvent, error_codes,
    parse_client_event,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::state::AppState;

const UNAVAILABLE_MESSAGE: &str = "AI service is not available. Please ensure LM Studio is running or Gemini API key is configured.";

/// Whether the connection should keep reading after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct Connection {
    state: Arc<AppState>,
    session_id: String,
    outbound: mpsc::Sender<ServerEvent>,
}

/// Runs the interview for `session_id` until it ends or the client leaves.
///
/// Returns once the session has been torn down. Dropping `outbound` on return
/// is the signal for the transport to close.
pub async fn run(
    state: Arc<AppState>,
    session_id: String,
    mut inbound: mpsc::Receiver<String>,
    outbound: mpsc::Sender<ServerEvent>,
) {
    let conn = Connection {
        state,
        session_id,
        outbound,
    };

    conn.send(ServerEvent::connection_ack(&conn.session_id)).await;
    info!(session_id = %conn.session_id, "connection accepted");

    if !conn.claim_session().await {
        return;
    }

    if conn.start_interview().await == Flow::Continue {
        conn.receive_loop(&mut inbound).await;
    }

    conn.teardown().await;
}

impl Connection {
    async fn send(&self, event: ServerEvent) -> bool {
        let kind = event.kind();
        if self.outbound.send(event).await.is_err() {
            debug!(session_id = %self.session_id, event = kind, "client gone, dropping event");
            return false;
        }
        true
    }

    async fn send_error(&self, message: &str, code: &str) {
        let event = ErrorEvent::new(message)
            .with_session_id(&self.session_id)
            .with_code(code);
        self.send(event.into()).await;
    }

    async fn send_state(&self, state: InterviewState) {
        self.send(ServerEvent::state_changed(&self.session_id, state))
            .await;
    }

    /// Registers this connection and creates its session. A second live
    /// connection for the same id is turned away without touching the first.
    async fn claim_session(&self) -> bool {
        let id = &self.session_id;
        if !self.state.connections.register(id) {
            warn!(session_id = %id, "rejecting second connection for live session");
            self.reject_duplicate(&format!("Interview session already exists: {id}"))
                .await;
            return false;
        }

        if let Err(e) = self.state.store.create(id) {
            warn!(session_id = %id, error = %e, "session already tracked");
            self.reject_duplicate(&e.to_string()).await;
            self.state.connections.unregister(id);
            return false;
        }
        true
    }

    /// Closes out a rejected connection with an error and a final
    /// `INTERVIEW_END` addressed to it alone.
    async fn reject_duplicate(&self, message: &str) {
        self.send_error(message, error_codes::DUPLICATE_SESSION)
            .await;
        let feedback = format!("Interview could not be started: {message}");
        self.send(InterviewEndEvent::new(&self.session_id, &feedback).into())
            .await;
    }

    /// Applies `step` to the stored session and returns the resulting state.
    fn apply(
        &self,
        step: impl FnOnce(&mut InterviewSession) -> Result<(), SessionError>,
    ) -> Result<InterviewState, SessionError> {
        self.state.store.update(&self.session_id, |session| {
            step(session)?;
            Ok(session.state())
        })?
    }

    /// Reports a rejected transition. The interview carries on.
    async fn report_transition_error(&self, error: &SessionError) {
        match error {
            SessionError::NotFound(_) => {
                self.send_error("Interview session not found", error_codes::SESSION_NOT_FOUND)
                    .await;
            }
            other => {
                warn!(session_id = %self.session_id, error = %other, "rejected state transition");
                self.send_error(&other.to_string(), error_codes::INVALID_TRANSITION)
                    .await;
            }
        }
    }

    /// Puts a question in front of the candidate:
    /// `AISpeaking`, the question itself, then `WaitingForUser`.
    async fn ask(&self, question: &str) {
        self.send_state(InterviewState::AiSpeaking).await;
        self.send(ServerEvent::question(&self.session_id, question))
            .await;

        match self.apply(|s| s.transition_to(InterviewState::WaitingForUser)) {
            Ok(state) => self.send_state(state).await,
            Err(e) => self.report_transition_error(&e).await,
        }
    }

    async fn start_interview(&self) -> Flow {
        let id = &self.session_id;
        match self.state.orchestrator.initialize_conversation(id).await {
            Ok(greeting) => {
                let started = self.apply(|s| {
                    s.transition_to(InterviewState::AiSpeaking)?;
                    s.record_turn(TurnRole::Assistant, &greeting);
                    Ok(())
                });
                if let Err(e) = started {
                    self.report_transition_error(&e).await;
                    return Flow::Stop;
                }
                info!(session_id = %id, provider = ?self.state.orchestrator.binding(id), "interview started");
                self.ask(&greeting).await;
                Flow::Continue
            }
            Err(e) => {
                error!(session_id = %id, error = %e, "failed to start interview");
                let message = init_error_message(&e);
                self.send_error(&message, error_codes::INIT_ERROR).await;

                if let Err(e) = self.apply(|s| {
                    s.force_end();
                    Ok(())
                }) {
                    warn!(session_id = %id, error = %e, "could not mark session ended");
                }
                self.send_state(InterviewState::Ended).await;
                let feedback = format!("Interview could not be started: {message}");
                self.send(InterviewEndEvent::new(id, &feedback).into())
                    .await;

                tokio::time::sleep(self.state.close_grace).await;
                Flow::Stop
            }
        }
    }

    async fn receive_loop(&self, inbound: &mut mpsc::Receiver<String>) {
        while let Some(text) = inbound.recv().await {
            let flow = match parse_client_event(&text) {
                Ok(ClientEvent::UserTranscript(event)) => {
                    if let Some(other) = event.session_id().filter(|other| *other != self.session_id) {
                        debug!(session_id = %self.session_id, claimed = %other, "transcript names a different session, using the connection's");
                    }
                    self.handle_transcript(event.transcript()).await
                }
                Err(e) => {
                    warn!(session_id = %self.session_id, error = %e, "rejected inbound message");
                    self.send_error(&e.to_string(), e.code()).await;
                    Flow::Continue
                }
            };

            if flow == Flow::Stop {
                break;
            }
        }
        debug!(session_id = %self.session_id, "receive loop finished");
    }

    async fn handle_transcript(&self, transcript: &str) -> Flow {
        let id = &self.session_id;

        let processing = self.apply(|s| {
            s.begin_processing_answer()?;
            s.record_turn(TurnRole::User, transcript);
            Ok(())
        });
        match processing {
            Ok(state) => self.send_state(state).await,
            Err(e) => {
                self.report_transition_error(&e).await;
                return Flow::Continue;
            }
        }

        let result = self
            .state
            .orchestrator
            .process_answer(id, transcript)
            .await;

        match result {
            Ok(ProviderReply::End {
                feedback,
                score,
                summary,
            }) => {
                if let Err(e) = self.apply(|s| {
                    s.record_turn(TurnRole::Assistant, &feedback);
                    s.transition_to(InterviewState::Ended)
                }) {
                    warn!(session_id = %id, error = %e, "could not record end of interview");
                }
                let mut end = InterviewEndEvent::new(id, &feedback).with_score(score);
                if let Some(summary) = summary.as_deref() {
                    end = end.with_summary(summary);
                }
                info!(session_id = %id, score, "interview ended");
                self.send(end.into()).await;

                self.state.store.remove(id);
                self.state.orchestrator.cleanup(id).await;
                Flow::Stop
            }
            Ok(ProviderReply::Question { text }) => {
                let next = self.apply(|s| {
                    s.increment_question_count();
                    s.begin_next_question()?;
                    s.record_turn(TurnRole::Assistant, &text);
                    Ok(())
                });
                if let Err(e) = next {
                    self.report_transition_error(&e).await;
                    return Flow::Continue;
                }
                self.ask(&text).await;
                Flow::Continue
            }
            Err(e) => {
                error!(session_id = %id, error = %e, "failed to process answer");
                self.send_error(
                    &format!("Failed to process answer: {e}"),
                    error_codes::PROCESSING_ERROR,
                )
                .await;
                match self.apply(|s| s.return_to_waiting()) {
                    Ok(state) => self.send_state(state).await,
                    Err(e) => self.report_transition_error(&e).await,
                }
                Flow::Continue
            }
        }
    }

    async fn teardown(&self) {
        let id = &self.session_id;
        self.state.connections.unregister(id);
        self.state.store.remove(id);
        self.state.orchestrator.cleanup(id).await;
        info!(session_id = %id, "connection closed");
    }
}

/// Rewrites a start-up failure into something a candidate can act on.
pub fn init_error_message(error: &OrchestratorError) -> String {
    if error.is_unavailable() {
        return UNAVAILABLE_MESSAGE.to_string();
    }

    let text = error.to_string();
    let lower = text.to_lowercase();
    if lower.contains("api key") || lower.contains("api_key") || lower.contains("permission_denied") {
        return "Invalid or missing API key. Please check your backend .env file.".to_string();
    }
    text
}
