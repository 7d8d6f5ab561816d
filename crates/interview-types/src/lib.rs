//now both the server and any client can share these types
pub mod events;
pub mod state;

//re-export types for easier access
pub use events::{
    AiQuestionEvent, ClientEvent, ConnectionAckEvent, ErrorEvent, InterviewEndEvent,
    InterviewStateEvent, ProtocolError, ServerEvent, UserTranscriptEvent, error_codes,
    now_timestamp, parse_client_event,
};
pub use state::InterviewState;
