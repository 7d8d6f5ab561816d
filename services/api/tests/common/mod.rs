//! Common test utilities.
#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::StreamExt;
use interview_api::state::AppState;
use interview_api::{cors_layer, router};
use interview_core::{InterviewProvider, Orchestrator, ProviderError, ProviderReply};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Provider that replays scripted replies and remembers greeted sessions.
pub struct ScriptedProvider {
    pub name: &'static str,
    pub available: AtomicBool,
    pub fail_init: AtomicBool,
    pub fail_process: AtomicBool,
    replies: Mutex<VecDeque<ProviderReply>>,
    sessions: Mutex<HashSet<String>>,
    pub answers: AtomicUsize,
    pub cleanups: AtomicUsize,
    during_answer: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ScriptedProvider {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            available: AtomicBool::new(true),
            fail_init: AtomicBool::new(false),
            fail_process: AtomicBool::new(false),
            replies: Mutex::new(VecDeque::new()),
            sessions: Mutex::new(HashSet::new()),
            answers: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
            during_answer: Mutex::new(None),
        })
    }

    pub fn push_question(&self, text: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(ProviderReply::Question {
                text: text.to_string(),
            });
    }

    pub fn push_end(&self, feedback: &str, score: f64) {
        self.replies.lock().unwrap().push_back(ProviderReply::End {
            feedback: feedback.to_string(),
            score,
            summary: Some(feedback.to_string()),
        });
    }

    /// Runs `hook` inside the next `process_answer` call.
    pub fn during_next_answer(&self, hook: impl FnOnce() + Send + 'static) {
        *self.during_answer.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn has_session(&self, id: &str) -> bool {
        self.sessions.lock().unwrap().contains(id)
    }
}

#[async_trait]
impl InterviewProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn initialize_conversation(&self, session_id: &str) -> Result<String, ProviderError> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(ProviderError::CallFailed {
                provider: self.name,
                reason: "simulated init failure".to_string(),
            });
        }
        self.sessions.lock().unwrap().insert(session_id.to_string());
        Ok(format!("Welcome! I'm the {} interviewer. Tell me about yourself.", self.name))
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
            return Err(ProviderError::CallFailed {
                provider: self.name,
                reason: "simulated process failure".to_string(),
            });
        }
        self.answers.fetch_add(1, Ordering::SeqCst);
        let hook = self.during_answer.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        let scripted = self.replies.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| ProviderReply::Question {
            text: format!("{} follow-up question", self.name),
        }))
    }

    async fn cleanup(&self, session_id: &str) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().unwrap().remove(session_id);
    }
}

pub fn app_state(
    primary: Option<Arc<ScriptedProvider>>,
    secondary: Option<Arc<ScriptedProvider>>,
) -> Arc<AppState> {
    let primary = primary.map(|p| p as Arc<dyn InterviewProvider>);
    let secondary = secondary.map(|p| p as Arc<dyn InterviewProvider>);
    Arc::new(AppState::new(
        Orchestrator::new(primary, secondary, true),
        Duration::from_millis(10),
    ))
}

/// Serves the real router on an ephemeral port.
pub async fn spawn_server(state: Arc<AppState>) -> SocketAddr {
    let app = router(state, cors_layer(&["*".to_string()]));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub async fn connect(addr: SocketAddr, session_id: &str) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/{session_id}"))
        .await
        .unwrap();
    client
}

/// Next JSON event from the server, skipping control frames.
pub async fn next_event(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for server event")
            .expect("connection closed")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Reads events until the server closes the socket.
pub async fn drain_until_closed(client: &mut Client) -> Vec<Value> {
    let mut events = vec![];
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for close");
        match frame {
            Some(Ok(Message::Text(text))) => events.push(serde_json::from_str(&text).unwrap()),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return events,
            Some(Ok(_)) => {}
        }
    }
}

/// Drives a connection directly over channels, without a socket.
pub struct ChannelClient {
    pub inbound: mpsc::Sender<String>,
    pub outbound: mpsc::Receiver<interview_types::ServerEvent>,
    pub task: tokio::task::JoinHandle<()>,
}

impl ChannelClient {
    pub fn start(state: Arc<AppState>, session_id: &str) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let task = tokio::spawn(interview_api::connection::run(
            state,
            session_id.to_string(),
            inbound_rx,
            outbound_tx,
        ));
        Self {
            inbound: inbound_tx,
            outbound: outbound_rx,
            task,
        }
    }

    /// Next outbound event as JSON.
    pub async fn next(&mut self) -> Value {
        let event = tokio::time::timeout(Duration::from_secs(5), self.outbound.recv())
            .await
            .expect("timed out waiting for event")
            .expect("connection finished");
        serde_json::to_value(event).unwrap()
    }

    pub async fn send(&self, text: &str) {
        self.inbound.send(text.to_string()).await.unwrap();
    }
}

pub fn transcript(session_id: &str, text: &str) -> String {
    serde_json::json!({
        "type": "USER_TRANSCRIPT",
        "sessionId": session_id,
        "transcript": text,
        "timestamp": 1_700_000_000.0,
    })
    .to_string()
}

pub fn assert_state(event: &Value, state: &str) {
    assert_eq!(event["type"], "INTERVIEW_STATE", "unexpected event {event}");
    assert_eq!(event["state"], state, "unexpected event {event}");
}
