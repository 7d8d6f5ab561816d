//! Primary provider backed by a local LM Studio server.
//!
//! LM Studio speaks the OpenAI chat-completions dialect, so each turn sends the
//! session's whole conversation to `/v1/chat/completions`.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::conversation::{ChatMessage, ChatRole, Conversation, ConversationBook};
use crate::outcome::evaluate_response;
use crate::prompt::InterviewPrompts;
use crate::provider::{InterviewProvider, ProviderError, ProviderReply};

const PROVIDER_NAME: &str = "lm_studio";
const FALLBACK_MODEL: &str = "local-model";
const PREFERRED_MODEL: &str = "llama-3-8b-instruct";
const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Clone)]
pub struct LmStudioConfig {
    pub base_url: String,
    /// Explicit model id. Detected from `/v1/models` when unset.
    pub model: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub probe_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// How long a server that refused connections is skipped before being tried again.
    pub recheck_after: Duration,
}

impl LmStudioConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
            recheck_after: Duration::from_secs(30),
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    pub fn with_recheck_after(mut self, recheck_after: Duration) -> Self {
        self.recheck_after = recheck_after;
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: i32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        let role = match message.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        Self {
            role,
            content: &message.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    #[serde(default)]
    id: String,
}

/// Why a single chat attempt failed.
#[derive(Debug)]
enum ChatFailure {
    Transport(String),
    Status(u16, String),
    Invalid(String),
}

impl ChatFailure {
    fn is_retryable(&self) -> bool {
        match self {
            ChatFailure::Transport(_) => true,
            ChatFailure::Status(code, _) => RETRYABLE_STATUSES.contains(code),
            ChatFailure::Invalid(_) => false,
        }
    }

    fn into_error(self) -> ProviderError {
        match self {
            ChatFailure::Transport(reason) => ProviderError::Unavailable {
                provider: PROVIDER_NAME,
                reason,
            },
            ChatFailure::Status(code, body) => ProviderError::CallFailed {
                provider: PROVIDER_NAME,
                reason: format!("HTTP {code}: {body}"),
            },
            ChatFailure::Invalid(reason) => ProviderError::CallFailed {
                provider: PROVIDER_NAME,
                reason: format!("Invalid response format from LM Studio: {reason}"),
            },
        }
    }
}

/// Tracks when the server last refused a connection. Zero means reachable.
#[derive(Debug, Default)]
struct Reachability {
    down_since_ms: AtomicI64,
}

impl Reachability {
    fn mark_up(&self) {
        self.down_since_ms.store(0, Ordering::Relaxed);
    }

    fn mark_down(&self) {
        self.down_since_ms
            .store(Utc::now().timestamp_millis().max(1), Ordering::Relaxed);
    }

    fn is_up(&self, recheck_after: Duration) -> bool {
        let since = self.down_since_ms.load(Ordering::Relaxed);
        since == 0 || Utc::now().timestamp_millis() - since >= recheck_after.as_millis() as i64
    }
}

pub struct LmStudioProvider {
    client: Client,
    base_url: String,
    model: String,
    probe_timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
    recheck_after: Duration,
    prompts: InterviewPrompts,
    conversations: ConversationBook,
    reachability: Reachability,
}

impl LmStudioProvider {
    /// Builds the provider without touching the network.
    ///
    /// Without an explicit model the placeholder `local-model` is used; see
    /// [`LmStudioProvider::connect`] for detection.
    pub fn new(config: LmStudioConfig, prompts: InterviewPrompts) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            bail!("Invalid LM Studio base URL: {base_url}. Must start with http:// or https://");
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build LM Studio HTTP client")?;

        Ok(Self {
            client,
            base_url,
            model: config.model.unwrap_or_else(|| FALLBACK_MODEL.to_string()),
            probe_timeout: config.probe_timeout,
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff,
            recheck_after: config.recheck_after,
            prompts,
            conversations: ConversationBook::default(),
            reachability: Reachability::default(),
        })
    }

    /// Builds the provider, detects a model if none was configured, and probes
    /// the server.
    ///
    /// Neither detection nor the probe is fatal: the provider is returned
    /// either way and an unreachable server is skipped until it answers again.
    pub async fn connect(config: LmStudioConfig, prompts: InterviewPrompts) -> Result<Self> {
        let explicit_model = config.model.is_some();
        let mut provider = Self::new(config, prompts)?;

        if !explicit_model {
            match provider.detect_model().await {
                Ok(model) => {
                    info!(model = %model, "auto-detected LM Studio model");
                    provider.model = model;
                }
                Err(e) => warn!(error = %e, "failed to auto-detect LM Studio model, using {FALLBACK_MODEL}"),
            }
        }

        match provider.probe().await {
            Ok(()) => info!(base_url = %provider.base_url, model = %provider.model, "LM Studio provider ready"),
            Err(e) => {
                warn!(base_url = %provider.base_url, error = %e, "LM Studio connection test failed; make sure LM Studio is running")
            }
        }

        Ok(provider)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Number of sessions with a live conversation.
    pub fn active_conversations(&self) -> usize {
        self.conversations.len()
    }

    /// Checks that the server answers `/v1/models`.
    pub async fn probe(&self) -> Result<(), ProviderError> {
        let result = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .timeout(self.probe_timeout)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                self.reachability.mark_up();
                Ok(())
            }
            Ok(response) => Err(ProviderError::CallFailed {
                provider: PROVIDER_NAME,
                reason: format!("HTTP {} from models endpoint", response.status().as_u16()),
            }),
            Err(e) => {
                self.reachability.mark_down();
                Err(ProviderError::Unavailable {
                    provider: PROVIDER_NAME,
                    reason: format!("Cannot connect to LM Studio at {}: {e}", self.base_url),
                })
            }
        }
    }

    async fn detect_model(&self) -> Result<String> {
        let models = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .timeout(self.probe_timeout)
            .send()
            .await
            .context("Failed to query models endpoint")?
            .error_for_status()
            .context("Models endpoint returned an error")?
            .json::<ModelList>()
            .await
            .context("Failed to parse models list")?;

        let ids: Vec<String> = models.data.into_iter().map(|m| m.id).collect();
        debug!(models = ?ids, "available LM Studio models");
        select_model(&ids).context("No models found in LM Studio")
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            temperature: 0.7,
            max_tokens: -1,
            stream: false,
        };
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut attempt = 0;
        loop {
            match self.send_chat(&url, &request).await {
                Ok(text) => {
                    self.reachability.mark_up();
                    return Ok(text);
                }
                Err(failure) if failure.is_retryable() && attempt < self.max_retries => {
                    let delay = self.retry_backoff * 2u32.pow(attempt);
                    attempt += 1;
                    warn!(attempt, delay_ms = delay.as_millis() as u64, failure = ?failure, "retrying LM Studio request");
                    tokio::time::sleep(delay).await;
                }
                Err(failure) => {
                    if matches!(failure, ChatFailure::Transport(_)) {
                        self.reachability.mark_down();
                    }
                    return Err(failure.into_error());
                }
            }
        }
    }

    async fn send_chat(&self, url: &str, request: &ChatRequest<'_>) -> Result<String, ChatFailure> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| ChatFailure::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatFailure::Status(status.as_u16(), body));
        }

        let parsed = response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ChatFailure::Invalid(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| ChatFailure::Invalid("empty completion".to_string()))
    }
}

/// Picks the model best suited to interviewing from LM Studio's list.
///
/// Prefers `llama-3-8b-instruct`, then any instruction-tuned model, then the
/// first one listed.
pub fn select_model(ids: &[String]) -> Option<String> {
    ids.iter()
        .find(|id| id.to_lowercase().contains(PREFERRED_MODEL))
        .or_else(|| ids.iter().find(|id| id.to_lowercase().contains("instruct")))
        .or_else(|| ids.iter().find(|id| !id.is_empty()))
        .cloned()
}

#[async_trait]
impl InterviewProvider for LmStudioProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn is_available(&self) -> bool {
        self.reachability.is_up(self.recheck_after)
    }

    async fn initialize_conversation(&self, session_id: &str) -> Result<String, ProviderError> {
        let greeting = self
            .chat(&Conversation::opening_messages(&self.prompts))
            .await?;

        self.conversations
            .insert(session_id, Conversation::open(&self.prompts, &greeting));
        info!(session_id = %session_id, provider = PROVIDER_NAME, "conversation initialized");
        Ok(greeting)
    }

    async fn process_answer(
        &self,
        session_id: &str,
        answer: &str,
    ) -> Result<ProviderReply, ProviderError> {
        let conversation = self.conversations.snapshot(session_id)?;
        let outgoing = conversation.with_answer(answer);
        let turn_count = outgoing.len();

        let reply = self.chat(&outgoing).await?;

        if !self.conversations.commit(session_id, answer, &reply) {
            debug!(session_id = %session_id, provider = PROVIDER_NAME, "conversation cleaned up during call");
        }
        Ok(evaluate_response(&reply, turn_count))
    }

    async fn cleanup(&self, session_id: &str) {
        if self.conversations.remove(session_id) {
            info!(session_id = %session_id, provider = PROVIDER_NAME, "conversation cleaned up");
        }
    }
}
