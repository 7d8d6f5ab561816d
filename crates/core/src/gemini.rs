//! Secondary provider backed by the Gemini `generateContent` REST API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::conversation::{ChatMessage, ChatRole, Conversation, ConversationBook};
use crate::outcome::evaluate_response;
use crate::prompt::InterviewPrompts;
use crate::provider::{InterviewProvider, ProviderError, ProviderReply};

const PROVIDER_NAME: &str = "gemini";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-pro";

#[derive(Debug)]
pub struct GeminiConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
    pub request_timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Deserialize)]
struct PartResponse {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

pub struct GeminiProvider {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    prompts: InterviewPrompts,
    conversations: ConversationBook,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig, prompts: InterviewPrompts) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build Gemini HTTP client")?;

        info!(model = %config.model, "Gemini provider configured");
        Ok(Self {
            client,
            api_key: config.api_key,
            model: config.model,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            prompts,
            conversations: ConversationBook::default(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn active_conversations(&self) -> usize {
        self.conversations.len()
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let request = build_request(messages);
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|err| ProviderError::Unavailable {
                provider: PROVIDER_NAME,
                reason: format!("Gemini API request failed: {err}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read Gemini error body".to_string());
            return Err(map_http_error(status, &body));
        }

        let parsed: GenerateContentResponse =
            response
                .json()
                .await
                .map_err(|err| ProviderError::CallFailed {
                    provider: PROVIDER_NAME,
                    reason: format!("Failed to parse Gemini response: {err}"),
                })?;

        extract_text(parsed)
    }
}

/// Maps the conversation onto Gemini's shape: system prompts become the
/// system instruction, assistant turns are sent with the `model` role.
fn build_request(messages: &[ChatMessage]) -> GenerateContentRequest<'_> {
    let system_parts: Vec<Part<'_>> = messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| Part { text: &m.content })
        .collect();

    let contents = messages
        .iter()
        .filter_map(|m| {
            let role = match m.role {
                ChatRole::System => return None,
                ChatRole::User => "user",
                ChatRole::Assistant => "model",
            };
            Some(Content {
                role: Some(role),
                parts: vec![Part { text: &m.content }],
            })
        })
        .collect();

    GenerateContentRequest {
        contents,
        system_instruction: (!system_parts.is_empty()).then_some(Content {
            role: None,
            parts: system_parts,
        }),
        generation_config: GenerationConfig { temperature: 0.7 },
    }
}

fn extract_text(response: GenerateContentResponse) -> Result<String, ProviderError> {
    let text: String = response
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        return Err(ProviderError::CallFailed {
            provider: PROVIDER_NAME,
            reason: "Gemini API returned no text in the response candidates".to_string(),
        });
    }
    Ok(text.to_string())
}

fn map_http_error(status: StatusCode, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ErrorWrapper>(body)
        .map(|wrapper| {
            let status_text = wrapper.error.status.unwrap_or_default();
            let msg = wrapper.error.message.unwrap_or_else(|| body.to_string());
            if status_text.is_empty() {
                msg
            } else {
                format!("{status_text}: {msg}")
            }
        })
        .unwrap_or_else(|_| body.to_string());

    ProviderError::CallFailed {
        provider: PROVIDER_NAME,
        reason: format!("HTTP {}: {message}", status.as_u16()),
    }
}

#[async_trait]
impl InterviewProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn initialize_conversation(&self, session_id: &str) -> Result<String, ProviderError> {
        let greeting = self
            .generate(&Conversation::opening_messages(&self.prompts))
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

        let reply = self.generate(&outgoing).await?;

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
