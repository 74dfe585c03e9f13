use crate::classifier::keys::ApiKey;
use crate::http::build_client;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";
const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoint: String,
    pub model: String,
}

impl TransportConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: std::env::var("CLASSIFIER_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ENDPOINT.into()),
            model: std::env::var("CLASSIFIER_MODEL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(String),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Prompt pair for one classification call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_content: String,
}

impl CompletionRequest {
    fn messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: "system".into(),
                content: self.system_prompt.clone(),
            },
            ChatMessage {
                role: "user".into(),
                content: self.user_content.clone(),
            },
        ]
    }
}

/// Status and raw body of a completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_rate_limited(&self) -> bool {
        self.status == StatusCode::TOO_MANY_REQUESTS.as_u16()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One request against the classification service with a given credential.
/// Non-success statuses are returned as responses; only failures to complete
/// the exchange are errors.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(
        &self,
        key: &ApiKey,
        request: &CompletionRequest,
    ) -> Result<TransportResponse, TransportError>;
}

pub struct HttpChatTransport {
    http: Client,
    config: TransportConfig,
}

impl HttpChatTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn send(
        &self,
        key: &ApiKey,
        request: &CompletionRequest,
    ) -> Result<TransportResponse, TransportError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: request.messages(),
            temperature: 0.0,
            response_format: ResponseFormat {
                r#type: "json_object",
            },
        };

        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|err| TransportError::Http(err.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| TransportError::Http(err.to_string()))?;
        Ok(TransportResponse { status, body })
    }
}

/// Pulls the assistant text out of an OpenAI-style completion envelope.
pub fn completion_text(body: &str) -> Option<String> {
    let envelope: ChatResponse = serde_json::from_str(body).ok()?;
    envelope
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|text| !text.trim().is_empty())
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}
