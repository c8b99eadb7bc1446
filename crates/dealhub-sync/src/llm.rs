//! Minimal OpenAI-compatible chat-completions client.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TEMPERATURE: f32 = 0.0;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub struct OpenAiClientConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub default_model: String,
    pub default_temperature: f32,
    pub timeout: Duration,
}

impl Default for OpenAiClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            default_temperature: DEFAULT_TEMPERATURE,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl OpenAiClientConfig {
    pub fn from_lookup(api_key: Option<String>, get: &dyn Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self {
            api_key,
            ..Self::default()
        };
        if let Some(model) = get("OPENAI_MODEL").filter(|m| !m.trim().is_empty()) {
            cfg.default_model = model;
        }
        if let Some(base) = get("OPENAI_BASE_URL") {
            cfg.base_url = base;
        }
        if let Some(temp) = get("OPENAI_TEMPERATURE").and_then(|t| t.parse::<f32>().ok()) {
            cfg.default_temperature = temp;
        }
        if let Some(secs) = get("OPENAI_TIMEOUT_SECS").and_then(|t| t.parse::<u64>().ok()) {
            cfg.timeout = Duration::from_secs(secs);
        }
        cfg
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,
    #[error("chat completion requires at least one message")]
    EmptyMessages,
    #[error("http error: {0}")]
    Http(#[source] reqwest::Error),
    #[error("request timed out")]
    Timeout,
    #[error("api error {status}: {}", .error.message)]
    Api { status: StatusCode, error: ApiErrorBody },
    #[error("mock client response queue is empty")]
    MockQueueEmpty,
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl LlmError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Http(err)
        }
    }

    /// The configured model does not exist (or is not available to this key).
    pub fn is_model_unavailable(&self) -> bool {
        matches!(self, LlmError::Api { status, .. } if *status == StatusCode::NOT_FOUND)
    }

    /// Failures that will not go away by retrying with the same credentials.
    pub fn is_auth_or_quota(&self) -> bool {
        match self {
            LlmError::MissingApiKey => true,
            LlmError::Api { status, error } => {
                matches!(
                    *status,
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::PAYMENT_REQUIRED
                ) || (*status == StatusCode::TOO_MANY_REQUESTS
                    && error.code.as_deref() == Some("insufficient_quota"))
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub message: String,
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl Default for ApiErrorBody {
    fn default() -> Self {
        Self {
            message: "unknown error".to_string(),
            r#type: None,
            code: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
}

impl ChatRole {
    fn as_api_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatCompletionRequest {
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatCompletionResponse {
    pub content: String,
}

impl ChatCompletionResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, LlmError>;
}

#[derive(Clone)]
pub struct OpenAiClient {
    http: HttpClient,
    cfg: OpenAiClientConfig,
}

impl OpenAiClient {
    pub fn new(cfg: OpenAiClientConfig) -> Result<Self, LlmError> {
        let http = HttpClient::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(LlmError::from_reqwest)?;
        Ok(Self { http, cfg })
    }

    pub fn default_model(&self) -> &str {
        &self.cfg.default_model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.cfg.base_url.trim_end_matches('/'))
    }

    fn build_api_request(&self, req: &ChatCompletionRequest) -> ApiChatCompletionRequest {
        ApiChatCompletionRequest {
            model: req
                .model
                .clone()
                .unwrap_or_else(|| self.cfg.default_model.clone()),
            temperature: req.temperature.unwrap_or(self.cfg.default_temperature),
            max_tokens: req.max_tokens,
            messages: req
                .messages
                .iter()
                .map(|m| ApiChatMessage {
                    role: m.role.as_api_str().to_string(),
                    content: Some(m.content.clone()),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, LlmError> {
        if request.messages.is_empty() {
            return Err(LlmError::EmptyMessages);
        }
        let api_key = self.cfg.api_key.clone().ok_or(LlmError::MissingApiKey)?;

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&self.build_api_request(&request))
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(LlmError::from_reqwest)?;

        if !status.is_success() {
            let error = serde_json::from_slice::<ApiErrorEnvelope>(&bytes)
                .map(|env| env.error)
                .unwrap_or_default();
            return Err(LlmError::Api { status, error });
        }

        let parsed: ApiChatCompletionResponse = serde_json::from_slice(&bytes)?;
        let content = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default();
        Ok(ChatCompletionResponse { content })
    }
}

/// Scripted client: pops one queued result per call and records every request.
#[derive(Debug, Default)]
pub struct MockClient {
    responses: Mutex<VecDeque<Result<ChatCompletionResponse, LlmError>>>,
    calls: Mutex<Vec<ChatCompletionRequest>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_response(&self, resp: Result<ChatCompletionResponse, LlmError>) {
        self.responses.lock().await.push_back(resp);
    }

    pub async fn calls(&self) -> Vec<ChatCompletionRequest> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for MockClient {
    async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, LlmError> {
        self.calls.lock().await.push(request);
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or(Err(LlmError::MockQueueEmpty))
    }
}

#[derive(Debug, Clone, Serialize)]
struct ApiChatCompletionRequest {
    model: String,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    messages: Vec<ApiChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiChatMessage {
    role: String,
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiChatCompletionResponse {
    choices: Vec<ApiChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiChatChoice {
    message: ApiChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OpenAiClient {
        OpenAiClient::new(OpenAiClientConfig {
            api_key: Some("test".into()),
            ..OpenAiClientConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn api_request_uses_default_model_unless_overridden() {
        let client = client();
        let mut request = ChatCompletionRequest {
            model: None,
            messages: vec![
                ChatMessage::new(ChatRole::System, "Return JSON."),
                ChatMessage::new(ChatRole::User, "Flat 40% off"),
            ],
            max_tokens: Some(400),
            temperature: None,
        };
        let value = serde_json::to_value(client.build_api_request(&request)).unwrap();
        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "Flat 40% off");
        assert_eq!(value["max_tokens"], 400);

        request.model = Some("gpt-4o".into());
        let value = serde_json::to_value(client.build_api_request(&request)).unwrap();
        assert_eq!(value["model"], "gpt-4o");
    }

    #[test]
    fn error_classification() {
        let gone = LlmError::Api {
            status: StatusCode::NOT_FOUND,
            error: ApiErrorBody::default(),
        };
        assert!(gone.is_model_unavailable());
        assert!(!gone.is_auth_or_quota());

        let quota = LlmError::Api {
            status: StatusCode::TOO_MANY_REQUESTS,
            error: ApiErrorBody {
                message: "You exceeded your current quota".into(),
                r#type: Some("insufficient_quota".into()),
                code: Some("insufficient_quota".into()),
            },
        };
        assert!(quota.is_auth_or_quota());

        let throttled = LlmError::Api {
            status: StatusCode::TOO_MANY_REQUESTS,
            error: ApiErrorBody::default(),
        };
        assert!(!throttled.is_auth_or_quota());
        assert!(LlmError::MissingApiKey.is_auth_or_quota());
        assert_eq!(
            format!("{gone}"),
            "api error 404 Not Found: unknown error"
        );
    }

    #[tokio::test]
    async fn mock_client_replays_queue_then_reports_empty() {
        let mock = MockClient::new();
        mock.push_response(Ok(ChatCompletionResponse::text("{}"))).await;
        let req = ChatCompletionRequest {
            model: None,
            messages: vec![ChatMessage::new(ChatRole::User, "hi")],
            max_tokens: None,
            temperature: None,
        };
        assert_eq!(mock.chat_completion(req.clone()).await.unwrap().content, "{}");
        assert!(matches!(
            mock.chat_completion(req).await,
            Err(LlmError::MockQueueEmpty)
        ));
        assert_eq!(mock.calls().await.len(), 2);
    }
}
