use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Gemini exposes an OpenAI-compatible chat-completions surface
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
const DEFAULT_MODEL: &str = "gemini-2.5-pro";
const DEFAULT_TEMPERATURE: f32 = 0.0;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

const API_KEY_VARS: [&str; 3] = ["LLM_API_KEY", "GEMINI_API_KEY", "OPENAI_API_KEY"];

#[derive(Clone, Debug)]
pub struct ChatClientConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub default_model: String,
    pub default_temperature: f32,
    pub timeout: Duration,
}

impl Default for ChatClientConfig {
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

impl ChatClientConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self {
            api_key: API_KEY_VARS.iter().find_map(|k| std::env::var(k).ok()),
            ..Self::default()
        };
        if let Ok(base) = std::env::var("LLM_BASE_URL") {
            cfg.base_url = base;
        }
        if let Ok(model) = std::env::var("LLM_MODEL_NAME") {
            cfg.default_model = model;
        }
        if let Ok(temp) = std::env::var("LLM_TEMPERATURE") {
            if let Ok(parsed) = temp.parse::<f32>() {
                cfg.default_temperature = parsed;
            }
        }
        if let Ok(timeout) = std::env::var("LLM_TIMEOUT_SECS") {
            if let Ok(parsed) = timeout.parse::<u64>() {
                cfg.timeout = Duration::from_secs(parsed);
            }
        }
        cfg
    }
}

#[derive(Clone)]
pub struct ChatClient {
    http: HttpClient,
    cfg: ChatClientConfig,
}

impl ChatClient {
    pub fn new(cfg: ChatClientConfig) -> Result<Self, LlmError> {
        let http = HttpClient::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(LlmError::from_reqwest)?;
        Ok(Self { http, cfg })
    }

    pub fn model(&self) -> &str { &self.cfg.default_model }

    fn resolve_api_key(&self) -> Result<String, LlmError> {
        self.cfg.api_key.clone().ok_or(LlmError::MissingApiKey)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.cfg.base_url.trim_end_matches('/'))
    }

    fn build_api_request(&self, req: &ChatCompletionRequest) -> ApiChatCompletionRequest {
        ApiChatCompletionRequest {
            model: req.model.clone().unwrap_or_else(|| self.cfg.default_model.clone()),
            temperature: req.temperature.unwrap_or(self.cfg.default_temperature),
            max_tokens: req.max_tokens,
            messages: req
                .messages
                .iter()
                .map(|m| ApiChatMessage { role: m.role.as_api_str().to_string(), content: Some(m.content.clone()) })
                .collect(),
        }
    }
}

/// Structured-prompt capability: messages in, text out.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat_completion(&self, request: ChatCompletionRequest) -> Result<ChatCompletionResponse, LlmError>;
}

#[async_trait]
impl LlmClient for ChatClient {
    async fn chat_completion(&self, request: ChatCompletionRequest) -> Result<ChatCompletionResponse, LlmError> {
        if request.messages.is_empty() {
            return Err(LlmError::EmptyMessages);
        }

        let api_key = self.resolve_api_key()?;
        let api_request = self.build_api_request(&request);

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&api_request)
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(LlmError::from_reqwest)?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ApiErrorEnvelope>(&bytes)
                .map(|env| env.error.message)
                .unwrap_or_else(|_| unknown_error());
            return Err(LlmError::Api { status, message });
        }

        let parsed: ApiChatCompletionResponse = serde_json::from_slice(&bytes).map_err(LlmError::Decode)?;
        response_from_api(parsed)
    }
}

// Blocked replies are recognised by the absence of content, never by its shape.
fn response_from_api(parsed: ApiChatCompletionResponse) -> Result<ChatCompletionResponse, LlmError> {
    let usage = parsed.usage.map(|u| UsageMetrics {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    });
    let Some(choice) = parsed.choices.into_iter().next() else {
        return Err(LlmError::Blocked("no candidates returned".into()));
    };
    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(LlmError::Blocked("finish_reason=content_filter".into()));
    }
    match choice.message.content {
        Some(content) => Ok(ChatCompletionResponse { content, finish_reason: choice.finish_reason, usage }),
        None => Err(LlmError::Blocked(format!(
            "no content returned (finish_reason={})",
            choice.finish_reason.as_deref().unwrap_or("none")
        ))),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatCompletionRequest {
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ChatCompletionRequest {
    /// System instruction plus one user prompt, client defaults elsewhere.
    pub fn prompt(system: &str, user: impl Into<String>) -> Self {
        Self {
            model: None,
            messages: vec![ChatMessage::new(ChatRole::System, system), ChatMessage::new(ChatRole::User, user)],
            max_tokens: None,
            temperature: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    fn as_api_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatCompletionResponse {
    pub content: String,
    pub finish_reason: Option<String>,
    pub usage: Option<UsageMetrics>,
}

impl ChatCompletionResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), finish_reason: Some("stop".into()), usage: None }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UsageMetrics {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("no LLM API key set (LLM_API_KEY, GEMINI_API_KEY or OPENAI_API_KEY)")]
    MissingApiKey,
    #[error("chat completion requires at least one message")]
    EmptyMessages,
    #[error("http error: {0}")]
    Http(#[source] reqwest::Error),
    #[error("request timed out")]
    Timeout,
    #[error("api error {status}: {message}")]
    Api { status: StatusCode, message: String },
    #[error("response blocked: {0}")]
    Blocked(String),
    #[error("mock client response queue is empty")]
    MockQueueEmpty,
    #[error("decode error: {0}")]
    Decode(#[source] serde_json::Error),
}

impl LlmError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() { LlmError::Timeout } else { LlmError::Http(err) }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Timeout | LlmError::Http(_) => true,
            LlmError::Api { status, .. } => status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS,
            LlmError::MissingApiKey
            | LlmError::EmptyMessages
            | LlmError::Blocked(_)
            | LlmError::MockQueueEmpty
            | LlmError::Decode(_) => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ApiErrorBody {
    #[serde(default = "unknown_error")]
    message: String,
}

fn unknown_error() -> String { "unknown error".to_string() }

#[derive(Debug, Clone, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

/// Scripted client for tests: replays queued responses in order.
#[derive(Debug, Default)]
pub struct MockClient {
    responses: Mutex<VecDeque<Result<ChatCompletionResponse, LlmError>>>,
    calls: Mutex<Vec<ChatCompletionRequest>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, resp: Result<ChatCompletionResponse, LlmError>) {
        self.responses.lock().unwrap().push_back(resp);
    }

    pub fn push_text(&self, content: &str) {
        self.push_response(Ok(ChatCompletionResponse::text(content)));
    }

    pub fn calls(&self) -> Vec<ChatCompletionRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for MockClient {
    async fn chat_completion(&self, request: ChatCompletionRequest) -> Result<ChatCompletionResponse, LlmError> {
        self.calls.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
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
    #[serde(default)]
    choices: Vec<ApiChatChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiChatChoice {
    message: ApiChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ChatClient {
        ChatClient::new(ChatClientConfig {
            api_key: Some("test".into()),
            default_model: "gemini-2.5-pro".into(),
            ..ChatClientConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn build_request_serializes_messages() {
        let mut request = ChatCompletionRequest::prompt("You are a geologist.", "Define arenito");
        request.max_tokens = Some(64);
        let api_request = client().build_api_request(&request);
        let value = serde_json::to_value(&api_request).unwrap();

        assert_eq!(value["model"], "gemini-2.5-pro");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "Define arenito");
        assert_eq!(value["temperature"], 0.0);
        assert_eq!(value["max_tokens"], 64);
    }

    fn parse(body: &str) -> Result<ChatCompletionResponse, LlmError> {
        response_from_api(serde_json::from_str(body).unwrap())
    }

    #[test]
    fn content_is_returned_on_normal_stop() {
        let out = parse(r#"{"choices":[{"message":{"role":"assistant","content":"[\"Diagenesis\"]"},"finish_reason":"stop"}]}"#).unwrap();
        assert_eq!(out.content, "[\"Diagenesis\"]");
    }

    #[test]
    fn missing_content_is_blocked() {
        assert!(matches!(parse(r#"{"choices":[]}"#), Err(LlmError::Blocked(_))));
        assert!(matches!(
            parse(r#"{"choices":[{"message":{"role":"assistant","content":null},"finish_reason":"stop"}]}"#),
            Err(LlmError::Blocked(_))
        ));
        assert!(matches!(
            parse(r#"{"choices":[{"message":{"role":"assistant","content":"partial"},"finish_reason":"content_filter"}]}"#),
            Err(LlmError::Blocked(_))
        ));
    }

    #[tokio::test]
    async fn mock_client_returns_enqueued_response() {
        let mock = MockClient::new();
        mock.push_text("hi");

        let req = ChatCompletionRequest::prompt("sys", "Hello");
        let out = mock.chat_completion(req.clone()).await.unwrap();

        assert_eq!(out.content, "hi");
        assert_eq!(mock.calls(), vec![req]);
        assert!(matches!(mock.chat_completion(ChatCompletionRequest::prompt("s", "u")).await, Err(LlmError::MockQueueEmpty)));
    }

    #[test]
    fn api_error_display_includes_status() {
        let err = LlmError::Api { status: StatusCode::BAD_REQUEST, message: "bad request".into() };
        assert_eq!(format!("{err}"), "api error 400 Bad Request: bad request");
        assert!(!err.is_retryable());
        assert!(LlmError::Api { status: StatusCode::SERVICE_UNAVAILABLE, message: String::new() }.is_retryable());
        assert!(!LlmError::Blocked("safety".into()).is_retryable());
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let c = ChatClient::new(ChatClientConfig::default()).unwrap();
        let err = c.chat_completion(ChatCompletionRequest::prompt("s", "u")).await.unwrap_err();
        assert!(matches!(err, LlmError::MissingApiKey));
    }
}
