//! LLM provider abstraction layer.
//!
//! A single async trait fronts the primary provider (Anthropic Messages API)
//! and the secondary high-context provider (Gemini `generateContent`), plus a
//! scripted mock used by the agent pipeline tests.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use af_core::types::TokenUsage;
use af_harness::tools::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when talking to a model provider.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// Connection failure, DNS, TLS, etc.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The API returned a non-success status.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The response body did not have the expected shape.
    #[error("parse error: {0}")]
    ParseError(String),

    /// HTTP 429.
    #[error("rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("request timed out")]
    Timeout,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::HttpError(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Core data types
// ---------------------------------------------------------------------------

/// Role of a message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for LlmRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmRole::System => write!(f, "system"),
            LlmRole::User => write!(f, "user"),
            LlmRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn new(role: LlmRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(LlmRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(LlmRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(LlmRole::Assistant, content)
    }
}

/// Per-request settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system_prompt: Option<String>,
    /// Mark the system prompt as an ephemeral cache breakpoint.
    pub cache_system_prompt: bool,
    /// Extended-thinking token budget. `None` disables thinking.
    pub thinking_budget: Option<u32>,
    pub tools: Vec<ToolDefinition>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20250929".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            system_prompt: None,
            cache_system_prompt: false,
            thinking_budget: None,
            tools: Vec::new(),
        }
    }
}

/// Response from a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
    pub finish_reason: String,
}

// ---------------------------------------------------------------------------
// LlmProvider trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a completion request and return the full response.
    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError>;

    /// Short provider name for logs.
    fn name(&self) -> &str;
}

fn retry_after_secs(resp: &reqwest::Response) -> Option<u64> {
    resp.headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

// ---------------------------------------------------------------------------
// AnthropicProvider
// ---------------------------------------------------------------------------

/// Primary provider, the Anthropic Messages API.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: build_client(Duration::from_secs(300)),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    /// Build the JSON request body for the Messages API.
    ///
    /// System messages are folded into the top-level `system` field. With
    /// caching enabled the system prompt is sent as a text block carrying
    /// `cache_control: ephemeral`. Temperature is omitted when thinking is
    /// on because the API rejects the combination.
    pub fn build_request_body(messages: &[LlmMessage], config: &LlmConfig) -> Value {
        let mut system_text: Option<String> = config.system_prompt.clone();

        let api_messages: Vec<Value> = messages
            .iter()
            .filter_map(|msg| {
                if msg.role == LlmRole::System {
                    match system_text {
                        Some(ref mut s) => {
                            s.push('\n');
                            s.push_str(&msg.content);
                        }
                        None => system_text = Some(msg.content.clone()),
                    }
                    None
                } else {
                    Some(json!({
                        "role": msg.role.to_string(),
                        "content": msg.content,
                    }))
                }
            })
            .collect();

        let mut body = json!({
            "model": config.model,
            "max_tokens": config.max_tokens,
            "messages": api_messages,
        });

        if let Some(system) = system_text {
            body["system"] = if config.cache_system_prompt {
                json!([{
                    "type": "text",
                    "text": system,
                    "cache_control": { "type": "ephemeral" },
                }])
            } else {
                Value::String(system)
            };
        }

        match config.thinking_budget {
            Some(budget) if budget > 0 => {
                body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
            }
            _ => {
                body["temperature"] = json!(config.temperature);
            }
        }

        if !config.tools.is_empty() {
            body["tools"] = Value::Array(
                config
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.input_schema,
                        })
                    })
                    .collect(),
            );
        }

        body
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        let body = Self::build_request_body(messages, config);
        let url = format!("{}/v1/messages", self.base_url);

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            return Err(LlmError::RateLimited {
                retry_after_secs: retry_after_secs(&resp),
            });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::ApiError {
                status,
                message: text,
            });
        }

        let api_resp: AnthropicResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        let content = api_resp
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        Ok(LlmResponse {
            content,
            model: api_resp.model,
            usage: TokenUsage {
                input: api_resp.usage.input_tokens,
                output: api_resp.usage.output_tokens,
                cache_read: api_resp.usage.cache_read_input_tokens.unwrap_or(0),
                thinking: 0,
            },
            finish_reason: api_resp.stop_reason.unwrap_or_else(|| "unknown".into()),
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

// ---------------------------------------------------------------------------
// GeminiProvider
// ---------------------------------------------------------------------------

/// Secondary provider, Google Gemini `generateContent`.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: build_client(Duration::from_secs(300)),
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    pub fn build_request_body(messages: &[LlmMessage], config: &LlmConfig) -> Value {
        let mut system_text = config.system_prompt.clone().unwrap_or_default();
        let mut contents = Vec::new();
        for msg in messages {
            let role = match msg.role {
                LlmRole::System => {
                    if !system_text.is_empty() {
                        system_text.push('\n');
                    }
                    system_text.push_str(&msg.content);
                    continue;
                }
                LlmRole::User => "user",
                LlmRole::Assistant => "model",
            };
            contents.push(json!({ "role": role, "parts": [{ "text": msg.content }] }));
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": config.max_tokens,
                "temperature": config.temperature,
            },
        });
        if !system_text.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system_text }] });
        }
        body
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        let body = Self::build_request_body(messages, config);
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, config.model
        );

        let resp = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            return Err(LlmError::RateLimited {
                retry_after_secs: retry_after_secs(&resp),
            });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::ApiError {
                status,
                message: text,
            });
        }

        let api_resp: GeminiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        let candidate = api_resp
            .candidates
            .first()
            .ok_or_else(|| LlmError::ParseError("no candidates in response".into()))?;
        let content = candidate
            .content
            .as_ref()
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let usage = api_resp
            .usage_metadata
            .map(|u| TokenUsage::new(u.prompt_token_count, u.candidates_token_count))
            .unwrap_or_default();

        Ok(LlmResponse {
            content,
            model: api_resp.model_version.unwrap_or_else(|| config.model.clone()),
            usage,
            finish_reason: candidate
                .finish_reason
                .clone()
                .unwrap_or_else(|| "unknown".into()),
        })
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ---------------------------------------------------------------------------
// MockProvider
// ---------------------------------------------------------------------------

/// A canned reply for [`MockProvider`] routes.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String, TokenUsage),
    Fail(u16, String),
}

impl MockReply {
    pub fn text(content: impl Into<String>) -> Self {
        MockReply::Text(content.into(), TokenUsage::new(100, 50))
    }

    fn into_result(self, model: &str) -> Result<LlmResponse, LlmError> {
        match self {
            MockReply::Text(content, usage) => Ok(LlmResponse {
                content,
                model: model.to_string(),
                usage,
                finish_reason: "end_turn".to_string(),
            }),
            MockReply::Fail(status, message) => Err(LlmError::ApiError { status, message }),
        }
    }
}

type CapturedRequest = (Vec<LlmMessage>, LlmConfig);

/// Scripted provider for tests.
///
/// Lookup order for each call:
/// 1. the first route whose needle occurs in the system prompt (answered
///    every time it matches)
/// 2. the FIFO queue of one-shot responses
/// 3. a default text response
#[derive(Clone, Default)]
pub struct MockProvider {
    routes: Arc<Mutex<Vec<(String, MockReply)>>>,
    responses: Arc<Mutex<VecDeque<Result<LlmResponse, LlmError>>>>,
    captured_requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request whose system prompt contains `needle`.
    pub fn with_route(self, needle: impl Into<String>, reply: MockReply) -> Self {
        lock(&self.routes).push((needle.into(), reply));
        self
    }

    /// Queue a one-shot successful response.
    pub fn with_response(self, response: LlmResponse) -> Self {
        lock(&self.responses).push_back(Ok(response));
        self
    }

    /// Queue a one-shot error.
    pub fn with_error(self, error: LlmError) -> Self {
        lock(&self.responses).push_back(Err(error));
        self
    }

    pub fn captured_requests(&self) -> Vec<CapturedRequest> {
        lock(&self.captured_requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.captured_requests).len()
    }

    fn default_response(model: &str) -> LlmResponse {
        LlmResponse {
            content: "Mock response".to_string(),
            model: model.to_string(),
            usage: TokenUsage::new(10, 5),
            finish_reason: "end_turn".to_string(),
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        lock(&self.captured_requests).push((messages.to_vec(), config.clone()));

        let system = config.system_prompt.as_deref().unwrap_or_default();
        let routed = lock(&self.routes)
            .iter()
            .find(|(needle, _)| system.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone());
        if let Some(reply) = routed {
            return reply.into_result(&config.model);
        }

        match lock(&self.responses).pop_front() {
            Some(queued) => queued,
            None => Ok(Self::default_response(&config.model)),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
