//! # LLM Provider Interface
//!
//! A trait-based abstraction over the chat-completion backends modsmith can
//! talk to.
//!
//! ## Design
//! - `LlmProvider` defines the core interface
//! - `OpenAIProvider` covers OpenAI and every OpenAI-compatible local server
//!   (Ollama, llama.cpp, vLLM); `AnthropicProvider` covers Claude
//! - `AnyProvider` picks one of them at runtime from configuration
//! - Streaming via `StreamReceiver`, fed by server-sent events

pub mod anthropic;
pub mod openai;
mod sse;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAIProvider;

use crate::config::ProviderSettings;
use crate::error::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

// ============================================================================
// Core Types
// ============================================================================

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Request parameters for a completion
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<usize>,
    pub stop: Option<Vec<String>>,
    pub stream: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Rough prompt size: ~4 characters per token
    pub fn estimated_prompt_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum::<usize>() / 4
    }
}

/// Response from a completion request
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub id: String,
    pub model: String,
    pub content: Option<String>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown,
}

impl FinishReason {
    /// Parse the OpenAI / Anthropic finish reason vocabulary
    pub fn parse(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" | "stop_sequence" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Unknown,
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// A streaming chunk from the model
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// Text content delta
    Text(String),
    /// Stream finished
    Done {
        finish_reason: FinishReason,
        usage: Option<Usage>,
    },
    /// Error occurred mid-stream
    Error(String),
}

impl StreamChunk {
    /// Nothing follows a `Done` or an `Error`
    pub fn is_final(&self) -> bool {
        matches!(self, StreamChunk::Done { .. } | StreamChunk::Error(_))
    }
}

// ============================================================================
// Provider errors
// ============================================================================

/// Error type for provider operations
#[derive(Debug)]
pub enum ProviderError {
    /// Network/connection error
    Network(String),
    /// API returned an error
    Api { status: u16, message: String },
    /// Failed to parse response
    Parse(String),
    /// Rate limited
    RateLimited { retry_after: Option<u64> },
    /// Invalid request
    InvalidRequest(String),
    /// Model not found
    ModelNotFound(String),
    /// Authentication failed
    AuthenticationFailed,
    /// Other error
    Other(String),
}

impl ProviderError {
    /// Classify an unsuccessful HTTP response
    pub(crate) fn from_status(status: u16, body: String, retry_after: Option<u64>) -> Self {
        match status {
            401 | 403 => ProviderError::AuthenticationFailed,
            404 => ProviderError::ModelNotFound(body),
            429 => ProviderError::RateLimited { retry_after },
            400 | 422 => ProviderError::InvalidRequest(body),
            _ => ProviderError::Api { status, message: body },
        }
    }

    /// Convert into the workspace error, tagging the failing operation
    pub fn into_error(self, operation: &'static str) -> Error {
        let kind = match &self {
            ProviderError::Network(_) => ErrorKind::NetworkFailed,
            ProviderError::RateLimited { .. } => ErrorKind::RateLimited,
            ProviderError::AuthenticationFailed => ErrorKind::AuthenticationFailed,
            ProviderError::Api { status, .. } if *status >= 500 => ErrorKind::ProviderUnavailable,
            ProviderError::ModelNotFound(_) => ErrorKind::ConfigInvalid,
            ProviderError::InvalidRequest(_) => ErrorKind::InvalidArgument,
            ProviderError::Api { .. } | ProviderError::Parse(_) | ProviderError::Other(_) => {
                ErrorKind::InferenceFailed
            }
        };

        let mut err = Error::new(kind, self.to_string()).with_operation(operation);
        match self {
            ProviderError::Api { status, .. } => {
                err = err.with_context("status", status.to_string());
                // Server-side failures are worth another attempt
                if status >= 500 {
                    err = err.temporary();
                }
            }
            ProviderError::RateLimited { retry_after: Some(secs) } => {
                err = err.with_context("retry_after", secs.to_string());
            }
            _ => {}
        }
        err
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(e) => write!(f, "Network error: {}", e),
            Self::Api { status, message } => write!(f, "API error ({}): {}", status, message),
            Self::Parse(e) => write!(f, "Parse error: {}", e),
            Self::RateLimited { retry_after } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after {
                    write!(f, " (retry after {}s)", secs)?;
                }
                Ok(())
            }
            Self::InvalidRequest(e) => write!(f, "Invalid request: {}", e),
            Self::ModelNotFound(m) => write!(f, "Model not found: {}", m),
            Self::AuthenticationFailed => write!(f, "Authentication failed"),
            Self::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ProviderError {}

// ============================================================================
// Provider Trait
// ============================================================================

/// The main LLM provider trait
#[allow(async_fn_in_trait)]
pub trait LlmProvider {
    /// Provider name (e.g. "openai", "anthropic")
    fn name(&self) -> &str;

    /// Model used when the request does not name one
    fn default_model(&self) -> &str;

    /// Send a completion request and get a full response
    async fn complete(&self, request: CompletionRequest) -> std::result::Result<CompletionResponse, ProviderError>;

    /// Send a completion request and stream the response
    async fn stream(&self, request: CompletionRequest) -> std::result::Result<StreamReceiver, ProviderError>;

    /// Simple prompt -> response helper
    async fn prompt(&self, prompt: &str) -> std::result::Result<String, ProviderError> {
        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)]);
        let response = self.complete(request).await?;
        response.content.ok_or_else(|| ProviderError::Other("No content in response".into()))
    }
}

/// Receiver for streaming responses
pub struct StreamReceiver {
    inner: Pin<Box<dyn futures_core::Stream<Item = StreamChunk> + Send>>,
}

impl StreamReceiver {
    pub fn new<S>(stream: S) -> Self
    where
        S: futures_core::Stream<Item = StreamChunk> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Wrap an already-complete text as a two-chunk stream
    pub fn from_text(text: impl Into<String>) -> Self {
        let chunks = vec![
            StreamChunk::Text(text.into()),
            StreamChunk::Done { finish_reason: FinishReason::Stop, usage: None },
        ];
        Self::new(futures_util::stream::iter(chunks))
    }

    /// Next chunk, or None once the stream is exhausted
    pub async fn next(&mut self) -> Option<StreamChunk> {
        use futures_util::StreamExt;
        self.inner.next().await
    }

    /// Drain the stream, handing each text delta to `on_text`, and return the
    /// full text. Stops at the first `Done`.
    pub async fn for_each_text<F>(mut self, mut on_text: F) -> std::result::Result<String, ProviderError>
    where
        F: FnMut(&str),
    {
        let mut text = String::new();
        while let Some(chunk) = self.next().await {
            match chunk {
                StreamChunk::Text(t) => {
                    on_text(&t);
                    text.push_str(&t);
                }
                StreamChunk::Done { .. } => break,
                StreamChunk::Error(e) => return Err(ProviderError::Network(e)),
            }
        }
        Ok(text)
    }

    /// Collect all text chunks into a single string
    pub async fn collect_text(self) -> std::result::Result<String, ProviderError> {
        self.for_each_text(|_| {}).await
    }
}

// ============================================================================
// Provider Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// No model backend; the engine uses templates
    #[default]
    #[serde(alias = "template")]
    None,
    OpenAI,
    #[serde(alias = "claude")]
    Anthropic,
    /// OpenAI-compatible server on this machine (Ollama, llama.cpp, vLLM)
    #[serde(alias = "ollama")]
    Local,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::None => "none",
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Local => "local",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "template" => Ok(ProviderKind::None),
            "openai" => Ok(ProviderKind::OpenAI),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "local" | "ollama" => Ok(ProviderKind::Local),
            other => Err(Error::config_invalid(format!("unknown provider kind '{}'", other))
                .with_context("provider", other.to_string())),
        }
    }
}

/// Configuration for creating providers
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub headers: HashMap<String, String>,
    pub timeout_secs: Option<u64>,
}

pub const DEFAULT_LOCAL_URL: &str = "http://localhost:11434/v1";
pub const DEFAULT_LOCAL_MODEL: &str = "codellama:7b";

impl ProviderConfig {
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            kind: ProviderKind::OpenAI,
            api_key: Some(api_key.into()),
            base_url: Some("https://api.openai.com/v1".into()),
            default_model: Some("gpt-4o".into()),
            headers: HashMap::new(),
            timeout_secs: Some(120),
        }
    }

    pub fn anthropic(api_key: impl Into<String>) -> Self {
        let mut headers = HashMap::new();
        headers.insert("anthropic-version".into(), "2023-06-01".into());

        Self {
            kind: ProviderKind::Anthropic,
            api_key: Some(api_key.into()),
            base_url: Some("https://api.anthropic.com/v1".into()),
            default_model: Some("claude-sonnet-4-20250514".into()),
            headers,
            timeout_secs: Some(120),
        }
    }

    /// A local OpenAI-compatible server. Local models are slow, so the
    /// timeout is generous.
    pub fn local(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            kind: ProviderKind::Local,
            api_key: None,
            base_url: Some(base_url.into()),
            default_model: Some(model.into()),
            headers: HashMap::new(),
            timeout_secs: Some(300),
        }
    }

    /// Build from the `performance.provider` configuration block.
    ///
    /// Empty strings in the settings mean "use the provider default".
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        let non_empty = |s: &Option<String>| s.as_ref().filter(|v| !v.trim().is_empty()).cloned();

        let mut config = match settings.kind {
            ProviderKind::OpenAI => Self::openai(non_empty(&settings.api_key).unwrap_or_default()),
            ProviderKind::Anthropic => {
                Self::anthropic(non_empty(&settings.api_key).unwrap_or_default())
            }
            ProviderKind::Local | ProviderKind::None => {
                let mut local = Self::local(DEFAULT_LOCAL_URL, DEFAULT_LOCAL_MODEL);
                local.kind = settings.kind;
                local.api_key = non_empty(&settings.api_key);
                local
            }
        };

        if let Some(url) = non_empty(&settings.base_url) {
            config.base_url = Some(url.trim_end_matches('/').to_string());
        }
        if let Some(model) = non_empty(&settings.model) {
            config.default_model = Some(model);
        }
        if settings.timeout_secs > 0 {
            config.timeout_secs = Some(settings.timeout_secs);
        }
        config
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    fn has_api_key(&self) -> bool {
        self.api_key.as_ref().is_some_and(|k| !k.trim().is_empty())
    }
}

/// Build the shared HTTP client for a provider
pub(crate) fn build_client(config: &ProviderConfig, default_timeout: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.timeout_secs.unwrap_or(default_timeout)))
        .build()
        .map_err(|e| {
            Error::unexpected("failed to create HTTP client")
                .with_operation("provider::build_client")
                .set_source(e)
        })
}

/// Read `Retry-After` as whole seconds, if present
pub(crate) fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

// ============================================================================
// Runtime-selected provider
// ============================================================================

/// One of the concrete providers, chosen from configuration
pub enum AnyProvider {
    OpenAI(OpenAIProvider),
    Anthropic(AnthropicProvider),
}

impl AnyProvider {
    /// Build the configured provider. `ProviderKind::None` yields `Ok(None)`.
    pub fn from_config(config: &ProviderConfig) -> Result<Option<Self>> {
        match config.kind {
            ProviderKind::None => Ok(None),
            ProviderKind::OpenAI | ProviderKind::Anthropic if !config.has_api_key() => {
                Err(Error::config_invalid(format!(
                    "provider '{}' requires an api key (set MODSMITH_API_KEY)",
                    config.kind.as_str()
                ))
                .with_operation("provider::from_config")
                .with_context("provider", config.kind.as_str()))
            }
            ProviderKind::OpenAI | ProviderKind::Local => {
                Ok(Some(AnyProvider::OpenAI(OpenAIProvider::new(config.clone())?)))
            }
            ProviderKind::Anthropic => {
                Ok(Some(AnyProvider::Anthropic(AnthropicProvider::new(config.clone())?)))
            }
        }
    }
}

impl LlmProvider for AnyProvider {
    fn name(&self) -> &str {
        match self {
            AnyProvider::OpenAI(p) => p.name(),
            AnyProvider::Anthropic(p) => p.name(),
        }
    }

    fn default_model(&self) -> &str {
        match self {
            AnyProvider::OpenAI(p) => p.default_model(),
            AnyProvider::Anthropic(p) => p.default_model(),
        }
    }

    async fn complete(&self, request: CompletionRequest) -> std::result::Result<CompletionResponse, ProviderError> {
        match self {
            AnyProvider::OpenAI(p) => p.complete(request).await,
            AnyProvider::Anthropic(p) => p.complete(request).await,
        }
    }

    async fn stream(&self, request: CompletionRequest) -> std::result::Result<StreamReceiver, ProviderError> {
        match self {
            AnyProvider::OpenAI(p) => p.stream(request).await,
            AnyProvider::Anthropic(p) => p.stream(request).await,
        }
    }
}

// ============================================================================
// Usage Tracking
// ============================================================================

/// Tracks token usage across multiple calls
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageTracker {
    pub total_calls: usize,
    pub total_prompt_tokens: usize,
    pub total_completion_tokens: usize,
    pub by_model: HashMap<String, Usage>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, model: &str, usage: &Usage) {
        self.total_calls += 1;
        self.total_prompt_tokens += usage.prompt_tokens;
        self.total_completion_tokens += usage.completion_tokens;

        let entry = self.by_model.entry(model.to_string()).or_default();
        entry.prompt_tokens += usage.prompt_tokens;
        entry.completion_tokens += usage.completion_tokens;
        entry.total_tokens += usage.total_tokens;
    }

    pub fn total_tokens(&self) -> usize {
        self.total_prompt_tokens + self.total_completion_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_request_builder() {
        let request = CompletionRequest::new(vec![
            ChatMessage::system("You write Fabric mods"),
            ChatMessage::user("create a ruby block"),
        ])
        .with_model("codellama:7b")
        .with_temperature(0.7)
        .with_top_p(0.9)
        .with_max_tokens(256);

        assert_eq!(request.model.as_deref(), Some("codellama:7b"));
        assert_eq!(request.top_p, Some(0.9));
        assert_eq!(request.max_tokens, Some(256));
        assert!(!request.stream);
        assert_eq!(request.messages[0].role, Role::System);
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAI);
        assert_eq!("ollama".parse::<ProviderKind>().unwrap(), ProviderKind::Local);
        assert_eq!("".parse::<ProviderKind>().unwrap(), ProviderKind::None);

        let err = "gemini".parse::<ProviderKind>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_from_settings_applies_overrides() {
        let settings = ProviderSettings {
            kind: ProviderKind::Local,
            base_url: Some("http://127.0.0.1:8080/v1/".into()),
            model: Some("deepseek-coder".into()),
            api_key: Some("  ".into()),
            timeout_secs: 45,
            max_retries: 1,
        };
        let config = ProviderConfig::from_settings(&settings);

        assert_eq!(config.kind, ProviderKind::Local);
        assert_eq!(config.base_url.as_deref(), Some("http://127.0.0.1:8080/v1"));
        assert_eq!(config.default_model.as_deref(), Some("deepseek-coder"));
        assert_eq!(config.api_key, None);
        assert_eq!(config.timeout_secs, Some(45));
    }

    #[test]
    fn test_any_provider_selection() {
        let none = ProviderConfig::from_settings(&ProviderSettings::default());
        assert!(AnyProvider::from_config(&none).unwrap().is_none());

        let local = ProviderConfig::local(DEFAULT_LOCAL_URL, DEFAULT_LOCAL_MODEL);
        let provider = AnyProvider::from_config(&local).unwrap().unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.default_model(), DEFAULT_LOCAL_MODEL);

        let keyless = ProviderConfig::anthropic("");
        let err = AnyProvider::from_config(&keyless).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_provider_error_mapping() {
        let err = ProviderError::RateLimited { retry_after: Some(30) }.into_error("engine::infer");
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(err.is_retryable());
        assert_eq!(err.context_value("retry_after"), Some("30"));

        let err = ProviderError::Api { status: 503, message: "overloaded".into() }
            .into_error("engine::infer");
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
        assert!(err.is_retryable());

        let err = ProviderError::AuthenticationFailed.into_error("engine::infer");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            ProviderError::from_status(429, String::new(), Some(5)),
            ProviderError::RateLimited { retry_after: Some(5) }
        ));
        assert!(matches!(
            ProviderError::from_status(401, String::new(), None),
            ProviderError::AuthenticationFailed
        ));
        assert!(matches!(
            ProviderError::from_status(500, "boom".into(), None),
            ProviderError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn test_stream_receiver_collects_until_done() {
        let chunks = vec![
            StreamChunk::Text("public class ".into()),
            StreamChunk::Text("RubyBlock {}".into()),
            StreamChunk::Done { finish_reason: FinishReason::Stop, usage: None },
            StreamChunk::Text("ignored".into()),
        ];
        let receiver = StreamReceiver::new(futures_util::stream::iter(chunks));

        let mut seen = 0;
        let text = tokio_test::block_on(receiver.for_each_text(|_| seen += 1)).unwrap();
        assert_eq!(text, "public class RubyBlock {}");
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_stream_receiver_surfaces_errors() {
        let chunks = vec![StreamChunk::Text("partial".into()), StreamChunk::Error("reset".into())];
        let receiver = StreamReceiver::new(futures_util::stream::iter(chunks));
        assert!(tokio_test::block_on(receiver.collect_text()).is_err());
    }

    #[test]
    fn test_usage_tracker() {
        let mut tracker = UsageTracker::new();
        tracker.track("gpt-4o", &Usage { prompt_tokens: 100, completion_tokens: 50, total_tokens: 150 });
        tracker.track("gpt-4o", &Usage { prompt_tokens: 200, completion_tokens: 100, total_tokens: 300 });

        assert_eq!(tracker.total_calls, 2);
        assert_eq!(tracker.total_tokens(), 450);
        assert_eq!(tracker.by_model["gpt-4o"].total_tokens, 450);
    }
}
