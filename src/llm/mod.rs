//! Content generation collaborator
//!
//! The generator stage only needs "prompt + system prompt in, text out".
//! [`ContentGenerator`] captures that contract; [`LlmClient`] implements it
//! against an Ollama-compatible `/api/generate` endpoint with a request
//! timeout and bounded retry.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::utils::retry::{with_retry_if, RetryConfig};
use crate::utils::truncate_chars;

/// Default instructions sent with every generation request
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a social media copywriter. \
Reply with a single JSON object with the keys \"caption\", \"body\", \"hashtags\" \
(array of strings without '#') and \"media\" (array of media references). \
Do not add commentary outside the JSON.";

// ============================================================================
// Errors
// ============================================================================

/// Errors from the content generation service
#[derive(Error, Debug)]
pub enum LlmError {
    /// HTTP transport error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from the service
    #[error("Generation request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// Service returned no text
    #[error("Generator returned an empty response")]
    EmptyResponse,

    /// Invalid client configuration
    #[error("Invalid generator config: {0}")]
    Config(String),
}

impl LlmError {
    /// Whether retrying the request may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::EmptyResponse => true,
            Self::Config(_) => false,
        }
    }
}

// ============================================================================
// Generator Contract
// ============================================================================

/// Produces text for a prompt
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Generate a completion for `prompt` under `system_prompt`
    async fn complete(&self, prompt: &str, system_prompt: &str) -> Result<String, LlmError>;
}

/// Thread-safe shared generator
pub type SharedGenerator = Arc<dyn ContentGenerator>;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the LLM client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Ollama endpoint URL (default: http://localhost:11434)
    pub endpoint: String,

    /// Model name to use
    pub model: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Temperature for generation (0.0 - 1.0)
    pub temperature: f32,

    /// System prompt sent with every request
    pub system_prompt: String,

    /// Retry policy for transient failures
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "qwen2.5:7b".to_string(),
            timeout_secs: 60,
            max_tokens: 1024,
            temperature: 0.7,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            endpoint: std::env::var("OLLAMA_ENDPOINT").unwrap_or(defaults.endpoint),
            model: std::env::var("OLLAMA_MODEL").unwrap_or(defaults.model),
            timeout_secs: std::env::var("OLLAMA_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.timeout_secs),
            max_tokens: std::env::var("OLLAMA_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_tokens),
            temperature: std::env::var("OLLAMA_TEMPERATURE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.temperature),
            system_prompt: defaults.system_prompt,
            retry: defaults.retry,
        }
    }

    pub fn validate(&self) -> Result<(), LlmError> {
        url::Url::parse(&self.endpoint)
            .map_err(|e| LlmError::Config(format!("invalid endpoint '{}': {e}", self.endpoint)))?;

        if self.model.trim().is_empty() {
            return Err(LlmError::Config("model must not be empty".to_string()));
        }

        if self.timeout_secs == 0 {
            return Err(LlmError::Config("timeout_secs must be positive".to_string()));
        }

        Ok(())
    }
}

// ============================================================================
// Ollama Client
// ============================================================================

/// Ollama generate request
#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    stream: bool,
    options: OllamaOptions,
}

/// Ollama generation options
#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Ollama generate response
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

/// HTTP content generator backed by Ollama
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
}

impl LlmClient {
    /// Create a new LLM client with custom config
    pub fn with_config(config: LlmConfig) -> Result<Self, LlmError> {
        config.validate()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    /// Create a client from environment variables
    pub fn from_env() -> Result<Self, LlmError> {
        Self::with_config(LlmConfig::from_env())
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Single generation request without retry
    async fn generate(&self, prompt: &str, system_prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'));

        let request = OllamaRequest {
            model: &self.config.model,
            prompt,
            system: system_prompt,
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            },
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status,
                body: truncate_chars(&body, 500),
            });
        }

        let parsed: OllamaResponse = response.json().await?;
        if parsed.response.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        Ok(parsed.response)
    }
}

#[async_trait]
impl ContentGenerator for LlmClient {
    async fn complete(&self, prompt: &str, system_prompt: &str) -> Result<String, LlmError> {
        tracing::debug!(
            model = %self.config.model,
            prompt_len = prompt.len(),
            "Requesting completion"
        );

        with_retry_if(
            &self.config.retry,
            || self.generate(prompt, system_prompt),
            LlmError::is_recoverable,
        )
        .await
    }
}

/// Extract a JSON document from markdown code blocks or surrounding prose
pub fn extract_raw_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        if let Some(end) = text[start + 7..].find("```") {
            return Some(text[start + 7..start + 7 + end].trim());
        }
    }

    if let Some(start) = text.find("```") {
        let after_start = &text[start + 3..];
        // Skip language identifier if present
        let content_start = after_start.find('\n').map_or(0, |i| i + 1);
        if let Some(end) = after_start[content_start..].find("```") {
            return Some(after_start[content_start..content_start + end].trim());
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = LlmConfig::default();
        assert_eq!(config.endpoint, "http://localhost:11434");
        assert!(config.validate().is_ok());
        assert!(config.system_prompt.contains("caption"));
    }

    #[test]
    fn test_config_validate() {
        let mut config = LlmConfig::default();
        config.endpoint = "not a url".to_string();
        assert!(matches!(config.validate(), Err(LlmError::Config(_))));

        let mut config = LlmConfig::default();
        config.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_extract_json_from_code_block() {
        let text = "Here is the post:\n```json\n{\"caption\": \"Hello\"}\n```\n";
        assert_eq!(extract_raw_json(text), Some("{\"caption\": \"Hello\"}"));
    }

    #[test]
    fn test_extract_json_generic_block() {
        let text = "```\n{\"caption\": \"Hi\"}\n```";
        assert_eq!(extract_raw_json(text), Some("{\"caption\": \"Hi\"}"));
    }

    #[test]
    fn test_extract_json_raw() {
        assert_eq!(extract_raw_json("sure! {\"a\": 1} done"), Some("{\"a\": 1}"));
        assert_eq!(extract_raw_json("plain text only"), None);
    }

    #[test]
    fn test_status_recoverability() {
        let server_error = LlmError::Status {
            status: 503,
            body: String::new(),
        };
        let bad_request = LlmError::Status {
            status: 400,
            body: String::new(),
        };
        assert!(server_error.is_recoverable());
        assert!(!bad_request.is_recoverable());
    }

    fn client_for(server: &wiremock::MockServer, max_retries: u32) -> LlmClient {
        LlmClient::with_config(LlmConfig {
            endpoint: server.uri(),
            retry: RetryConfig::with_delays(max_retries, 1, 5),
            ..LlmConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_complete_sends_model_and_system_prompt() {
        use wiremock::matchers::{body_partial_json, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "qwen2.5:7b",
                "system": "be brief",
                "stream": false,
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"response": "{}"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server, 0).complete("hello", "be brief").await.unwrap();
        assert_eq!(text, "{}");
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = client_for(&server, 2).complete("hello", "").await.unwrap_err();
        assert!(matches!(err, LlmError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_blank_response_is_empty() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"response": "  "})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server, 0).complete("hello", "").await.unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse));
    }
}
