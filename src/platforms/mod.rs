//! Social platform adapters
//!
//! Each external network is wrapped in a [`PlatformAdapter`]. The fan-out
//! only sees the adapter contract: enabled or not, validate the post, publish
//! it and report a [`PublishOutcome`]. Protocol details such as Instagram's
//! container → poll → publish sequence stay inside the adapter.
//!
//! Retry lives here too: [`PlatformAdapter::publish`] validates once, then
//! calls [`PlatformAdapter::send`] under the adapter's retry policy, retrying
//! only transient failures.

pub mod facebook;
pub mod fanout;
pub mod instagram;
pub mod linkedin;
pub mod webhook;

pub use facebook::{FacebookAdapter, FacebookConfig};
pub use fanout::{PlatformFanout, PublishEvent};
pub use instagram::{InstagramAdapter, InstagramConfig};
pub use linkedin::{LinkedinAdapter, LinkedinConfig};
pub use webhook::{WebhookAdapter, WebhookConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::content::GeneratedPost;
use crate::utils::retry::{retry_with_report, BackoffStrategy, RetryConfig};

// ============================================================================
// Platform Identity
// ============================================================================

/// Supported publishing targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformId {
    Facebook,
    Instagram,
    Linkedin,
    Webhook,
}

impl PlatformId {
    pub const ALL: [PlatformId; 4] = [
        PlatformId::Facebook,
        PlatformId::Instagram,
        PlatformId::Linkedin,
        PlatformId::Webhook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Facebook => "facebook",
            Self::Instagram => "instagram",
            Self::Linkedin => "linkedin",
            Self::Webhook => "webhook",
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformId {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PlatformError::InvalidConfig(format!("unknown platform '{s}'")))
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Result type for adapter operations
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Errors that can occur while publishing to a platform
#[derive(Debug, Error)]
pub enum PlatformError {
    /// HTTP transport error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from the platform API
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Platform accepted the request but reported a failure
    #[error("Platform rejected the post: {0}")]
    Rejected(String),

    /// Post violates the platform's limits
    #[error("Post validation failed: {0}")]
    Validation(String),

    /// Adapter is administratively disabled
    #[error("Platform {0} is disabled")]
    Disabled(PlatformId),

    /// No adapter configured for the requested channel
    #[error("Platform {0} not configured")]
    NotConfigured(PlatformId),

    /// Call did not finish within its deadline
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid adapter configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected response shape
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl PlatformError {
    /// Whether another attempt may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Timeout(_) => true,
            Self::Rejected(_)
            | Self::Validation(_)
            | Self::Disabled(_)
            | Self::NotConfigured(_)
            | Self::InvalidConfig(_)
            | Self::UnexpectedResponse(_) => false,
        }
    }
}

/// Turn a non-success response into [`PlatformError::Status`]
///
/// Graph-style `{"error": {"message": ...}}` bodies are unwrapped to their
/// message.
pub(crate) async fn check_status(response: reqwest::Response) -> PlatformResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or(body);

    Err(PlatformError::Status {
        status: status.as_u16(),
        message,
    })
}

// ============================================================================
// Shared Adapter Settings
// ============================================================================

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    3
}

/// Largest accepted `max_retries`
pub const MAX_RETRIES: u32 = 10;

fn default_base_delay_ms() -> u64 {
    1000
}

/// Settings common to every adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterSettings {
    /// Administrative switch
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// API credential
    #[serde(default)]
    pub access_token: String,

    /// Retries after the first attempt
    #[serde(default = "default_retries")]
    pub max_retries: u32,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Base delay between retries
    #[serde(default = "default_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Linear or exponential retry delay
    #[serde(default)]
    pub backoff: BackoffStrategy,

    /// Override of the API base URL
    #[serde(default)]
    pub api_base: Option<String>,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            access_token: String::new(),
            max_retries: default_retries(),
            timeout_secs: default_timeout(),
            retry_base_delay_ms: default_base_delay_ms(),
            backoff: BackoffStrategy::default(),
            api_base: None,
        }
    }
}

impl AdapterSettings {
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = token.into();
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay_ms: self.retry_base_delay_ms,
            max_delay_ms: self.retry_base_delay_ms.saturating_mul(30),
            backoff_multiplier: 2.0,
            strategy: self.backoff,
        }
    }

    /// API base, falling back to the platform default
    pub fn api_base_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.api_base
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
    }

    /// Checks shared by every adapter
    pub fn validate(&self, platform: PlatformId, requires_token: bool) -> PlatformResult<()> {
        if self.timeout_secs == 0 {
            return Err(PlatformError::InvalidConfig(format!(
                "{platform}: timeout_secs must be greater than 0"
            )));
        }

        if self.max_retries > MAX_RETRIES {
            return Err(PlatformError::InvalidConfig(format!(
                "{platform}: max_retries must be at most {MAX_RETRIES}"
            )));
        }

        if requires_token && self.enabled && self.access_token.trim().is_empty() {
            return Err(PlatformError::InvalidConfig(format!(
                "{platform}: access_token is required"
            )));
        }

        if let Some(base) = &self.api_base {
            url::Url::parse(base).map_err(|e| {
                PlatformError::InvalidConfig(format!("{platform}: invalid api_base '{base}': {e}"))
            })?;
        }

        Ok(())
    }

    /// HTTP client honouring the request timeout
    pub(crate) fn http_client(&self) -> PlatformResult<reqwest::Client> {
        Ok(reqwest::Client::builder().timeout(self.timeout()).build()?)
    }
}

/// Size and media constraints of a platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostLimits {
    pub max_text_chars: usize,
    pub min_media: usize,
    pub max_media: usize,
    pub max_hashtags: usize,
}

impl PostLimits {
    pub const UNLIMITED: PostLimits = PostLimits {
        max_text_chars: usize::MAX,
        min_media: 0,
        max_media: usize::MAX,
        max_hashtags: usize::MAX,
    };

    /// Check a post against these limits
    pub fn check(&self, post: &GeneratedPost) -> PlatformResult<()> {
        let chars = post.full_text().chars().count();
        if chars > self.max_text_chars {
            return Err(PlatformError::Validation(format!(
                "text has {chars} characters, limit is {}",
                self.max_text_chars
            )));
        }

        let media = post.media.len();
        if media < self.min_media {
            return Err(PlatformError::Validation(format!(
                "at least {} media item(s) required, got {media}",
                self.min_media
            )));
        }
        if media > self.max_media {
            return Err(PlatformError::Validation(format!(
                "at most {} media item(s) allowed, got {media}",
                self.max_media
            )));
        }

        if post.hashtags.len() > self.max_hashtags {
            return Err(PlatformError::Validation(format!(
                "at most {} hashtags allowed, got {}",
                self.max_hashtags,
                post.hashtags.len()
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// What a platform returned for an accepted post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub remote_id: String,
    pub url: Option<String>,
}

impl Delivery {
    pub fn new(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Per-platform publish result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub platform: PlatformId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Calls made, 0 when the adapter failed before any network call
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl PublishOutcome {
    /// Create a successful outcome
    pub fn success(platform: PlatformId, delivery: Delivery, attempts: u32) -> Self {
        Self {
            platform,
            success: true,
            remote_id: Some(delivery.remote_id),
            url: delivery.url,
            error: None,
            attempts,
            timestamp: Utc::now(),
        }
    }

    /// Create a failed outcome
    pub fn failure(platform: PlatformId, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            platform,
            success: false,
            remote_id: None,
            url: None,
            error: Some(error.into()),
            attempts,
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { "SUCCESS" } else { "FAILED" };
        write!(f, "[{status}] {}", self.platform)?;
        if let Some(id) = &self.remote_id {
            write!(f, ": {id}")?;
        }
        if let Some(err) = &self.error {
            write!(f, ": {err}")?;
        }
        Ok(())
    }
}

/// Aggregate over one fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    pub outcomes: Vec<PublishOutcome>,
    pub successful_platforms: Vec<PlatformId>,
    pub failed_platforms: Vec<PlatformId>,
    /// At least one platform succeeded
    pub success: bool,
    /// Every attempted platform succeeded
    pub all_succeeded: bool,
}

impl PublishResult {
    pub fn from_outcomes(outcomes: Vec<PublishOutcome>) -> Self {
        let successful_platforms: Vec<_> = outcomes
            .iter()
            .filter(|o| o.success)
            .map(|o| o.platform)
            .collect();
        let failed_platforms: Vec<_> = outcomes
            .iter()
            .filter(|o| !o.success)
            .map(|o| o.platform)
            .collect();

        Self {
            success: !successful_platforms.is_empty(),
            all_succeeded: failed_platforms.is_empty(),
            outcomes,
            successful_platforms,
            failed_platforms,
        }
    }
}

// ============================================================================
// Adapter Contract
// ============================================================================

/// One external publishing platform
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> PlatformId;

    /// Shared settings (enabled flag, timeout, retry)
    fn settings(&self) -> &AdapterSettings;

    /// Size and media limits
    fn limits(&self) -> PostLimits {
        PostLimits::UNLIMITED
    }

    fn is_enabled(&self) -> bool {
        self.settings().enabled
    }

    fn timeout(&self) -> Duration {
        self.settings().timeout()
    }

    fn retry_config(&self) -> RetryConfig {
        self.settings().retry_config()
    }

    /// Reject posts the platform would refuse, before any network call
    fn validate(&self, post: &GeneratedPost) -> PlatformResult<()> {
        self.limits().check(post)
    }

    /// One delivery attempt
    async fn send(&self, post: &GeneratedPost) -> PlatformResult<Delivery>;

    /// Upper bound for a full publish of `post` including retries
    fn deadline(&self, _post: &GeneratedPost) -> Duration {
        self.retry_config().time_budget(self.timeout())
    }

    /// Validate, send with retry, and report the outcome
    async fn publish(&self, post: &GeneratedPost) -> PublishOutcome {
        let platform = self.platform();

        if !self.is_enabled() {
            return PublishOutcome::failure(platform, PlatformError::Disabled(platform).to_string(), 0);
        }

        if let Err(e) = self.validate(post) {
            tracing::warn!(platform = %platform, error = %e, "Post rejected before sending");
            return PublishOutcome::failure(platform, e.to_string(), 0);
        }

        let report = retry_with_report(
            &self.retry_config(),
            || self.send(post),
            PlatformError::is_recoverable,
        )
        .await;

        match report.result {
            Ok(delivery) => {
                tracing::info!(
                    platform = %platform,
                    remote_id = %delivery.remote_id,
                    attempts = report.attempts,
                    "Post published"
                );
                PublishOutcome::success(platform, delivery, report.attempts)
            }
            Err(e) => {
                tracing::error!(
                    platform = %platform,
                    attempts = report.attempts,
                    error = %e,
                    "Post publish failed"
                );
                PublishOutcome::failure(platform, e.to_string(), report.attempts)
            }
        }
    }
}

/// Thread-safe shared adapter
pub type SharedAdapter = Arc<dyn PlatformAdapter>;

// ============================================================================
// Configuration
// ============================================================================

/// Adapter configuration per platform, absent sections are not configured
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformsConfig {
    pub facebook: Option<FacebookConfig>,
    pub instagram: Option<InstagramConfig>,
    pub linkedin: Option<LinkedinConfig>,
    pub webhook: Option<WebhookConfig>,
}

impl PlatformsConfig {
    pub fn validate(&self) -> PlatformResult<()> {
        if let Some(config) = &self.facebook {
            config.validate()?;
        }
        if let Some(config) = &self.instagram {
            config.validate()?;
        }
        if let Some(config) = &self.linkedin {
            config.validate()?;
        }
        if let Some(config) = &self.webhook {
            config.validate()?;
        }
        Ok(())
    }

    /// Build an adapter for every configured platform
    pub fn build_adapters(&self) -> PlatformResult<Vec<SharedAdapter>> {
        let mut adapters: Vec<SharedAdapter> = Vec::new();

        if let Some(config) = &self.facebook {
            adapters.push(Arc::new(FacebookAdapter::new(config.clone())?));
        }
        if let Some(config) = &self.instagram {
            adapters.push(Arc::new(InstagramAdapter::new(config.clone())?));
        }
        if let Some(config) = &self.linkedin {
            adapters.push(Arc::new(LinkedinAdapter::new(config.clone())?));
        }
        if let Some(config) = &self.webhook {
            adapters.push(Arc::new(WebhookAdapter::new(config.clone())?));
        }

        Ok(adapters)
    }
}
