//! Generic webhook adapter
//!
//! Posts the generated content as JSON to an arbitrary endpoint, for
//! platforms without a dedicated adapter or for relaying to another system.
//!
//! # Payload Format
//!
//! ```json
//! {
//!   "platform": "webhook",
//!   "caption": "Launch week!",
//!   "body": "Seven days to go.",
//!   "text": "Launch week!\n\nSeven days to go.\n\n#launch",
//!   "hashtags": ["launch"],
//!   "media": ["https://cdn.example.com/hero.png"],
//!   "content_hash": "9f2c...",
//!   "generated_at": "2025-03-03T08:00:00Z"
//! }
//! ```
//!
//! The content hash is also sent as the `Idempotency-Key` header so a
//! receiver can drop duplicates caused by retries.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    check_status, AdapterSettings, Delivery, PlatformAdapter, PlatformError, PlatformId,
    PlatformResult,
};
use crate::content::GeneratedPost;

/// Webhook adapter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Endpoint receiving the POST
    pub url: String,

    /// Custom headers to include in requests
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Shared settings, `access_token` is sent as a bearer token when set
    #[serde(flatten)]
    pub settings: AdapterSettings,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            settings: AdapterSettings::default(),
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.settings.access_token = token.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_settings(mut self, settings: AdapterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn validate(&self) -> PlatformResult<()> {
        if self.url.is_empty() {
            return Err(PlatformError::InvalidConfig(
                "webhook: url cannot be empty".to_string(),
            ));
        }

        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(PlatformError::InvalidConfig(
                "webhook: url must start with http:// or https://".to_string(),
            ));
        }

        self.settings.validate(PlatformId::Webhook, false)
    }
}

/// Posts content as JSON via HTTP POST
pub struct WebhookAdapter {
    config: WebhookConfig,
    client: Client,
}

impl WebhookAdapter {
    pub fn new(config: WebhookConfig) -> PlatformResult<Self> {
        config.validate()?;
        let client = config.settings.http_client()?;
        Ok(Self { config, client })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn build_payload(&self, post: &GeneratedPost) -> serde_json::Value {
        serde_json::json!({
            "platform": PlatformId::Webhook,
            "caption": post.caption,
            "body": post.body,
            "text": post.full_text(),
            "hashtags": post.hashtags,
            "media": post.media,
            "content_hash": post.content_hash,
            "generated_at": post.generated_at.to_rfc3339(),
        })
    }
}

#[async_trait]
impl PlatformAdapter for WebhookAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::Webhook
    }

    fn settings(&self) -> &AdapterSettings {
        &self.config.settings
    }

    async fn send(&self, post: &GeneratedPost) -> PlatformResult<Delivery> {
        let mut request = self
            .client
            .post(&self.config.url)
            .header("Idempotency-Key", &post.content_hash);

        if !self.config.settings.access_token.is_empty() {
            request = request.bearer_auth(&self.config.settings.access_token);
        }

        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        let response = check_status(request.json(&self.build_payload(post)).send().await?).await?;

        // Receivers may answer with an id; otherwise the content hash identifies the post
        let body = response.text().await.unwrap_or_default();
        let remote_id = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| match v.get("id") {
                Some(serde_json::Value::String(id)) => Some(id.clone()),
                Some(serde_json::Value::Number(id)) => Some(id.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| post.content_hash.clone());

        tracing::debug!(url = %self.config.url, remote_id = %remote_id, "Webhook delivered");
        Ok(Delivery::new(remote_id))
    }
}
