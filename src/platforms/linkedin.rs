//! LinkedIn adapter (Posts API)
//!
//! Creates a post for a person or organization URN via `POST /rest/posts`.
//! The created post URN comes back in the `x-restli-id` header. A single
//! media URL is shared as an article link.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    check_status, AdapterSettings, Delivery, PlatformAdapter, PlatformError, PlatformId,
    PlatformResult, PostLimits,
};
use crate::content::GeneratedPost;

pub const DEFAULT_API_BASE: &str = "https://api.linkedin.com";

const API_VERSION: &str = "202405";

const LIMITS: PostLimits = PostLimits {
    max_text_chars: 3_000,
    min_media: 0,
    max_media: 1,
    max_hashtags: usize::MAX,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedinConfig {
    /// Author URN, `urn:li:organization:{id}` or `urn:li:person:{id}`
    pub author_urn: String,

    #[serde(flatten)]
    pub settings: AdapterSettings,
}

impl LinkedinConfig {
    pub fn new(author_urn: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            author_urn: author_urn.into(),
            settings: AdapterSettings::default().with_token(access_token),
        }
    }

    pub fn with_settings(mut self, settings: AdapterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn validate(&self) -> PlatformResult<()> {
        if !self.author_urn.starts_with("urn:li:") {
            return Err(PlatformError::InvalidConfig(format!(
                "linkedin: author_urn '{}' must start with urn:li:",
                self.author_urn
            )));
        }
        self.settings.validate(PlatformId::Linkedin, true)
    }
}

pub struct LinkedinAdapter {
    config: LinkedinConfig,
    client: Client,
}

impl LinkedinAdapter {
    pub fn new(config: LinkedinConfig) -> PlatformResult<Self> {
        config.validate()?;
        let client = config.settings.http_client()?;
        Ok(Self { config, client })
    }

    fn build_payload(&self, post: &GeneratedPost) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "author": self.config.author_urn,
            "commentary": post.full_text(),
            "visibility": "PUBLIC",
            "distribution": {
                "feedDistribution": "MAIN_FEED",
                "targetEntities": [],
                "thirdPartyDistributionChannels": []
            },
            "lifecycleState": "PUBLISHED",
            "isReshareDisabledByAuthor": false
        });

        if let Some(link) = post.media.first() {
            payload["content"] = serde_json::json!({
                "article": {
                    "source": link,
                    "title": post.caption,
                }
            });
        }

        payload
    }
}

#[async_trait]
impl PlatformAdapter for LinkedinAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::Linkedin
    }

    fn settings(&self) -> &AdapterSettings {
        &self.config.settings
    }

    fn limits(&self) -> PostLimits {
        LIMITS
    }

    async fn send(&self, post: &GeneratedPost) -> PlatformResult<Delivery> {
        let url = format!(
            "{}/rest/posts",
            self.config.settings.api_base_or(DEFAULT_API_BASE)
        );

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.settings.access_token)
            .header("LinkedIn-Version", API_VERSION)
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&self.build_payload(post))
            .send()
            .await?;
        let response = check_status(response).await?;

        let urn = response
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or_else(|| PlatformError::UnexpectedResponse("missing x-restli-id header".to_string()))?;

        let url = format!("https://www.linkedin.com/feed/update/{urn}");
        Ok(Delivery::new(urn).with_url(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const AUTHOR: &str = "urn:li:organization:42";

    fn adapter(server: &MockServer) -> LinkedinAdapter {
        let mut settings = AdapterSettings::default()
            .with_token("li-token")
            .with_api_base(server.uri())
            .with_max_retries(1);
        settings.retry_base_delay_ms = 1;
        LinkedinAdapter::new(LinkedinConfig::new(AUTHOR, "li-token").with_settings(settings)).unwrap()
    }

    #[test]
    fn test_author_urn_validation() {
        assert!(LinkedinConfig::new(AUTHOR, "token").validate().is_ok());
        assert!(LinkedinConfig::new("42", "token").validate().is_err());
    }

    #[test]
    fn test_payload_with_article() {
        let server_less = LinkedinAdapter::new(LinkedinConfig::new(AUTHOR, "token")).unwrap();
        let post = GeneratedPost::new(
            "Launch",
            "Read more",
            vec![],
            vec!["https://example.com/launch".into()],
            Utc::now(),
        );
        let payload = server_less.build_payload(&post);

        assert_eq!(payload["author"], AUTHOR);
        assert_eq!(payload["content"]["article"]["source"], "https://example.com/launch");
        assert_eq!(payload["lifecycleState"], "PUBLISHED");
    }

    #[tokio::test]
    async fn test_post_urn_from_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/posts"))
            .and(header("authorization", "Bearer li-token"))
            .and(header("LinkedIn-Version", API_VERSION))
            .respond_with(ResponseTemplate::new(201).insert_header("x-restli-id", "urn:li:share:7"))
            .expect(1)
            .mount(&server)
            .await;

        let post = GeneratedPost::new("Launch", "Soon", vec![], vec![], Utc::now());
        let outcome = adapter(&server).publish(&post).await;

        assert!(outcome.success, "{outcome}");
        assert_eq!(outcome.remote_id.as_deref(), Some("urn:li:share:7"));
        assert_eq!(
            outcome.url.as_deref(),
            Some("https://www.linkedin.com/feed/update/urn:li:share:7")
        );
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({"message": "slow down"})))
            .expect(2)
            .mount(&server)
            .await;

        let post = GeneratedPost::new("Launch", "Soon", vec![], vec![], Utc::now());
        let outcome = adapter(&server).publish(&post).await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.error.as_deref(), Some("HTTP 429: slow down"));
    }
}
