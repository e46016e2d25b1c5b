//! Facebook page adapter (Graph API)
//!
//! Text posts go to `/{page_id}/feed`; a post with a single image goes to
//! `/{page_id}/photos` with the text as caption.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    check_status, AdapterSettings, Delivery, PlatformAdapter, PlatformError, PlatformId,
    PlatformResult, PostLimits,
};
use crate::content::GeneratedPost;

pub const DEFAULT_API_BASE: &str = "https://graph.facebook.com/v19.0";

const LIMITS: PostLimits = PostLimits {
    max_text_chars: 63_206,
    min_media: 0,
    max_media: 1,
    max_hashtags: usize::MAX,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacebookConfig {
    /// Page the posts are published to
    pub page_id: String,

    #[serde(flatten)]
    pub settings: AdapterSettings,
}

impl FacebookConfig {
    pub fn new(page_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            page_id: page_id.into(),
            settings: AdapterSettings::default().with_token(access_token),
        }
    }

    pub fn with_settings(mut self, settings: AdapterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn validate(&self) -> PlatformResult<()> {
        if self.page_id.trim().is_empty() {
            return Err(PlatformError::InvalidConfig(
                "facebook: page_id cannot be empty".to_string(),
            ));
        }
        self.settings.validate(PlatformId::Facebook, true)
    }
}

#[derive(Debug, Deserialize)]
struct GraphPostResponse {
    id: String,
    /// Set by `/photos`, the feed post wrapping the photo
    #[serde(default)]
    post_id: Option<String>,
}

pub struct FacebookAdapter {
    config: FacebookConfig,
    client: Client,
}

impl FacebookAdapter {
    pub fn new(config: FacebookConfig) -> PlatformResult<Self> {
        config.validate()?;
        let client = config.settings.http_client()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, edge: &str) -> String {
        format!(
            "{}/{}/{edge}",
            self.config.settings.api_base_or(DEFAULT_API_BASE),
            self.config.page_id
        )
    }
}

#[async_trait]
impl PlatformAdapter for FacebookAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::Facebook
    }

    fn settings(&self) -> &AdapterSettings {
        &self.config.settings
    }

    fn limits(&self) -> PostLimits {
        LIMITS
    }

    async fn send(&self, post: &GeneratedPost) -> PlatformResult<Delivery> {
        let text = post.full_text();
        let token = self.config.settings.access_token.as_str();

        let request = match post.media.first() {
            Some(image) => self.client.post(self.endpoint("photos")).form(&[
                ("url", image.as_str()),
                ("caption", text.as_str()),
                ("access_token", token),
            ]),
            None => self
                .client
                .post(self.endpoint("feed"))
                .form(&[("message", text.as_str()), ("access_token", token)]),
        };

        let response = check_status(request.send().await?).await?;
        let body: GraphPostResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::UnexpectedResponse(e.to_string()))?;

        let remote_id = body.post_id.unwrap_or(body.id);
        let url = format!("https://www.facebook.com/{remote_id}");
        Ok(Delivery::new(remote_id).with_url(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> FacebookAdapter {
        let mut settings = AdapterSettings::default()
            .with_token("page-token")
            .with_api_base(server.uri())
            .with_max_retries(1);
        settings.retry_base_delay_ms = 1;
        FacebookAdapter::new(FacebookConfig::new("1234", "page-token").with_settings(settings)).unwrap()
    }

    #[test]
    fn test_config_requires_token_and_page() {
        assert!(FacebookConfig::new("1234", "token").validate().is_ok());
        assert!(FacebookConfig::new("", "token").validate().is_err());
        assert!(FacebookConfig::new("1234", "").validate().is_err());
    }

    #[tokio::test]
    async fn test_text_post_goes_to_feed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1234/feed"))
            .and(body_string_contains("access_token=page-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "1234_99"})))
            .expect(1)
            .mount(&server)
            .await;

        let post = GeneratedPost::new("Hello", "World", vec![], vec![], Utc::now());
        let outcome = adapter(&server).publish(&post).await;

        assert!(outcome.success, "{outcome}");
        assert_eq!(outcome.remote_id.as_deref(), Some("1234_99"));
        assert_eq!(outcome.url.as_deref(), Some("https://www.facebook.com/1234_99"));
    }

    #[tokio::test]
    async fn test_photo_post_uses_wrapping_post_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1234/photos"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "photo-1", "post_id": "1234_100"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let post = GeneratedPost::new(
            "Hello",
            "",
            vec![],
            vec!["https://cdn.example.com/a.png".into()],
            Utc::now(),
        );
        let outcome = adapter(&server).publish(&post).await;

        assert!(outcome.success, "{outcome}");
        assert_eq!(outcome.remote_id.as_deref(), Some("1234_100"));
    }

    #[tokio::test]
    async fn test_graph_error_message_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"message": "Invalid OAuth access token.", "code": 190}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let post = GeneratedPost::new("Hello", "World", vec![], vec![], Utc::now());
        let outcome = adapter(&server).publish(&post).await;

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("HTTP 400: Invalid OAuth access token."));
    }

    #[tokio::test]
    async fn test_two_images_rejected_without_network() {
        let server = MockServer::start().await;
        let post = GeneratedPost::new(
            "Hello",
            "",
            vec![],
            vec!["https://a/1.png".into(), "https://a/2.png".into()],
            Utc::now(),
        );

        let outcome = adapter(&server).publish(&post).await;
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 0);
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
