//! Instagram business account adapter (Graph API)
//!
//! Publishing is a three step protocol:
//!
//! 1. create a media container (`/{account_id}/media`), or one child
//!    container per item plus a `CAROUSEL` parent for several items,
//! 2. poll the container until its `status_code` is `FINISHED`,
//! 3. publish it with `/{account_id}/media_publish`.
//!
//! Instagram has no text-only posts, so at least one media item is required.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    check_status, AdapterSettings, Delivery, PlatformAdapter, PlatformError, PlatformId,
    PlatformResult, PostLimits,
};
use crate::content::GeneratedPost;

pub const DEFAULT_API_BASE: &str = "https://graph.facebook.com/v19.0";

const LIMITS: PostLimits = PostLimits {
    max_text_chars: 2_200,
    min_media: 1,
    max_media: 10,
    max_hashtags: 30,
};

const VIDEO_EXTENSIONS: [&str; 3] = [".mp4", ".mov", ".m4v"];

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_polls() -> u32 {
    15
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstagramConfig {
    /// Instagram business account id
    pub account_id: String,

    /// Delay between container status checks
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Status checks before giving up on a container
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,

    #[serde(flatten)]
    pub settings: AdapterSettings,
}

impl InstagramConfig {
    pub fn new(account_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
            settings: AdapterSettings::default().with_token(access_token),
        }
    }

    pub fn with_settings(mut self, settings: AdapterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_polling(mut self, poll_interval_ms: u64, max_polls: u32) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self.max_polls = max_polls;
        self
    }

    pub fn validate(&self) -> PlatformResult<()> {
        if self.account_id.trim().is_empty() {
            return Err(PlatformError::InvalidConfig(
                "instagram: account_id cannot be empty".to_string(),
            ));
        }
        if self.max_polls == 0 {
            return Err(PlatformError::InvalidConfig(
                "instagram: max_polls must be greater than 0".to_string(),
            ));
        }
        self.settings.validate(PlatformId::Instagram, true)
    }

    fn polling_budget(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.saturating_mul(u64::from(self.max_polls)))
    }
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status_code: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PermalinkResponse {
    permalink: String,
}

fn is_video(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

pub struct InstagramAdapter {
    config: InstagramConfig,
    client: Client,
}

impl InstagramAdapter {
    pub fn new(config: InstagramConfig) -> PlatformResult<Self> {
        config.validate()?;
        let client = config.settings.http_client()?;
        Ok(Self { config, client })
    }

    fn api_base(&self) -> &str {
        self.config.settings.api_base_or(DEFAULT_API_BASE)
    }

    fn token(&self) -> &str {
        &self.config.settings.access_token
    }

    async fn post_form(&self, url: String, form: &[(&str, &str)]) -> PlatformResult<String> {
        let response = check_status(self.client.post(url).form(form).send().await?).await?;
        let body: IdResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::UnexpectedResponse(e.to_string()))?;
        Ok(body.id)
    }

    async fn create_item(
        &self,
        media_url: &str,
        caption: Option<&str>,
        carousel_item: bool,
    ) -> PlatformResult<String> {
        let url = format!("{}/{}/media", self.api_base(), self.config.account_id);
        let mut form: Vec<(&str, &str)> = vec![("access_token", self.token())];

        if is_video(media_url) {
            form.push(("video_url", media_url));
            form.push(("media_type", if carousel_item { "VIDEO" } else { "REELS" }));
        } else {
            form.push(("image_url", media_url));
        }
        if carousel_item {
            form.push(("is_carousel_item", "true"));
        }
        if let Some(caption) = caption {
            form.push(("caption", caption));
        }

        self.post_form(url, &form).await
    }

    async fn create_container(&self, post: &GeneratedPost) -> PlatformResult<String> {
        let caption = post.full_text();

        if let [single] = post.media.as_slice() {
            return self.create_item(single, Some(caption.as_str()), false).await;
        }

        let mut children = Vec::with_capacity(post.media.len());
        for media_url in &post.media {
            children.push(self.create_item(media_url, None, true).await?);
        }
        let children = children.join(",");

        let url = format!("{}/{}/media", self.api_base(), self.config.account_id);
        self.post_form(
            url,
            &[
                ("media_type", "CAROUSEL"),
                ("children", children.as_str()),
                ("caption", caption.as_str()),
                ("access_token", self.token()),
            ],
        )
        .await
    }

    async fn wait_until_ready(&self, container_id: &str) -> PlatformResult<()> {
        let url = format!("{}/{container_id}", self.api_base());

        for poll in 0..self.config.max_polls {
            if poll > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
            }

            let response = self
                .client
                .get(&url)
                .query(&[("fields", "status_code,status"), ("access_token", self.token())])
                .send()
                .await?;
            let body: StatusResponse = check_status(response)
                .await?
                .json()
                .await
                .map_err(|e| PlatformError::UnexpectedResponse(e.to_string()))?;

            match body.status_code.as_deref() {
                Some("FINISHED") | Some("PUBLISHED") => return Ok(()),
                Some("ERROR") | Some("EXPIRED") => {
                    return Err(PlatformError::Rejected(format!(
                        "container {container_id} failed: {}",
                        body.status.unwrap_or_else(|| "no details".to_string())
                    )));
                }
                other => {
                    tracing::debug!(container_id, status = ?other, poll, "Container not ready");
                }
            }
        }

        Err(PlatformError::Timeout(self.config.polling_budget()))
    }

    async fn permalink(&self, media_id: &str) -> Option<String> {
        let response = self
            .client
            .get(format!("{}/{media_id}", self.api_base()))
            .query(&[("fields", "permalink"), ("access_token", self.token())])
            .send()
            .await
            .ok()?;
        let body: PermalinkResponse = check_status(response).await.ok()?.json().await.ok()?;
        Some(body.permalink)
    }
}

#[async_trait]
impl PlatformAdapter for InstagramAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::Instagram
    }

    fn settings(&self) -> &AdapterSettings {
        &self.config.settings
    }

    fn limits(&self) -> PostLimits {
        LIMITS
    }

    fn deadline(&self, post: &GeneratedPost) -> Duration {
        // One container per item, the carousel parent, the publish and permalink calls,
        // then every status poll
        let media = u32::try_from(post.media.len()).unwrap_or(u32::MAX);
        let calls = media.saturating_add(3).saturating_add(self.config.max_polls);
        let per_attempt = self
            .timeout()
            .checked_mul(calls)
            .unwrap_or(Duration::MAX)
            .saturating_add(self.config.polling_budget());
        self.retry_config().time_budget(per_attempt)
    }

    async fn send(&self, post: &GeneratedPost) -> PlatformResult<Delivery> {
        let container_id = self.create_container(post).await?;
        self.wait_until_ready(&container_id).await?;

        let url = format!("{}/{}/media_publish", self.api_base(), self.config.account_id);
        let media_id = self
            .post_form(url, &[("creation_id", container_id.as_str()), ("access_token", self.token())])
            .await?;

        let delivery = Delivery::new(media_id.clone());
        Ok(match self.permalink(&media_id).await {
            Some(permalink) => delivery.with_url(permalink),
            None => delivery,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> InstagramAdapter {
        let mut settings = AdapterSettings::default()
            .with_token("ig-token")
            .with_api_base(server.uri())
            .with_max_retries(0);
        settings.retry_base_delay_ms = 1;
        let config = InstagramConfig::new("17841", "ig-token")
            .with_settings(settings)
            .with_polling(1, 3);
        InstagramAdapter::new(config).unwrap()
    }

    fn post(media: &[&str]) -> GeneratedPost {
        GeneratedPost::new(
            "Launch",
            "Soon",
            vec!["launch".into()],
            media.iter().map(|m| m.to_string()).collect(),
            Utc::now(),
        )
    }

    async fn mount_publish(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/17841/media_publish"))
            .and(body_string_contains("creation_id=container-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "media-9"})))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/media-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"permalink": "https://www.instagram.com/p/abc/"}),
            ))
            .mount(server)
            .await;
    }

    #[test]
    fn test_deadline_grows_with_carousel_size() {
        let mut settings = AdapterSettings::default().with_token("ig-token").with_max_retries(0);
        settings.timeout_secs = 10;
        let config = InstagramConfig::new("17841", "ig-token")
            .with_settings(settings)
            .with_polling(1_000, 3);
        let adapter = InstagramAdapter::new(config).unwrap();

        let single = adapter.deadline(&post(&["https://cdn.example.com/1.png"]));
        let urls: Vec<String> = (0..10).map(|i| format!("https://cdn.example.com/{i}.png")).collect();
        let urls: Vec<&str> = urls.iter().map(String::as_str).collect();
        let carousel = adapter.deadline(&post(&urls));

        // (1 + 3 + 3) calls x 10s + 3s of polling
        assert_eq!(single, Duration::from_secs(73));
        // (10 + 3 + 3) calls x 10s + 3s of polling
        assert_eq!(carousel, Duration::from_secs(163));
    }

    #[test]
    fn test_video_detection() {
        assert!(is_video("https://cdn.example.com/clip.MP4"));
        assert!(is_video("https://cdn.example.com/clip.mov?sig=1"));
        assert!(!is_video("https://cdn.example.com/image.png"));
    }

    #[test]
    fn test_config_validation() {
        assert!(InstagramConfig::new("1", "token").validate().is_ok());
        assert!(InstagramConfig::new("", "token").validate().is_err());
        assert!(InstagramConfig::new("1", "token").with_polling(10, 0).validate().is_err());
    }

    #[tokio::test]
    async fn test_text_only_post_rejected() {
        let server = MockServer::start().await;
        let outcome = adapter(&server).publish(&post(&[])).await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 0);
    }

    #[tokio::test]
    async fn test_single_image_flow() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/17841/media"))
            .and(body_string_contains("image_url="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "container-1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/container-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status_code": "FINISHED"})))
            .expect(1)
            .mount(&server)
            .await;
        mount_publish(&server).await;

        let outcome = adapter(&server)
            .publish(&post(&["https://cdn.example.com/hero.png"]))
            .await;

        assert!(outcome.success, "{outcome}");
        assert_eq!(outcome.remote_id.as_deref(), Some("media-9"));
        assert_eq!(outcome.url.as_deref(), Some("https://www.instagram.com/p/abc/"));
    }

    #[tokio::test]
    async fn test_carousel_flow() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/17841/media"))
            .and(body_string_contains("is_carousel_item=true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "child"})))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/17841/media"))
            .and(body_string_contains("media_type=CAROUSEL"))
            .and(body_string_contains("children=child%2Cchild"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "container-1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/container-1"))
            .and(query_param("access_token", "ig-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status_code": "FINISHED"})))
            .mount(&server)
            .await;
        mount_publish(&server).await;

        let outcome = adapter(&server)
            .publish(&post(&["https://cdn.example.com/1.png", "https://cdn.example.com/2.mp4"]))
            .await;

        assert!(outcome.success, "{outcome}");
    }

    #[tokio::test]
    async fn test_container_error_fails_without_publish() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/17841/media"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "container-1"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/container-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"status_code": "ERROR", "status": "Unsupported image"}),
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/17841/media_publish"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = adapter(&server)
            .publish(&post(&["https://cdn.example.com/hero.png"]))
            .await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("Unsupported image"));
    }

    #[tokio::test]
    async fn test_container_never_ready_times_out() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/17841/media"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "container-1"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/container-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status_code": "IN_PROGRESS"})))
            .expect(3)
            .mount(&server)
            .await;

        let outcome = adapter(&server)
            .publish(&post(&["https://cdn.example.com/hero.png"]))
            .await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("Timed out"));
    }
}
