//! Configuration management for herald
//!
//! This module handles loading and validating configuration from a TOML file
//! or from `HERALD_*` environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::llm::LlmConfig;
use crate::pipeline::{PipelineConfig, PublishPolicy};
use crate::platforms::{
    FacebookConfig, InstagramConfig, LinkedinConfig, PlatformsConfig, WebhookConfig,
};
use crate::server::ServerConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP trigger surface
    pub server: ServerConfig,

    /// Record store
    pub storage: StorageConfig,

    /// Generated content on disk
    pub content: ContentConfig,

    /// Content generator
    pub llm: LlmConfig,

    /// Stage tuning and ticker
    pub pipeline: PipelineConfig,

    /// Platform adapters, absent sections are not configured
    pub platforms: PlatformsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Record store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Lost on exit; for tests and dry runs
    Memory,
    /// Single JSON document rewritten on save
    #[default]
    Json,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("unknown storage backend '{other}'"),
        }
    }
}

/// Record store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// JSON store file
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Json,
            path: PathBuf::from("data/herald.json"),
        }
    }
}

/// Generated content configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Root folder for generated posts
    pub root: PathBuf,

    /// Base URL that relative media references are resolved against
    pub public_base_url: Option<String>,

    /// Handlebars prompt template overriding the built-in one
    pub prompt_template: Option<PathBuf>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/content"),
            public_base_url: None,
            prompt_template: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let mut server = defaults.server;
        if let Ok(addr) = std::env::var("HERALD_BIND_ADDRESS") {
            server.bind_address = addr
                .parse()
                .with_context(|| format!("Invalid HERALD_BIND_ADDRESS: {addr}"))?;
        }
        server.enable_ticker = env_parse("HERALD_ENABLE_TICKER").unwrap_or(server.enable_ticker);

        let backend = match std::env::var("HERALD_STORAGE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.storage.backend,
        };
        let storage = StorageConfig {
            backend,
            path: std::env::var("HERALD_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage.path),
        };

        let content = ContentConfig {
            root: std::env::var("HERALD_CONTENT_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.content.root),
            public_base_url: std::env::var("HERALD_PUBLIC_BASE_URL").ok(),
            prompt_template: std::env::var("HERALD_PROMPT_TEMPLATE").ok().map(PathBuf::from),
        };

        let mut pipeline = defaults.pipeline;
        pipeline.max_concurrent_tasks =
            env_parse("HERALD_MAX_CONCURRENT_TASKS").unwrap_or(pipeline.max_concurrent_tasks);
        pipeline.ticker.interval_secs =
            env_parse("HERALD_TICK_INTERVAL_SECS").unwrap_or(pipeline.ticker.interval_secs);
        if let Ok(policy) = std::env::var("HERALD_PUBLISH_POLICY") {
            pipeline.publish_policy = match policy.to_ascii_lowercase().as_str() {
                "all" => PublishPolicy::All,
                "any" => PublishPolicy::Any,
                other => anyhow::bail!("unknown publish policy '{other}'"),
            };
        }

        let logging = LoggingConfig {
            level: std::env::var("HERALD_LOG_LEVEL").unwrap_or(defaults.logging.level),
            format: std::env::var("HERALD_LOG_FORMAT").unwrap_or(defaults.logging.format),
        };

        Ok(Self {
            server,
            storage,
            content,
            llm: LlmConfig::from_env(),
            pipeline,
            platforms: platforms_from_env(),
            logging,
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.server.validate().context("Invalid server config")?;
        self.llm.validate().context("Invalid llm config")?;
        self.pipeline.validate().context("Invalid pipeline config")?;
        self.platforms.validate().context("Invalid platforms config")?;

        if self.storage.backend == StorageBackend::Json
            && self.storage.path.as_os_str().is_empty()
        {
            anyhow::bail!("storage.path is required for the json backend");
        }

        if let Some(base) = &self.content.public_base_url {
            url::Url::parse(base)
                .with_context(|| format!("Invalid content.public_base_url: {base}"))?;
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be 'text' or 'json'");
        }

        Ok(())
    }
}

fn platforms_from_env() -> PlatformsConfig {
    let token = |key: &str| std::env::var(key).unwrap_or_default();

    PlatformsConfig {
        facebook: std::env::var("HERALD_FACEBOOK_PAGE_ID")
            .ok()
            .map(|page| FacebookConfig::new(page, token("HERALD_FACEBOOK_TOKEN"))),
        instagram: std::env::var("HERALD_INSTAGRAM_ACCOUNT_ID")
            .ok()
            .map(|account| InstagramConfig::new(account, token("HERALD_INSTAGRAM_TOKEN"))),
        linkedin: std::env::var("HERALD_LINKEDIN_AUTHOR_URN")
            .ok()
            .map(|urn| LinkedinConfig::new(urn, token("HERALD_LINKEDIN_TOKEN"))),
        webhook: std::env::var("HERALD_WEBHOOK_URL").ok().map(|url| {
            match std::env::var("HERALD_WEBHOOK_TOKEN") {
                Ok(t) => WebhookConfig::new(url).with_auth_token(t),
                Err(_) => WebhookConfig::new(url),
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.backend, StorageBackend::Json);
        assert_eq!(config.pipeline.schedule_horizon_days, 30);
    }

    #[test]
    fn test_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "yaml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_public_base_url() {
        let mut config = Config::default();
        config.content.public_base_url = Some("not a url".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_backend_parse() {
        assert_eq!("Memory".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert_eq!("json".parse::<StorageBackend>().unwrap(), StorageBackend::Json);
        assert!("sqlite".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_from_toml_sections() {
        let config: Config = toml::from_str(
            r#"
            [server]
            bind_address = "127.0.0.1:9100"

            [storage]
            backend = "memory"

            [pipeline]
            max_concurrent_tasks = 4
            publish_policy = "any"

            [pipeline.ticker]
            interval_secs = 600

            [platforms.webhook]
            url = "https://hooks.example.com/posts"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind_address.port(), 9100);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.pipeline.max_concurrent_tasks, 4);
        assert_eq!(config.pipeline.publish_policy, PublishPolicy::Any);
        assert_eq!(config.pipeline.ticker.interval_secs, 600);
        assert!(config.platforms.webhook.is_some());
        assert!(config.platforms.facebook.is_none());
        assert_eq!(config.logging.format, "json");
        assert!(config.validate().is_ok());
    }
}
