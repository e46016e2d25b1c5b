//! Common test utilities
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use herald::campaign::CampaignInput;
use herald::clock::FixedClock;
use herald::content::{ContentStore, GeneratedPost, MediaResolver, PromptBuilder};
use herald::llm::{ContentGenerator, LlmError};
use herald::pipeline::{Orchestrator, PipelineConfig, PipelineContext, PublishPolicy};
use herald::platforms::{
    AdapterSettings, Delivery, PlatformAdapter, PlatformError, PlatformFanout, PlatformId,
    PlatformResult, SharedAdapter,
};
use herald::storage::{create_memory_store, SharedStore};

/// UTC instant from calendar fields
pub fn utc(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap()
}

/// The one-time `launch` campaign: 2025-03-10T09:00Z, lead 7
pub fn launch_campaign(channels: impl IntoIterator<Item = PlatformId>) -> CampaignInput {
    CampaignInput {
        id: "launch".to_string(),
        name: "Spring launch".to_string(),
        theme: "New product line".to_string(),
        start: utc(2025, 3, 10, 9),
        end: None,
        timezone: chrono_tz::Tz::UTC,
        channels: channels.into_iter().collect(),
        lead_days: 7,
        recurrence: None,
        active: true,
    }
}

// ============================================================================
// Stub Generator
// ============================================================================

/// Generator returning a fixed JSON post
pub struct StubGenerator {
    delay: Duration,
    fail: bool,
    calls: AtomicU32,
}

impl StubGenerator {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            fail: false,
            calls: AtomicU32::new(0),
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentGenerator for StubGenerator {
    async fn complete(&self, prompt: &str, _system_prompt: &str) -> Result<String, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(LlmError::EmptyResponse);
        }
        assert!(!prompt.is_empty());

        Ok(format!(
            r#"{{"caption": "Countdown post {call}", "body": "Something new is coming.", "hashtags": ["launch", "spring"]}}"#
        ))
    }
}

// ============================================================================
// Stub Adapter
// ============================================================================

/// Adapter that always succeeds or always fails
pub struct StubAdapter {
    platform: PlatformId,
    settings: AdapterSettings,
    fail: bool,
    calls: AtomicU32,
}

impl StubAdapter {
    pub fn ok(platform: PlatformId) -> Arc<Self> {
        Arc::new(Self::build(platform, false))
    }

    pub fn failing(platform: PlatformId) -> Arc<Self> {
        Arc::new(Self::build(platform, true))
    }

    fn build(platform: PlatformId, fail: bool) -> Self {
        let mut settings = AdapterSettings::default().with_max_retries(0);
        settings.retry_base_delay_ms = 1;
        Self {
            platform,
            settings,
            fail,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformAdapter for StubAdapter {
    fn platform(&self) -> PlatformId {
        self.platform
    }

    fn settings(&self) -> &AdapterSettings {
        &self.settings
    }

    async fn send(&self, post: &GeneratedPost) -> PlatformResult<Delivery> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PlatformError::Rejected(format!("{} is down", self.platform)));
        }
        Ok(Delivery::new(format!("{}-{call}", &post.content_hash[..8])))
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Orchestrator over an in-memory store, a fixed clock and stubs
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub clock: Arc<FixedClock>,
    pub store: SharedStore,
    pub generator: Arc<StubGenerator>,
    _content_dir: TempDir,
}

pub struct HarnessBuilder {
    now: DateTime<Utc>,
    adapters: Vec<SharedAdapter>,
    generator: StubGenerator,
    policy: PublishPolicy,
    max_concurrent_tasks: usize,
}

impl Harness {
    pub fn builder(now: DateTime<Utc>) -> HarnessBuilder {
        HarnessBuilder {
            now,
            adapters: Vec::new(),
            generator: StubGenerator::new(),
            policy: PublishPolicy::All,
            max_concurrent_tasks: 1,
        }
    }

    pub fn configured_platforms(&self) -> BTreeSet<PlatformId> {
        self.orchestrator.context().fanout.platforms()
    }
}

impl HarnessBuilder {
    pub fn adapter(mut self, adapter: SharedAdapter) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn generator(mut self, generator: StubGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn policy(mut self, policy: PublishPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn max_concurrent_tasks(mut self, n: usize) -> Self {
        self.max_concurrent_tasks = n;
        self
    }

    pub fn build(self) -> Harness {
        let content_dir = TempDir::new().unwrap();
        let clock = Arc::new(FixedClock::new(self.now));
        let store = create_memory_store();
        let generator = Arc::new(self.generator);

        let config = PipelineConfig {
            publish_policy: self.policy,
            max_concurrent_tasks: self.max_concurrent_tasks,
            ..PipelineConfig::default()
        };

        let ctx = PipelineContext {
            store: store.clone(),
            clock: clock.clone(),
            generator: generator.clone(),
            prompts: PromptBuilder::new().unwrap(),
            system_prompt: "You write social posts.".to_string(),
            content: ContentStore::new(content_dir.path()).unwrap(),
            media: MediaResolver::new(Some("https://cdn.example.com/assets")).unwrap(),
            fanout: PlatformFanout::new(self.adapters),
            config,
        };

        Harness {
            orchestrator: Arc::new(Orchestrator::new(ctx)),
            clock,
            store,
            generator,
            _content_dir: content_dir,
        }
    }
}
