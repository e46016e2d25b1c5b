//! Concurrent publish to several platforms
//!
//! [`PlatformFanout::publish`] calls every requested adapter at once and
//! waits for all of them. One platform failing never stops the others.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::mpsc;

use super::{PlatformError, PlatformId, PublishOutcome, PublishResult, SharedAdapter};
use crate::content::GeneratedPost;
use crate::metrics;

/// Progress notifications emitted while publishing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PublishEvent {
    PlatformSucceeded {
        content_hash: String,
        platform: PlatformId,
        remote_id: Option<String>,
        url: Option<String>,
    },
    PlatformFailed {
        content_hash: String,
        platform: PlatformId,
        error: String,
    },
    BatchCompleted {
        content_hash: String,
        successful: Vec<PlatformId>,
        failed: Vec<PlatformId>,
    },
}

/// Registry of adapters keyed by platform
#[derive(Clone, Default)]
pub struct PlatformFanout {
    adapters: BTreeMap<PlatformId, SharedAdapter>,
    events: Option<mpsc::UnboundedSender<PublishEvent>>,
}

impl PlatformFanout {
    /// Later adapters replace earlier ones for the same platform
    pub fn new(adapters: impl IntoIterator<Item = SharedAdapter>) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|adapter| (adapter.platform(), adapter))
            .collect();
        Self {
            adapters,
            events: None,
        }
    }

    /// Send [`PublishEvent`]s to `sender`
    pub fn with_events(mut self, sender: mpsc::UnboundedSender<PublishEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Configured platforms
    pub fn platforms(&self) -> BTreeSet<PlatformId> {
        self.adapters.keys().copied().collect()
    }

    pub fn adapter(&self, platform: PlatformId) -> Option<&SharedAdapter> {
        self.adapters.get(&platform)
    }

    fn emit(&self, event: PublishEvent) {
        if let Some(sender) = &self.events {
            // A dropped receiver only means nobody is listening
            let _ = sender.send(event);
        }
    }

    /// Publish `post` to every platform in `channels`
    #[tracing::instrument(skip(self, post), fields(content_hash = %post.content_hash))]
    pub async fn publish(&self, post: &GeneratedPost, channels: &BTreeSet<PlatformId>) -> PublishResult {
        let calls = channels.iter().map(|&platform| async move {
            let outcome = self.publish_one(platform, post).await;
            metrics::record_platform_publish(platform.as_str(), outcome.success, outcome.attempts);

            self.emit(if outcome.success {
                PublishEvent::PlatformSucceeded {
                    content_hash: post.content_hash.clone(),
                    platform,
                    remote_id: outcome.remote_id.clone(),
                    url: outcome.url.clone(),
                }
            } else {
                PublishEvent::PlatformFailed {
                    content_hash: post.content_hash.clone(),
                    platform,
                    error: outcome.error.clone().unwrap_or_default(),
                }
            });

            outcome
        });

        let result = PublishResult::from_outcomes(futures::future::join_all(calls).await);

        tracing::info!(
            successful = result.successful_platforms.len(),
            failed = result.failed_platforms.len(),
            "Fan-out completed"
        );
        self.emit(PublishEvent::BatchCompleted {
            content_hash: post.content_hash.clone(),
            successful: result.successful_platforms.clone(),
            failed: result.failed_platforms.clone(),
        });

        result
    }

    async fn publish_one(&self, platform: PlatformId, post: &GeneratedPost) -> PublishOutcome {
        let Some(adapter) = self.adapters.get(&platform) else {
            tracing::warn!(platform = %platform, "No adapter configured");
            return PublishOutcome::failure(platform, PlatformError::NotConfigured(platform).to_string(), 0);
        };

        let deadline = adapter.deadline(post);
        match tokio::time::timeout(deadline, adapter.publish(post)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(platform = %platform, ?deadline, "Publish exceeded its deadline");
                PublishOutcome::failure(platform, PlatformError::Timeout(deadline).to_string(), 0)
            }
        }
    }
}

impl std::fmt::Debug for PlatformFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformFanout")
            .field("platforms", &self.platforms())
            .field("events", &self.events.is_some())
            .finish()
    }
}
