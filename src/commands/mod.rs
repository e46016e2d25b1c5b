//! CLI command implementations

pub mod campaign;
pub mod pipeline;
pub mod serve;

pub use campaign::{create_campaign, delete_campaign, list_campaigns, show_campaign};
pub use pipeline::{generate, publish, run_ticker, schedule};
pub use serve::serve;

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use herald::config::Config;
use herald::metrics;
use herald::pipeline::Orchestrator;
use herald::platforms::PublishEvent;

/// Build the orchestrator with metrics and a publish event logger
pub async fn build_orchestrator(config: &Config) -> Result<Arc<Orchestrator>> {
    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics disabled");
    }

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(log_publish_events(events_rx));

    let orchestrator = Orchestrator::from_config(config, Some(events_tx))
        .await
        .context("Failed to build pipeline")?;
    Ok(Arc::new(orchestrator))
}

async fn log_publish_events(mut events: mpsc::UnboundedReceiver<PublishEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            PublishEvent::PlatformSucceeded {
                content_hash,
                platform,
                remote_id,
                url,
            } => tracing::info!(
                %platform,
                content_hash = %content_hash,
                remote_id = ?remote_id,
                url = ?url,
                "Post delivered"
            ),
            PublishEvent::PlatformFailed {
                content_hash,
                platform,
                error,
            } => tracing::warn!(%platform, content_hash = %content_hash, error = %error, "Post rejected"),
            PublishEvent::BatchCompleted {
                content_hash,
                successful,
                failed,
            } => tracing::debug!(
                content_hash = %content_hash,
                successful = ?successful,
                failed = ?failed,
                "Fan-out finished"
            ),
        }
    }
}

/// Print a value as pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
