//! In-process periodic trigger
//!
//! Runs the configured stages in order every `interval_secs`. Deployments
//! that prefer OS cron can call the HTTP endpoints instead and leave the
//! ticker off.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify, RwLock};
use tokio::time::MissedTickBehavior;

use crate::error::{Error, Result};
use crate::task::Stage;

use super::orchestrator::Orchestrator;
use super::StageReport;

// ============================================================================
// Ticker Configuration
// ============================================================================

/// Configuration for the pipeline ticker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickerConfig {
    /// Seconds between ticks
    pub interval_secs: u64,

    /// Run a tick as soon as the loop starts
    pub run_on_startup: bool,

    /// Stages run on each tick, in this order
    pub stages: Vec<Stage>,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            run_on_startup: true,
            stages: Stage::ALL.to_vec(),
        }
    }
}

impl TickerConfig {
    /// Create a new config builder
    pub fn builder() -> TickerConfigBuilder {
        TickerConfigBuilder::default()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(Error::config("pipeline.ticker.interval_secs must be positive"));
        }

        if self.stages.is_empty() {
            return Err(Error::config("pipeline.ticker.stages cannot be empty"));
        }

        let mut seen = self.stages.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != self.stages.len() {
            return Err(Error::config("pipeline.ticker.stages lists a stage twice"));
        }

        Ok(())
    }
}

/// Builder for TickerConfig
#[derive(Debug, Default)]
pub struct TickerConfigBuilder {
    interval_secs: Option<u64>,
    run_on_startup: Option<bool>,
    stages: Option<Vec<Stage>>,
}

impl TickerConfigBuilder {
    pub fn interval_secs(mut self, secs: u64) -> Self {
        self.interval_secs = Some(secs);
        self
    }

    pub fn run_on_startup(mut self, value: bool) -> Self {
        self.run_on_startup = Some(value);
        self
    }

    pub fn stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.stages = Some(stages.into_iter().collect());
        self
    }

    /// Build the config
    pub fn build(self) -> Result<TickerConfig> {
        let defaults = TickerConfig::default();
        let config = TickerConfig {
            interval_secs: self.interval_secs.unwrap_or(defaults.interval_secs),
            run_on_startup: self.run_on_startup.unwrap_or(defaults.run_on_startup),
            stages: self.stages.unwrap_or(defaults.stages),
        };
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Ticker Events
// ============================================================================

/// Events emitted by the ticker
#[derive(Debug, Clone)]
pub enum TickEvent {
    /// All configured stages ran
    TickCompleted {
        tick: u64,
        reports: Vec<StageReport>,
        triggered_at: DateTime<Utc>,
    },

    /// A stage aborted before producing a report
    StageFailed {
        tick: u64,
        stage: Stage,
        error: String,
    },
}

// ============================================================================
// Pipeline Ticker
// ============================================================================

/// Periodic driver for the orchestrator
pub struct PipelineTicker {
    config: TickerConfig,
    orchestrator: Arc<Orchestrator>,
    event_sender: broadcast::Sender<TickEvent>,
    is_running: Arc<RwLock<bool>>,
    stop_signal: Arc<Notify>,
}

impl PipelineTicker {
    pub fn new(config: TickerConfig, orchestrator: Arc<Orchestrator>) -> Result<Self> {
        config.validate()?;

        let (event_sender, _) = broadcast::channel(100);

        Ok(Self {
            config,
            orchestrator,
            event_sender,
            is_running: Arc::new(RwLock::new(false)),
            stop_signal: Arc::new(Notify::new()),
        })
    }

    /// Subscribe to tick events
    pub fn subscribe(&self) -> broadcast::Receiver<TickEvent> {
        self.event_sender.subscribe()
    }

    pub fn config(&self) -> &TickerConfig {
        &self.config
    }

    /// Start the tick loop (runs until stopped)
    pub async fn start(&self) -> Result<()> {
        *self.is_running.write().await = true;
        tracing::info!(
            interval_secs = self.config.interval_secs,
            stages = ?self.config.stages,
            "Ticker started"
        );

        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // The first tick completes immediately
        if !self.config.run_on_startup {
            interval.tick().await;
        }

        let mut tick = 0u64;
        while *self.is_running.read().await {
            tokio::select! {
                _ = interval.tick() => {
                    tick += 1;
                    self.tick(tick).await;
                }
                _ = self.stop_signal.notified() => {
                    break;
                }
            }
        }

        *self.is_running.write().await = false;
        tracing::info!(ticks = tick, "Ticker stopped");
        Ok(())
    }

    /// Stop the tick loop; an in-flight tick finishes first
    pub async fn stop(&self) {
        *self.is_running.write().await = false;
        self.stop_signal.notify_one();
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Run every configured stage once
    ///
    /// A stage that aborts is reported and the remaining stages still run.
    pub async fn tick(&self, tick: u64) -> Vec<StageReport> {
        let triggered_at = self.orchestrator.context().now();
        let mut reports = Vec::with_capacity(self.config.stages.len());

        for &stage in &self.config.stages {
            match self.orchestrator.run_stage(stage).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::error!(tick, stage = %stage, error = %e, "Stage failed during tick");
                    let _ = self.event_sender.send(TickEvent::StageFailed {
                        tick,
                        stage,
                        error: e.to_string(),
                    });
                }
            }
        }

        let _ = self.event_sender.send(TickEvent::TickCompleted {
            tick,
            reports: reports.clone(),
            triggered_at,
        });
        reports
    }
}

// ============================================================================
// Tests
// ============================================================================
