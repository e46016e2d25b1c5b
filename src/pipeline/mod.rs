//! Schedule → generate → publish pipeline
//!
//! - [`stages`] - The three batch stages over campaigns and tasks
//! - [`guard`] - Prevents overlapping runs of the same stage
//! - [`orchestrator`] - Entry point shared by the CLI, the HTTP API and the ticker
//! - [`ticker`] - In-process periodic trigger
//!
//! Every stage run produces a [`StageReport`] with one [`TaskOutcome`] per
//! task it touched. A failing task never aborts the batch.

pub mod guard;
pub mod orchestrator;
pub mod stages;
pub mod ticker;

pub use guard::{GuardError, RunGuard, RunPermit, StageState, StageStatus};
pub use orchestrator::Orchestrator;
pub use stages::PipelineContext;
pub use ticker::{PipelineTicker, TickerConfig};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::campaign::StageOffsets;
use crate::error::Error;
use crate::platforms::PublishResult;
use crate::task::{CampaignTask, Stage, TaskStatus};

// ============================================================================
// Configuration
// ============================================================================

/// When a partially successful fan-out counts as published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishPolicy {
    /// Every channel must have acknowledged the post, across runs
    #[default]
    All,
    /// One acknowledging channel is enough
    Any,
}

/// Pipeline tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Days beyond the lead time that tasks are created ahead
    pub schedule_horizon_days: u32,

    /// Days inside the horizon that content is generated ahead
    pub generation_window_days: u32,

    /// Tasks processed concurrently within one stage run
    pub max_concurrent_tasks: usize,

    pub publish_policy: PublishPolicy,

    pub ticker: TickerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let offsets = StageOffsets::default();
        Self {
            schedule_horizon_days: offsets.schedule_horizon_days,
            generation_window_days: offsets.generation_window_days,
            max_concurrent_tasks: 1,
            publish_policy: PublishPolicy::All,
            ticker: TickerConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn offsets(&self) -> StageOffsets {
        StageOffsets {
            schedule_horizon_days: self.schedule_horizon_days,
            generation_window_days: self.generation_window_days,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.offsets().validate()?;

        if self.max_concurrent_tasks == 0 {
            return Err(Error::config("pipeline.max_concurrent_tasks must be at least 1"));
        }

        self.ticker.validate()
    }
}

// ============================================================================
// Reports
// ============================================================================

/// What happened to one task in a stage run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Task moved to the stage's target status
    Advanced,
    /// Attempt failed; the failure is recorded on the task
    Failed,
    /// Someone else changed the task first; nothing written
    Conflict,
}

/// Per-task result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub campaign_id: String,
    pub status: OutcomeStatus,
    /// Task status after the attempt
    pub task_status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishResult>,
}

impl TaskOutcome {
    fn from_task(task: &CampaignTask, status: OutcomeStatus) -> Self {
        Self {
            task_id: task.id.clone(),
            campaign_id: task.campaign_id.clone(),
            status,
            task_status: task.status,
            message: None,
            publish: None,
        }
    }

    pub fn advanced(task: &CampaignTask) -> Self {
        Self::from_task(task, OutcomeStatus::Advanced)
    }

    pub fn failed(task: &CampaignTask, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::from_task(task, OutcomeStatus::Failed)
        }
    }

    pub fn conflict(task: &CampaignTask) -> Self {
        Self {
            message: Some("task was modified concurrently".to_string()),
            ..Self::from_task(task, OutcomeStatus::Conflict)
        }
    }

    pub fn with_publish(mut self, result: PublishResult) -> Self {
        self.publish = Some(result);
        self
    }
}

/// Summary of one stage invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    /// Correlates the report with the stage's log lines
    pub run_id: Uuid,
    pub stage: Stage,
    /// The guard refused to start the stage
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub advanced: usize,
    pub failed: usize,
    pub conflicts: usize,
    pub outcomes: Vec<TaskOutcome>,
}

impl StageReport {
    pub fn completed(
        stage: Stage,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        mut outcomes: Vec<TaskOutcome>,
    ) -> Self {
        // Workers finish in any order
        outcomes.sort_by(|a, b| a.task_id.cmp(&b.task_id));

        let count = |status| outcomes.iter().filter(|o| o.status == status).count();
        Self {
            run_id: Uuid::new_v4(),
            stage,
            skipped: false,
            skip_reason: None,
            started_at,
            finished_at,
            advanced: count(OutcomeStatus::Advanced),
            failed: count(OutcomeStatus::Failed),
            conflicts: count(OutcomeStatus::Conflict),
            outcomes,
        }
    }

    pub fn skipped(stage: Stage, reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            stage,
            skipped: true,
            skip_reason: Some(reason.into()),
            started_at: at,
            finished_at: at,
            advanced: 0,
            failed: 0,
            conflicts: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }
}
