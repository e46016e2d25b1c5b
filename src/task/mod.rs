//! Campaign task state machine
//!
//! A [`CampaignTask`] is the unit of work the pipeline moves through
//! `Pending → Scheduled → Generated → Published`. Transitions are strictly
//! linear: each target state is only reachable from the state immediately
//! before it, and a rejected transition leaves the task untouched.
//!
//! Task ids are deterministic so that scheduling the same slot twice always
//! lands on the same record:
//!
//! - one-time campaign: `{campaign_id}:d-{lead}`
//! - recurring campaign: `{campaign_id}@{YYYY-MM-DD}:d-{lead}`

pub mod db;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::platforms::PlatformId;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by the task state machine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Requested status is not the direct successor of the current one
    #[error("Invalid transition for task '{task_id}': {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Unknown stage name
    #[error("Unknown stage '{0}'. Valid options: schedule, generate, publish")]
    UnknownStage(String),
}

// ============================================================================
// Status and Stage
// ============================================================================

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Scheduled,
    Generated,
    Published,
}

impl TaskStatus {
    /// Status a task must be in to move to `self`
    pub fn predecessor(&self) -> Option<TaskStatus> {
        match self {
            Self::Pending => None,
            Self::Scheduled => Some(Self::Pending),
            Self::Generated => Some(Self::Scheduled),
            Self::Published => Some(Self::Generated),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Published)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Generated => "generated",
            Self::Published => "published",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage identity
///
/// Each stage moves tasks into one status and owns one lead offset on the
/// campaign calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Schedule,
    Generate,
    Publish,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Schedule, Stage::Generate, Stage::Publish];

    /// Status a task reaches when this stage succeeds
    pub fn target_status(&self) -> TaskStatus {
        match self {
            Self::Schedule => TaskStatus::Scheduled,
            Self::Generate => TaskStatus::Generated,
            Self::Publish => TaskStatus::Published,
        }
    }

    /// Status a task must be in for this stage to pick it up
    pub fn required_status(&self) -> TaskStatus {
        match self {
            Self::Schedule => TaskStatus::Pending,
            Self::Generate => TaskStatus::Scheduled,
            Self::Publish => TaskStatus::Generated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Generate => "generate",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "schedule" | "scheduled" => Ok(Self::Schedule),
            "generate" | "generated" => Ok(Self::Generate),
            "publish" | "published" => Ok(Self::Publish),
            other => Err(TaskError::UnknownStage(other.to_string())),
        }
    }
}

// ============================================================================
// Failure Record
// ============================================================================

/// Structured description of the last failed attempt on a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Stage that failed
    pub stage: Stage,

    /// Machine-readable code
    pub code: String,

    /// Human-readable message
    pub message: String,

    /// Platforms that rejected the post (publish stage)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_platforms: Vec<PlatformFailure>,

    /// When the failure was recorded
    pub at: DateTime<Utc>,
}

/// One platform's failure inside a publish attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformFailure {
    pub platform: PlatformId,
    pub error: String,
}

impl TaskFailure {
    pub fn new(
        stage: Stage,
        code: impl Into<String>,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            stage,
            code: code.into(),
            message: message.into(),
            failed_platforms: Vec::new(),
            at,
        }
    }

    pub fn with_platforms(mut self, failures: Vec<PlatformFailure>) -> Self {
        self.failed_platforms = failures;
        self
    }
}

// ============================================================================
// Campaign Task
// ============================================================================

/// Unit of work for one campaign occurrence at one lead offset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignTask {
    /// Deterministic composite id
    pub id: String,

    /// Owning campaign
    pub campaign_id: String,

    /// Days before the occurrence this task represents
    pub lead: u32,

    /// Occurrence instant this task serves
    pub occurrence: DateTime<Utc>,

    /// Current status
    pub status: TaskStatus,

    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,

    /// Folder holding the generated post
    #[serde(default)]
    pub content_folder: Option<String>,

    /// Last recorded failure, cleared by the next successful transition
    #[serde(default)]
    pub last_error: Option<TaskFailure>,

    /// Platforms that have acknowledged the post
    #[serde(default)]
    pub published_platforms: BTreeSet<PlatformId>,
}

impl CampaignTask {
    /// Compose the task id for a slot
    ///
    /// `occurrence_date` is only set for recurring campaigns.
    pub fn compose_id(campaign_id: &str, occurrence_date: Option<NaiveDate>, lead: u32) -> String {
        match occurrence_date {
            Some(date) => format!("{campaign_id}@{}:d-{lead}", date.format("%Y-%m-%d")),
            None => format!("{campaign_id}:d-{lead}"),
        }
    }

    /// New pending task
    pub fn new(
        campaign_id: impl Into<String>,
        occurrence: DateTime<Utc>,
        occurrence_date: Option<NaiveDate>,
        lead: u32,
    ) -> Self {
        let campaign_id = campaign_id.into();
        Self {
            id: Self::compose_id(&campaign_id, occurrence_date, lead),
            campaign_id,
            lead,
            occurrence,
            status: TaskStatus::Pending,
            scheduled_at: None,
            generated_at: None,
            published_at: None,
            content_folder: None,
            last_error: None,
            published_platforms: BTreeSet::new(),
        }
    }

    /// Whether `target` is the direct successor of the current status
    pub fn can_advance_to(&self, target: TaskStatus) -> bool {
        target.predecessor() == Some(self.status)
    }

    /// Eligibility for a stage is the same as eligibility to advance
    pub fn is_due_for(&self, target: TaskStatus) -> bool {
        self.can_advance_to(target)
    }

    fn advance(&mut self, target: TaskStatus) -> Result<(), TaskError> {
        if !self.can_advance_to(target) {
            return Err(TaskError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                to: target,
            });
        }

        self.status = target;
        self.last_error = None;
        Ok(())
    }

    pub fn mark_scheduled(&mut self, at: DateTime<Utc>) -> Result<(), TaskError> {
        self.advance(TaskStatus::Scheduled)?;
        self.scheduled_at = Some(at);
        Ok(())
    }

    pub fn mark_generated(
        &mut self,
        content_folder: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<(), TaskError> {
        self.advance(TaskStatus::Generated)?;
        self.generated_at = Some(at);
        self.content_folder = Some(content_folder.into());
        Ok(())
    }

    pub fn mark_published(&mut self, at: DateTime<Utc>) -> Result<(), TaskError> {
        self.advance(TaskStatus::Published)?;
        self.published_at = Some(at);
        Ok(())
    }

    /// Record a failed attempt without touching the status
    pub fn record_failure(&mut self, failure: TaskFailure) {
        self.last_error = Some(failure);
    }

    /// Remember platforms that accepted the post
    pub fn record_published_platforms(&mut self, platforms: impl IntoIterator<Item = PlatformId>) {
        self.published_platforms.extend(platforms);
    }

    /// Channels still waiting for a successful delivery
    pub fn pending_channels(&self, channels: &BTreeSet<PlatformId>) -> BTreeSet<PlatformId> {
        channels
            .difference(&self.published_platforms)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 9, 0, 0).unwrap()
    }

    fn task() -> CampaignTask {
        CampaignTask::new("launch", at(10), None, 7)
    }

    #[test]
    fn test_compose_id() {
        assert_eq!(CampaignTask::compose_id("launch", None, 7), "launch:d-7");
        assert_eq!(
            CampaignTask::compose_id("weekly", NaiveDate::from_ymd_opt(2025, 3, 12), 0),
            "weekly@2025-03-12:d-0"
        );
        assert_eq!(task().id, "launch:d-7");
    }

    #[test]
    fn test_linear_transitions() {
        let mut task = task();
        assert_eq!(task.status, TaskStatus::Pending);

        task.mark_scheduled(at(1)).unwrap();
        task.mark_generated("launch/launch-d-7/20250302-090000", at(2)).unwrap();
        task.mark_published(at(3)).unwrap();

        assert_eq!(task.status, TaskStatus::Published);
        assert_eq!(task.scheduled_at, Some(at(1)));
        assert_eq!(task.generated_at, Some(at(2)));
        assert_eq!(task.published_at, Some(at(3)));
        assert!(task.status.is_terminal());
    }

    #[test]
    fn test_skip_rejected_and_status_unchanged() {
        let mut task = task();
        let err = task.mark_generated("folder", at(2)).unwrap_err();

        assert!(matches!(
            err,
            TaskError::InvalidTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::Generated,
                ..
            }
        ));
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.generated_at.is_none());
        assert!(task.content_folder.is_none());
    }

    #[test]
    fn test_second_mark_is_rejected() {
        let mut task = task();
        task.mark_scheduled(at(1)).unwrap();

        assert!(task.mark_scheduled(at(5)).is_err());
        assert_eq!(task.scheduled_at, Some(at(1)));
    }

    #[test]
    fn test_backward_rejected() {
        let mut task = task();
        task.mark_scheduled(at(1)).unwrap();
        task.mark_generated("folder", at(2)).unwrap();

        assert!(!task.can_advance_to(TaskStatus::Scheduled));
        assert!(!task.can_advance_to(TaskStatus::Pending));
        assert!(task.is_due_for(TaskStatus::Published));
    }

    #[test]
    fn test_failure_cleared_on_success() {
        let mut task = task();
        task.mark_scheduled(at(1)).unwrap();
        task.record_failure(TaskFailure::new(Stage::Generate, "llm_error", "timeout", at(2)));

        assert_eq!(task.status, TaskStatus::Scheduled);
        assert!(task.last_error.is_some());

        task.mark_generated("folder", at(3)).unwrap();
        assert!(task.last_error.is_none());
    }

    #[test]
    fn test_pending_channels() {
        let mut task = task();
        let channels: BTreeSet<_> = [PlatformId::Facebook, PlatformId::Linkedin].into();
        task.record_published_platforms([PlatformId::Facebook]);

        let pending = task.pending_channels(&channels);
        assert_eq!(pending.into_iter().collect::<Vec<_>>(), vec![PlatformId::Linkedin]);
    }

    #[test]
    fn test_stage_parsing() {
        assert_eq!("publish".parse::<Stage>().unwrap(), Stage::Publish);
        assert_eq!("Generated".parse::<Stage>().unwrap(), Stage::Generate);
        assert!("deploy".parse::<Stage>().is_err());
        assert_eq!(Stage::Generate.required_status(), TaskStatus::Scheduled);
        assert_eq!(Stage::Generate.target_status(), TaskStatus::Generated);
    }
}
