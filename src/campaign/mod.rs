//! Campaign model and calendar arithmetic
//!
//! A campaign owns a start instant, an optional recurrence and a lead time in
//! days. The [`Timeline`] view turns a pipeline [`Stage`] into a lead offset
//! and then into a concrete due date per occurrence:
//!
//! | stage    | lead offset                              |
//! |----------|------------------------------------------|
//! | schedule | `lead_days + horizon`                    |
//! | generate | `lead_days + horizon - generation_window`|
//! | publish  | `lead_days`                              |
//!
//! Due dates are calendar dates in the campaign's timezone.

pub mod db;
pub mod recurrence;

pub use recurrence::{Frequency, RecurrenceEvaluator, RecurrenceSpec, WeekdayCode};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::platforms::PlatformId;
use crate::task::Stage;

/// Largest accepted lead time
pub const MAX_LEAD_DAYS: u32 = 365;

lazy_static! {
    static ref CAMPAIGN_ID_RE: Regex =
        Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("Invalid regex pattern");
}

// ============================================================================
// Errors
// ============================================================================

/// Campaign validation and lookup errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CampaignError {
    /// A field failed validation
    #[error("Invalid campaign field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// Recurrence rule is malformed
    #[error("Invalid recurrence: {0}")]
    InvalidRecurrence(String),

    /// Unknown campaign id
    #[error("Campaign '{0}' not found")]
    NotFound(String),

    /// Campaign id already taken
    #[error("Campaign '{0}' already exists")]
    AlreadyExists(String),
}

impl CampaignError {
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_recurrence(reason: impl Into<String>) -> Self {
        Self::InvalidRecurrence(reason.into())
    }
}

// ============================================================================
// Stage Offsets
// ============================================================================

/// Calendar distances between the pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageOffsets {
    /// Days ahead of the publish date that tasks are created
    pub schedule_horizon_days: u32,

    /// Days before the end of the horizon that content is generated
    pub generation_window_days: u32,
}

impl Default for StageOffsets {
    fn default() -> Self {
        Self {
            schedule_horizon_days: 30,
            generation_window_days: 15,
        }
    }
}

impl StageOffsets {
    /// Generation must happen at or after scheduling
    pub fn validate(&self) -> Result<(), CampaignError> {
        if self.generation_window_days > self.schedule_horizon_days {
            return Err(CampaignError::invalid_field(
                "generation_window_days",
                format!(
                    "must not exceed schedule_horizon_days ({})",
                    self.schedule_horizon_days
                ),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Campaign
// ============================================================================

fn default_timezone() -> Tz {
    Tz::UTC
}

fn default_active() -> bool {
    true
}

/// A one-time or recurring marketing campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    /// Stable slug
    pub id: String,

    pub name: String,

    /// Prompt seed for content generation
    #[serde(default)]
    pub theme: String,

    /// First occurrence
    pub start: DateTime<Utc>,

    #[serde(default)]
    pub end: Option<DateTime<Utc>>,

    /// Timezone used for calendar dates and recurrence expansion
    #[serde(default = "default_timezone")]
    pub timezone: Tz,

    /// Platforms to publish on
    #[serde(default)]
    pub channels: BTreeSet<PlatformId>,

    /// Days before each occurrence that posts start
    #[serde(default)]
    pub lead_days: u32,

    /// Absent for one-time campaigns
    #[serde(default)]
    pub recurrence: Option<RecurrenceSpec>,

    #[serde(default = "default_active")]
    pub active: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }

    /// Check every field before the campaign is stored
    pub fn validate(&self) -> Result<(), CampaignError> {
        if !CAMPAIGN_ID_RE.is_match(&self.id) {
            return Err(CampaignError::invalid_field(
                "id",
                format!("'{}' must match [a-z0-9][a-z0-9_-]*", self.id),
            ));
        }

        if self.name.trim().is_empty() {
            return Err(CampaignError::invalid_field("name", "must not be empty"));
        }

        if self.channels.is_empty() {
            return Err(CampaignError::invalid_field(
                "channels",
                "at least one platform is required",
            ));
        }

        if self.lead_days > MAX_LEAD_DAYS {
            return Err(CampaignError::invalid_field(
                "lead_days",
                format!("must be at most {MAX_LEAD_DAYS}"),
            ));
        }

        if let Some(end) = self.end {
            if end < self.start {
                return Err(CampaignError::invalid_field("end", "must not precede start"));
            }
        }

        if let Some(spec) = &self.recurrence {
            spec.validate()?;
        }

        Ok(())
    }

    /// Calendar view using the given stage offsets
    pub fn timeline(&self, offsets: StageOffsets) -> Timeline<'_> {
        Timeline {
            campaign: self,
            offsets,
        }
    }

    /// Recurrence evaluator in the campaign's timezone
    pub fn evaluator(&self) -> RecurrenceEvaluator<'_> {
        RecurrenceEvaluator::new(self.start, self.recurrence.as_ref()).in_timezone(self.timezone)
    }

    /// Local calendar date of an instant
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.timezone).date_naive()
    }
}

/// Request body for creating or replacing a campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignInput {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub theme: String,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
    #[serde(default)]
    pub channels: BTreeSet<PlatformId>,
    #[serde(default)]
    pub lead_days: u32,
    #[serde(default)]
    pub recurrence: Option<RecurrenceSpec>,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl CampaignInput {
    /// Build a new campaign stamped with `now`
    pub fn into_campaign(self, now: DateTime<Utc>) -> Campaign {
        Campaign {
            id: self.id,
            name: self.name,
            theme: self.theme,
            start: self.start,
            end: self.end,
            timezone: self.timezone,
            channels: self.channels,
            lead_days: self.lead_days,
            recurrence: self.recurrence,
            active: self.active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the mutable fields of `existing`, keeping id and creation time
    pub fn apply_to(self, existing: &Campaign, now: DateTime<Utc>) -> Campaign {
        let mut updated = self.into_campaign(now);
        updated.id = existing.id.clone();
        updated.created_at = existing.created_at;
        updated
    }
}

// ============================================================================
// Timeline
// ============================================================================

/// Stage-aware calendar view of a campaign
#[derive(Debug, Clone, Copy)]
pub struct Timeline<'a> {
    campaign: &'a Campaign,
    offsets: StageOffsets,
}

impl Timeline<'_> {
    /// Days before an occurrence that `stage` acts
    pub fn lead_offset_for(&self, stage: Stage) -> i64 {
        let lead = i64::from(self.campaign.lead_days);
        let horizon = i64::from(self.offsets.schedule_horizon_days);
        let window = i64::from(self.offsets.generation_window_days);

        match stage {
            Stage::Schedule => lead + horizon,
            Stage::Generate => lead + horizon - window,
            Stage::Publish => lead,
        }
    }

    /// Local date on which `stage` becomes due for an occurrence
    pub fn due_date_for(&self, stage: Stage, occurrence: DateTime<Utc>) -> NaiveDate {
        let date = self.campaign.local_date(occurrence);
        date.checked_sub_signed(Duration::days(self.lead_offset_for(stage)))
            .unwrap_or(NaiveDate::MIN)
    }

    /// Whether `stage` is due on `today` for the campaign as a whole
    ///
    /// One-time campaigns stay due once the due date has passed. Recurring
    /// campaigns are due when `today` projected forward by the stage offset
    /// lands on an occurrence. The stages judge each task's occurrence with
    /// [`Timeline::is_due_for_occurrence`] instead, so a missed day catches up.
    pub fn is_due(&self, stage: Stage, today: NaiveDate) -> bool {
        if self.campaign.is_recurring() {
            today
                .checked_add_signed(Duration::days(self.lead_offset_for(stage)))
                .is_some_and(|projected| self.campaign.evaluator().occurs_on(projected))
        } else {
            today >= self.due_date_for(stage, self.campaign.start)
        }
    }

    /// Whether `stage` is due on `today` for one known occurrence
    pub fn is_due_for_occurrence(
        &self,
        stage: Stage,
        occurrence: DateTime<Utc>,
        today: NaiveDate,
    ) -> bool {
        today >= self.due_date_for(stage, occurrence)
    }

    /// Active flag set and the end date not yet passed
    pub fn is_active(&self, today: NaiveDate) -> bool {
        self.campaign.active
            && self
                .campaign
                .end
                .map_or(true, |end| today <= self.campaign.local_date(end))
    }

    /// Occurrences that need tasks on `today`
    ///
    /// One-time campaigns yield their start once due and until it has
    /// passed. Recurring campaigns yield every occurrence whose local date
    /// falls within the scheduling horizon.
    pub fn occurrences_to_schedule(&self, today: NaiveDate) -> Vec<DateTime<Utc>> {
        let start = self.campaign.start;

        if !self.campaign.is_recurring() {
            let upcoming = today <= self.campaign.local_date(start);
            return if upcoming && self.is_due(Stage::Schedule, today) {
                vec![start]
            } else {
                Vec::new()
            };
        }

        let Some(horizon_end) =
            today.checked_add_signed(Duration::days(self.lead_offset_for(Stage::Schedule)))
        else {
            return Vec::new();
        };

        let campaign = self.campaign;
        campaign
            .evaluator()
            .iter()
            .map(|occ| (occ, campaign.local_date(occ)))
            .skip_while(|(_, date)| *date < today)
            .take_while(|(_, date)| *date <= horizon_end)
            .filter(|(occ, _)| campaign.end.map_or(true, |end| *occ <= end))
            .map(|(occ, _)| occ)
            .collect()
    }
}
