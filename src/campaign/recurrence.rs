//! Recurrence rule evaluation
//!
//! A campaign's occurrences are produced by expanding its [`RecurrenceSpec`]
//! from the start instant. Expansion happens on wall-clock dates in the
//! campaign's timezone, so a 09:00 Berlin campaign stays at 09:00 local time
//! across daylight-saving changes, and every produced instant is converted
//! back to UTC. Comparisons are therefore made on resolved instants, never on
//! formatted strings.
//!
//! Semantics follow the usual RRULE conventions:
//!
//! - `interval` selects every Nth period (day, week, month, year)
//! - `by_day` picks weekdays inside each selected week (weekly rules only)
//! - the start instant is only an occurrence when it matches the rule
//! - monthly and yearly rules skip periods where the start day does not exist
//! - `count` caps the number of produced occurrences, `until` bounds them

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use super::CampaignError;

/// Upper bound on expanded periods, protects against unbounded scans
const MAX_PERIODS: u32 = 100_000;

/// Largest accepted `interval`
pub const MAX_INTERVAL: u32 = 1_000;

// ============================================================================
// Rule Types
// ============================================================================

/// Period unit of a recurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two-letter weekday code (`MO`..`SU`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WeekdayCode {
    Mo,
    Tu,
    We,
    Th,
    Fr,
    Sa,
    Su,
}

impl WeekdayCode {
    /// All codes in calendar order
    pub const ALL: [WeekdayCode; 7] = [
        Self::Mo,
        Self::Tu,
        Self::We,
        Self::Th,
        Self::Fr,
        Self::Sa,
        Self::Su,
    ];

    pub fn weekday(self) -> Weekday {
        match self {
            Self::Mo => Weekday::Mon,
            Self::Tu => Weekday::Tue,
            Self::We => Weekday::Wed,
            Self::Th => Weekday::Thu,
            Self::Fr => Weekday::Fri,
            Self::Sa => Weekday::Sat,
            Self::Su => Weekday::Sun,
        }
    }

    pub fn from_weekday(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => Self::Mo,
            Weekday::Tue => Self::Tu,
            Weekday::Wed => Self::We,
            Weekday::Thu => Self::Th,
            Weekday::Fri => Self::Fr,
            Weekday::Sat => Self::Sa,
            Weekday::Sun => Self::Su,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mo => "MO",
            Self::Tu => "TU",
            Self::We => "WE",
            Self::Th => "TH",
            Self::Fr => "FR",
            Self::Sa => "SA",
            Self::Su => "SU",
        }
    }
}

impl fmt::Display for WeekdayCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WeekdayCode {
    type Err = CampaignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|code| code.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CampaignError::invalid_recurrence(format!("unknown weekday code '{s}'")))
    }
}

fn default_interval() -> u32 {
    1
}

/// Recurrence rule attached to a campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceSpec {
    /// Period unit
    pub frequency: Frequency,

    /// Every Nth period (>= 1)
    #[serde(default = "default_interval")]
    pub interval: u32,

    /// Weekdays inside each selected week (weekly rules only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_day: Option<BTreeSet<WeekdayCode>>,

    /// Maximum number of occurrences
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,

    /// Last instant an occurrence may fall on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}

impl RecurrenceSpec {
    /// Unbounded rule firing every period
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            interval: 1,
            by_day: None,
            count: None,
            until: None,
        }
    }

    pub fn every(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    pub fn on_days(mut self, days: impl IntoIterator<Item = WeekdayCode>) -> Self {
        self.by_day = Some(days.into_iter().collect());
        self
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Check the rule is well formed
    ///
    /// `count` and `until` together are rejected rather than silently
    /// preferring one of them.
    pub fn validate(&self) -> Result<(), CampaignError> {
        if self.interval == 0 {
            return Err(CampaignError::invalid_recurrence("interval must be at least 1"));
        }

        if self.interval > MAX_INTERVAL {
            return Err(CampaignError::invalid_recurrence(format!(
                "interval must be at most {MAX_INTERVAL}"
            )));
        }

        if self.count.is_some() && self.until.is_some() {
            return Err(CampaignError::invalid_recurrence(
                "count and until are mutually exclusive",
            ));
        }

        if self.count == Some(0) {
            return Err(CampaignError::invalid_recurrence("count must be at least 1"));
        }

        if matches!(&self.by_day, Some(days) if days.is_empty()) {
            return Err(CampaignError::invalid_recurrence("by_day must not be empty"));
        }

        Ok(())
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Expands a start instant and optional rule into occurrences
#[derive(Debug, Clone, Copy)]
pub struct RecurrenceEvaluator<'a> {
    start: DateTime<Utc>,
    spec: Option<&'a RecurrenceSpec>,
    tz: Tz,
}

impl<'a> RecurrenceEvaluator<'a> {
    /// Evaluate in UTC
    pub fn new(start: DateTime<Utc>, spec: Option<&'a RecurrenceSpec>) -> Self {
        Self {
            start,
            spec,
            tz: Tz::UTC,
        }
    }

    /// Expand wall-clock dates in `tz`
    pub fn in_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    /// Iterate occurrences in ascending order
    pub fn iter(&self) -> Occurrences<'a> {
        let local = self.start.with_timezone(&self.tz);
        Occurrences {
            start: self.start,
            spec: self.spec,
            tz: self.tz,
            anchor: local.date_naive(),
            time: local.time(),
            period: 0,
            emitted: 0,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    /// Occurrences within a range, sorted ascending
    ///
    /// With `inclusive` the bounds themselves qualify, otherwise the range is
    /// open on both ends.
    pub fn occurrences_between(
        &self,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
        inclusive: bool,
    ) -> Vec<DateTime<Utc>> {
        if range_end < range_start {
            return Vec::new();
        }

        self.iter()
            .take_while(|occ| *occ <= range_end)
            .filter(|occ| {
                if inclusive {
                    *occ >= range_start
                } else {
                    *occ > range_start && *occ < range_end
                }
            })
            .collect()
    }

    /// Whether `candidate` is exactly one of the occurrences
    pub fn is_occurrence(&self, candidate: DateTime<Utc>) -> bool {
        self.iter()
            .take_while(|occ| *occ <= candidate)
            .any(|occ| occ == candidate)
    }

    /// The occurrence falling on a local calendar date, if any
    pub fn occurrence_on(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let tz = self.tz;
        self.iter()
            .map(|occ| (occ, occ.with_timezone(&tz).date_naive()))
            .take_while(|(_, local)| *local <= date)
            .find(|(_, local)| *local == date)
            .map(|(occ, _)| occ)
    }

    /// Whether any occurrence falls on a local calendar date
    pub fn occurs_on(&self, date: NaiveDate) -> bool {
        self.occurrence_on(date).is_some()
    }
}

/// Iterator over occurrences, see [`RecurrenceEvaluator::iter`]
#[derive(Debug, Clone)]
pub struct Occurrences<'a> {
    start: DateTime<Utc>,
    spec: Option<&'a RecurrenceSpec>,
    tz: Tz,
    anchor: NaiveDate,
    time: NaiveTime,
    period: u32,
    emitted: u32,
    buffer: VecDeque<DateTime<Utc>>,
    done: bool,
}

impl Occurrences<'_> {
    /// Candidate local dates for one period
    ///
    /// `None` once the period lies outside the representable calendar.
    fn period_dates(&self, spec: &RecurrenceSpec, period: u32) -> Option<Vec<NaiveDate>> {
        let step = i64::from(period).checked_mul(i64::from(spec.interval.max(1)))?;

        let dates = match spec.frequency {
            Frequency::Daily => vec![self.anchor.checked_add_signed(Duration::try_days(step)?)?],
            Frequency::Weekly => {
                let offset = i64::from(self.anchor.weekday().num_days_from_monday());
                let week_start = self
                    .anchor
                    .checked_sub_signed(Duration::days(offset))?
                    .checked_add_signed(Duration::try_weeks(step)?)?;

                match &spec.by_day {
                    Some(days) if !days.is_empty() => days
                        .iter()
                        .filter_map(|day| {
                            let delta = i64::from(day.weekday().num_days_from_monday());
                            week_start.checked_add_signed(Duration::days(delta))
                        })
                        .collect(),
                    _ => vec![week_start.checked_add_signed(Duration::days(offset))?],
                }
            }
            Frequency::Monthly => vec![shift_months(self.anchor, step)?],
            Frequency::Yearly => vec![shift_months(self.anchor, step.checked_mul(12)?)?],
        };
        Some(dates)
    }

    /// Map a local date at the start's wall-clock time to an instant
    ///
    /// Ambiguous times take the earlier instant; times inside a DST gap are
    /// pushed forward by one hour.
    fn resolve(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let local = date.and_time(self.time);
        self.tz
            .from_local_datetime(&local)
            .earliest()
            .or_else(|| {
                local
                    .checked_add_signed(Duration::hours(1))
                    .and_then(|shifted| self.tz.from_local_datetime(&shifted).earliest())
            })
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl Iterator for Occurrences<'_> {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let Some(spec) = self.spec else {
            self.done = true;
            return Some(self.start);
        };

        loop {
            if let Some(occ) = self.buffer.pop_front() {
                let capped = spec.count.is_some_and(|count| self.emitted >= count);
                let expired = spec.until.is_some_and(|until| occ > until);
                if capped || expired {
                    self.done = true;
                    return None;
                }

                self.emitted += 1;
                return Some(occ);
            }

            if self.period >= MAX_PERIODS {
                self.done = true;
                return None;
            }

            let dates = match spec.frequency {
                // A missing day-of-month skips the period, later ones may exist
                Frequency::Monthly | Frequency::Yearly => {
                    self.period_dates(spec, self.period).unwrap_or_default()
                }
                _ => match self.period_dates(spec, self.period) {
                    Some(dates) => dates,
                    None => {
                        self.done = true;
                        return None;
                    }
                },
            };
            self.period += 1;

            for date in dates {
                if let Some(occ) = self.resolve(date) {
                    if occ >= self.start {
                        self.buffer.push_back(occ);
                    }
                }
            }
        }
    }
}

/// Same day-of-month `months` later, `None` when that day does not exist
fn shift_months(date: NaiveDate, months: i64) -> Option<NaiveDate> {
    let total = i64::from(date.year()) * 12 + i64::from(date.month0()) + months;
    let year = i32::try_from(total.div_euclid(12)).ok()?;
    let month = u32::try_from(total.rem_euclid(12)).ok()? + 1;
    NaiveDate::from_ymd_opt(year, month, date.day())
}

// ============================================================================
// Tests
// ============================================================================
