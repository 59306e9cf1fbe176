use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// Longest span a single calendar request may cover.
pub const MAX_CALENDAR_DAYS: i64 = 366;

/// Largest accepted UTC offset, in minutes (UTC-18:00 .. UTC+18:00).
pub const MAX_UTC_OFFSET_MINUTES: i32 = 18 * 60;

pub const FREQUENCY_NAMES: &[&str] = &[
    "once",
    "daily",
    "every_x_days",
    "weekly",
    "monthly",
    "custom",
];

/// Tag of a tracker's schedule rule, as it appears on the wire and in SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyKind {
    Once,
    Daily,
    EveryXDays,
    Weekly,
    Monthly,
    Custom,
}

impl FrequencyKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Daily => "daily",
            Self::EveryXDays => "every_x_days",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Result<Self, TrackerError> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "once" => Ok(Self::Once),
            "daily" => Ok(Self::Daily),
            "every_x_days" => Ok(Self::EveryXDays),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "custom" => Ok(Self::Custom),
            _ => Err(TrackerError::invalid(format!(
                "unknown frequency '{s}'. Must be one of: {}",
                FREQUENCY_NAMES.join(", ")
            ))),
        }
    }
}

impl fmt::Display for FrequencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracker's schedule rule. Each variant carries only the data it uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FrequencyFields", into = "FrequencyFields")]
pub enum Frequency {
    Once,
    Daily,
    EveryXDays { interval: u32 },
    /// Weekday indices, 0 = Sunday .. 6 = Saturday.
    Weekly { days: BTreeSet<u8> },
    /// Same day-of-month as the start date, clamped to the month's last day.
    Monthly,
    /// Explicit caller-provided dates.
    Custom { dates: BTreeSet<NaiveDate> },
}

impl Frequency {
    #[must_use]
    pub fn kind(&self) -> FrequencyKind {
        match self {
            Self::Once => FrequencyKind::Once,
            Self::Daily => FrequencyKind::Daily,
            Self::EveryXDays { .. } => FrequencyKind::EveryXDays,
            Self::Weekly { .. } => FrequencyKind::Weekly,
            Self::Monthly => FrequencyKind::Monthly,
            Self::Custom { .. } => FrequencyKind::Custom,
        }
    }

    pub fn validate(&self) -> Result<(), TrackerError> {
        match self {
            Self::EveryXDays { interval } if *interval < 1 => Err(TrackerError::invalid(
                "frequency_value must be at least 1 for every_x_days",
            )),
            Self::Weekly { days } => match days.iter().find(|d| **d > 6) {
                Some(bad) => Err(TrackerError::invalid(format!(
                    "target_days must be weekday indices 0 (Sunday) to 6 (Saturday), got {bad}"
                ))),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    /// Build a rule from the flat wire fields, rejecting malformed parameters.
    ///
    /// Fields that do not belong to the chosen tag are ignored.
    pub fn from_fields(fields: &FrequencyFields) -> Result<Self, TrackerError> {
        let frequency = match fields.frequency {
            FrequencyKind::Once => Self::Once,
            FrequencyKind::Daily => Self::Daily,
            FrequencyKind::Monthly => Self::Monthly,
            FrequencyKind::EveryXDays => {
                let value = fields.frequency_value.ok_or_else(|| {
                    TrackerError::invalid("frequency_value is required for every_x_days")
                })?;
                let interval = u32::try_from(value).ok().filter(|v| *v >= 1).ok_or_else(|| {
                    TrackerError::invalid(format!(
                        "frequency_value must be at least 1 for every_x_days, got {value}"
                    ))
                })?;
                Self::EveryXDays { interval }
            }
            FrequencyKind::Weekly => {
                let mut days = BTreeSet::new();
                for &day in fields.target_days.as_deref().unwrap_or_default() {
                    let idx = u8::try_from(day).ok().filter(|d| *d <= 6).ok_or_else(|| {
                        TrackerError::invalid(format!(
                            "target_days must be weekday indices 0 (Sunday) to 6 (Saturday), got {day}"
                        ))
                    })?;
                    days.insert(idx);
                }
                Self::Weekly { days }
            }
            FrequencyKind::Custom => {
                let dates = fields.custom_dates.as_deref().ok_or_else(|| {
                    TrackerError::invalid("custom_dates is required for custom")
                })?;
                Self::Custom {
                    dates: dates.iter().copied().collect(),
                }
            }
        };
        frequency.validate()?;
        Ok(frequency)
    }
}

/// Flat representation of [`Frequency`] used on the wire and in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyFields {
    pub frequency: FrequencyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_days: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_dates: Option<Vec<NaiveDate>>,
}

impl From<Frequency> for FrequencyFields {
    fn from(frequency: Frequency) -> Self {
        let kind = frequency.kind();
        let mut fields = FrequencyFields {
            frequency: kind,
            frequency_value: None,
            target_days: None,
            custom_dates: None,
        };
        match frequency {
            Frequency::EveryXDays { interval } => fields.frequency_value = Some(interval.into()),
            Frequency::Weekly { days } => {
                fields.target_days = Some(days.into_iter().map(i64::from).collect());
            }
            Frequency::Custom { dates } => fields.custom_dates = Some(dates.into_iter().collect()),
            Frequency::Once | Frequency::Daily | Frequency::Monthly => {}
        }
        fields
    }
}

impl TryFrom<FrequencyFields> for Frequency {
    type Error = TrackerError;

    fn try_from(fields: FrequencyFields) -> Result<Self, Self::Error> {
        Self::from_fields(&fields)
    }
}

/// A habit definition.
///
/// `total_completions`, `current_streak` and `best_streak` are a cache of
/// values derived from the completion log; they are rewritten by the
/// database layer on every completion write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracker {
    pub id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(flatten)]
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,
    #[serde(default)]
    pub total_completions: u32,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub best_streak: u32,
    pub is_active: bool,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerCompletion {
    pub id: String,
    pub tracker_id: String,
    pub completion_date: NaiveDate,
    pub completed_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Derived statistics for one tracker as of a reference date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    pub tracker_id: String,
    pub total_completions: u32,
    pub current_streak: u32,
    pub best_streak: u32,
    /// Percentage of scheduled dates completed, rounded, 0..=100.
    pub completion_rate: u32,
    pub last_completion_date: Option<NaiveDate>,
    pub next_scheduled_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerCalendarDay {
    pub date: NaiveDate,
    pub is_scheduled: bool,
    pub is_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<TrackerCompletion>,
}

/// A tracker scheduled on a given day, for "due today" lists.
#[derive(Debug, Clone, Serialize)]
pub struct DueTracker {
    pub tracker: Tracker,
    pub date: NaiveDate,
    pub is_completed: bool,
}

#[derive(Debug, Clone)]
pub struct NewTracker {
    pub project_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub utc_offset_minutes: Option<i32>,
    pub is_active: bool,
}

impl NewTracker {
    /// A daily tracker starting on `start_date` with no optional fields set.
    #[must_use]
    pub fn daily(title: &str, start_date: NaiveDate) -> Self {
        Self {
            project_id: None,
            title: title.to_string(),
            description: None,
            category: None,
            icon: None,
            color: None,
            frequency: Frequency::Daily,
            start_date,
            end_date: None,
            utc_offset_minutes: None,
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
#[allow(clippy::option_option)]
pub struct UpdateTracker {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub category: Option<Option<String>>,
    pub icon: Option<Option<String>>,
    pub color: Option<Option<String>>,
    pub project_id: Option<Option<String>>,
    pub frequency: Option<Frequency>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<Option<NaiveDate>>,
    pub utc_offset_minutes: Option<Option<i32>>,
    pub is_active: Option<bool>,
}

impl UpdateTracker {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.icon.is_none()
            && self.color.is_none()
            && self.project_id.is_none()
            && self.frequency.is_none()
            && self.start_date.is_none()
            && self.end_date.is_none()
            && self.utc_offset_minutes.is_none()
            && self.is_active.is_none()
    }

    /// Whether applying this update can change which dates are scheduled.
    #[must_use]
    pub fn touches_schedule(&self) -> bool {
        self.frequency.is_some()
            || self.start_date.is_some()
            || self.end_date.is_some()
            || self.is_active.is_some()
    }

    /// Apply the update to a copy of `tracker`, for validation before writing.
    #[must_use]
    pub fn apply_to(&self, tracker: &Tracker) -> Tracker {
        let mut t = tracker.clone();
        if let Some(title) = &self.title {
            t.title.clone_from(title);
        }
        if let Some(v) = &self.description {
            t.description.clone_from(v);
        }
        if let Some(v) = &self.category {
            t.category.clone_from(v);
        }
        if let Some(v) = &self.icon {
            t.icon.clone_from(v);
        }
        if let Some(v) = &self.color {
            t.color.clone_from(v);
        }
        if let Some(v) = &self.project_id {
            t.project_id.clone_from(v);
        }
        if let Some(f) = &self.frequency {
            t.frequency = f.clone();
        }
        if let Some(d) = self.start_date {
            t.start_date = d;
        }
        if let Some(d) = self.end_date {
            t.end_date = d;
        }
        if let Some(o) = self.utc_offset_minutes {
            t.utc_offset_minutes = o;
        }
        if let Some(a) = self.is_active {
            t.is_active = a;
        }
        t
    }
}

#[derive(Debug, Clone)]
pub struct NewCompletion {
    pub tracker_id: String,
    pub completion_date: NaiveDate,
    pub notes: Option<String>,
}

/// A completion write together with the refreshed statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedCompletion {
    pub completion: TrackerCompletion,
    pub stats: TrackerStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiToken {
    pub id: i64,
    pub user_id: String,
    pub label: Option<String>,
    /// First characters of the token, for recognising it in listings.
    pub prefix: String,
    pub created_at: String,
}

// --- Export / Import types ---

pub const EXPORT_VERSION: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportData {
    pub version: i64,
    pub exported_at: String,
    pub user_id: String,
    pub trackers: Vec<Tracker>,
    pub completions: Vec<TrackerCompletion>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportSummary {
    pub trackers_imported: usize,
    pub completions_imported: usize,
    pub completions_skipped: usize,
}

// --- Validation ---

pub fn validate_title(title: &str) -> Result<String, TrackerError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(TrackerError::invalid("title must not be empty"));
    }
    Ok(trimmed.to_string())
}

pub fn validate_date_range(start: NaiveDate, end: Option<NaiveDate>) -> Result<(), TrackerError> {
    match end {
        Some(end) if end < start => Err(TrackerError::invalid(format!(
            "end_date {end} is before start_date {start}"
        ))),
        _ => Ok(()),
    }
}

pub fn validate_utc_offset(minutes: i32) -> Result<(), TrackerError> {
    if minutes.abs() > MAX_UTC_OFFSET_MINUTES {
        return Err(TrackerError::invalid(format!(
            "utc_offset_minutes must be between -{MAX_UTC_OFFSET_MINUTES} and {MAX_UTC_OFFSET_MINUTES}, got {minutes}"
        )));
    }
    Ok(())
}

/// Validate a tracker definition before it is persisted.
pub fn validate_tracker_config(
    title: &str,
    frequency: &Frequency,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    utc_offset_minutes: Option<i32>,
) -> Result<(), TrackerError> {
    validate_title(title)?;
    frequency.validate()?;
    validate_date_range(start_date, end_date)?;
    if let Some(offset) = utc_offset_minutes {
        validate_utc_offset(offset)?;
    }
    Ok(())
}

pub fn validate_new_tracker(tracker: &NewTracker) -> Result<(), TrackerError> {
    validate_tracker_config(
        &tracker.title,
        &tracker.frequency,
        tracker.start_date,
        tracker.end_date,
        tracker.utc_offset_minutes,
    )
}

pub fn validate_tracker(tracker: &Tracker) -> Result<(), TrackerError> {
    validate_tracker_config(
        &tracker.title,
        &tracker.frequency,
        tracker.start_date,
        tracker.end_date,
        tracker.utc_offset_minutes,
    )
}

/// Parse a `YYYY-MM-DD` date, reporting the offending input on failure.
pub fn parse_iso_date(s: &str) -> Result<NaiveDate, TrackerError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| TrackerError::invalid(format!("Invalid date '{s}'. Use YYYY-MM-DD")))
}
