use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};

use crate::csv_import::{self, CsvImportSummary};
use crate::db::Database;
use crate::error::TrackerError;
use crate::models::{
    ApiToken, DueTracker, ExportData, ImportSummary, NewCompletion, NewTracker,
    RecordedCompletion, Tracker, TrackerCalendarDay, TrackerCompletion, TrackerStats,
    UpdateTracker, validate_utc_offset,
};
use crate::schedule;

/// Setting key holding a user's default UTC offset in minutes.
pub const UTC_OFFSET_SETTING: &str = "utc_offset_minutes";

/// Source of the current instant.
///
/// The CLI and server use [`SystemClock`]; tests pin time with a fixed clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Ownership-checked operations over one planner database.
///
/// Every call names the acting user; trackers owned by someone else are
/// reported as [`TrackerError::Forbidden`].
pub struct PlannerService {
    db: Database,
    clock: Box<dyn Clock>,
}

impl PlannerService {
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Database::open(Path::new(db_path))?;
        Ok(Self::from_database(db))
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::from_database(db))
    }

    #[must_use]
    pub fn from_database(db: Database) -> Self {
        Self {
            db,
            clock: Box::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // --- Local dates ---

    pub fn default_utc_offset(&self, user_id: &str) -> Result<Option<i32>> {
        self.db
            .get_setting(user_id, UTC_OFFSET_SETTING)?
            .map(|v| {
                v.parse::<i32>()
                    .with_context(|| format!("Invalid stored utc offset '{v}'"))
            })
            .transpose()
    }

    pub fn set_default_utc_offset(&self, user_id: &str, minutes: Option<i32>) -> Result<()> {
        match minutes {
            Some(m) => {
                validate_utc_offset(m)?;
                self.db.set_setting(user_id, UTC_OFFSET_SETTING, &m.to_string())
            }
            None => self.db.delete_setting(user_id, UTC_OFFSET_SETTING).map(|_| ()),
        }
    }

    /// Today in the user's default zone, UTC when none is set.
    pub fn today(&self, user_id: &str) -> Result<NaiveDate> {
        let offset = self.default_utc_offset(user_id)?.unwrap_or(0);
        Ok(schedule::local_today(self.clock.now(), offset)?)
    }

    /// Today for `tracker`: its own offset, else the owner's default, else UTC.
    pub fn today_for(&self, tracker: &Tracker) -> Result<NaiveDate> {
        let offset = match tracker.utc_offset_minutes {
            Some(o) => o,
            None => self.default_utc_offset(&tracker.user_id)?.unwrap_or(0),
        };
        Ok(schedule::local_today(self.clock.now(), offset)?)
    }

    // --- Trackers ---

    fn owned_tracker(&self, user_id: &str, tracker_id: &str) -> Result<Tracker> {
        let tracker = self.db.get_tracker(tracker_id)?;
        if tracker.user_id != user_id {
            tracing::warn!(user_id, tracker_id, "access to another user's tracker refused");
            return Err(TrackerError::Forbidden.into());
        }
        Ok(tracker)
    }

    pub fn create_tracker(&self, user_id: &str, new: &NewTracker) -> Result<Tracker> {
        self.db.insert_tracker(user_id, new)
    }

    pub fn get_tracker(&self, user_id: &str, tracker_id: &str) -> Result<Tracker> {
        self.owned_tracker(user_id, tracker_id)
    }

    pub fn list_trackers(&self, user_id: &str, active: Option<bool>) -> Result<Vec<Tracker>> {
        self.db.list_trackers(user_id, active)
    }

    pub fn update_tracker(
        &self,
        user_id: &str,
        tracker_id: &str,
        update: &UpdateTracker,
    ) -> Result<Tracker> {
        let current = self.owned_tracker(user_id, tracker_id)?;
        let as_of = self.today_for(&update.apply_to(&current))?;
        self.db.update_tracker(tracker_id, update, as_of)
    }

    pub fn set_active(&self, user_id: &str, tracker_id: &str, active: bool) -> Result<Tracker> {
        self.update_tracker(
            user_id,
            tracker_id,
            &UpdateTracker {
                is_active: Some(active),
                ..UpdateTracker::default()
            },
        )
    }

    pub fn delete_tracker(&self, user_id: &str, tracker_id: &str) -> Result<()> {
        self.owned_tracker(user_id, tracker_id)?;
        self.db.delete_tracker(tracker_id)?;
        Ok(())
    }

    /// Rebuild a tracker's cached aggregates from its completion log.
    pub fn refresh_tracker(&self, user_id: &str, tracker_id: &str) -> Result<TrackerStats> {
        let tracker = self.owned_tracker(user_id, tracker_id)?;
        let as_of = self.today_for(&tracker)?;
        self.db.refresh_aggregates(tracker_id, as_of)
    }

    // --- Completions ---

    pub fn record_completion(
        &self,
        user_id: &str,
        completion: &NewCompletion,
    ) -> Result<RecordedCompletion> {
        let tracker = self.owned_tracker(user_id, &completion.tracker_id)?;
        let as_of = self.today_for(&tracker)?;
        self.db.record_completion(completion, as_of)
    }

    pub fn delete_completion(&self, user_id: &str, completion_id: &str) -> Result<TrackerStats> {
        let completion = self.db.get_completion(completion_id)?;
        let tracker = self.owned_tracker(user_id, &completion.tracker_id)?;
        let as_of = self.today_for(&tracker)?;
        self.db.delete_completion(completion_id, as_of)
    }

    /// Remove the completion recorded for `tracker_id` on `date`.
    pub fn undo_completion(
        &self,
        user_id: &str,
        tracker_id: &str,
        date: NaiveDate,
    ) -> Result<TrackerStats> {
        let tracker = self.owned_tracker(user_id, tracker_id)?;
        let completions = self.db.get_completions(tracker_id, Some(date), Some(date))?;
        let Some(completion) = completions.first() else {
            return Err(TrackerError::NotFound {
                entity: "Completion",
                id: format!("{tracker_id}@{date}"),
            }
            .into());
        };
        let as_of = self.today_for(&tracker)?;
        self.db.delete_completion(&completion.id, as_of)
    }

    pub fn list_completions(
        &self,
        user_id: &str,
        tracker_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<TrackerCompletion>> {
        self.owned_tracker(user_id, tracker_id)?;
        self.db.get_completions(tracker_id, from, to)
    }

    // --- Derived views ---

    /// Statistics as of `as_of`, defaulting to the tracker's local today.
    pub fn tracker_stats(
        &self,
        user_id: &str,
        tracker_id: &str,
        as_of: Option<NaiveDate>,
    ) -> Result<TrackerStats> {
        let tracker = self.owned_tracker(user_id, tracker_id)?;
        let as_of = match as_of {
            Some(d) => d,
            None => self.today_for(&tracker)?,
        };
        self.db.tracker_stats(&tracker, as_of)
    }

    pub fn tracker_calendar(
        &self,
        user_id: &str,
        tracker_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TrackerCalendarDay>> {
        let tracker = self.owned_tracker(user_id, tracker_id)?;
        let completions = self.db.get_completions(tracker_id, Some(from), Some(to))?;
        Ok(schedule::calendar(&tracker, &completions, from, to)?)
    }

    /// Active trackers scheduled on `date`. Without a date each tracker is
    /// checked against its own today.
    pub fn due_trackers(&self, user_id: &str, date: Option<NaiveDate>) -> Result<Vec<DueTracker>> {
        let mut due = Vec::new();
        for tracker in self.db.list_trackers(user_id, Some(true))? {
            let date = match date {
                Some(d) => d,
                None => self.today_for(&tracker)?,
            };
            if !schedule::is_scheduled(&tracker, date)? {
                continue;
            }
            let is_completed = self.db.has_completion(&tracker.id, date)?;
            due.push(DueTracker {
                tracker,
                date,
                is_completed,
            });
        }
        Ok(due)
    }

    // --- Import / Export ---

    pub fn import_completion_csv(
        &self,
        user_id: &str,
        tracker_id: &str,
        csv_data: &str,
        dry_run: bool,
    ) -> Result<CsvImportSummary> {
        let tracker = self.owned_tracker(user_id, tracker_id)?;
        let rows = csv_import::parse_completion_csv(csv_data.as_bytes())?;
        let as_of = self.today_for(&tracker)?;
        csv_import::import_completions(&self.db, &tracker, &rows, dry_run, as_of)
    }

    pub fn export(&self, user_id: &str) -> Result<ExportData> {
        self.db.export_user(user_id)
    }

    pub fn import(&self, user_id: &str, data: &ExportData) -> Result<ImportSummary> {
        let as_of = self.today(user_id)?;
        self.db.import_user(user_id, data, as_of)
    }

    // --- API tokens ---

    pub fn create_api_token(
        &self,
        user_id: &str,
        label: Option<&str>,
        token: &str,
    ) -> Result<ApiToken> {
        self.db.create_api_token(user_id, label, token)
    }

    pub fn list_api_tokens(&self, user_id: &str) -> Result<Vec<ApiToken>> {
        self.db.list_api_tokens(user_id)
    }

    pub fn revoke_api_token(&self, user_id: &str, id: i64) -> Result<bool> {
        self.db.revoke_api_token(user_id, id)
    }

    /// Resolve a bearer token to its user.
    pub fn authenticate(&self, token: &str) -> Result<String> {
        match self.db.user_for_token(token)? {
            Some(user) => Ok(user),
            None => Err(TrackerError::Unauthorized.into()),
        }
    }
}
