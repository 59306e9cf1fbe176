use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::TrackerError;
use crate::models::{
    ApiToken, EXPORT_VERSION, ExportData, Frequency, FrequencyFields, FrequencyKind,
    ImportSummary, NewCompletion, NewTracker, RecordedCompletion, Tracker, TrackerCompletion,
    TrackerStats, UpdateTracker, validate_new_tracker, validate_title, validate_tracker,
};
use crate::schedule;

const TRACKER_COLUMNS: &str = "id, user_id, project_id, title, description, category, icon, color,
    frequency, frequency_value, target_days, custom_dates, start_date, end_date,
    utc_offset_minutes, total_completions, current_streak, best_streak, is_active,
    created_at, updated_at";

const COMPLETION_COLUMNS: &str = "id, tracker_id, completion_date, completed_at, notes";

/// Number of leading token characters kept in clear for listings.
const TOKEN_PREFIX_LEN: usize = 8;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS trackers (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    project_id TEXT,
                    title TEXT NOT NULL,
                    description TEXT,
                    category TEXT,
                    icon TEXT,
                    color TEXT,
                    frequency TEXT NOT NULL,
                    frequency_value INTEGER,
                    target_days TEXT,
                    custom_dates TEXT,
                    start_date TEXT NOT NULL,
                    end_date TEXT,
                    utc_offset_minutes INTEGER,
                    total_completions INTEGER NOT NULL DEFAULT 0,
                    current_streak INTEGER NOT NULL DEFAULT 0,
                    best_streak INTEGER NOT NULL DEFAULT 0,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS tracker_completions (
                    id TEXT PRIMARY KEY,
                    tracker_id TEXT NOT NULL REFERENCES trackers(id) ON DELETE CASCADE,
                    completion_date TEXT NOT NULL,
                    completed_at TEXT NOT NULL,
                    notes TEXT,
                    UNIQUE (tracker_id, completion_date)
                );

                CREATE INDEX IF NOT EXISTS idx_trackers_user ON trackers(user_id);
                CREATE INDEX IF NOT EXISTS idx_completions_tracker_date
                    ON tracker_completions(tracker_id, completion_date);

                CREATE TABLE IF NOT EXISTS user_settings (
                    user_id TEXT NOT NULL,
                    key TEXT NOT NULL,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, key)
                );

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS api_tokens (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL,
                    label TEXT,
                    prefix TEXT NOT NULL,
                    token_hash TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_api_tokens_user ON api_tokens(user_id);

                PRAGMA user_version = 2;",
            )?;
        }

        Ok(())
    }

    // --- Trackers ---

    pub fn insert_tracker(&self, user_id: &str, new: &NewTracker) -> Result<Tracker> {
        validate_new_tracker(new)?;
        let now = Utc::now().to_rfc3339();
        let tracker = Tracker {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            project_id: new.project_id.clone(),
            title: validate_title(&new.title)?,
            description: new.description.clone(),
            category: new.category.clone(),
            icon: new.icon.clone(),
            color: new.color.clone(),
            frequency: new.frequency.clone(),
            start_date: new.start_date,
            end_date: new.end_date,
            utc_offset_minutes: new.utc_offset_minutes,
            total_completions: 0,
            current_streak: 0,
            best_streak: 0,
            is_active: new.is_active,
            created_at: now.clone(),
            updated_at: now,
        };
        insert_tracker_row(&self.conn, &tracker)?;
        tracing::info!(tracker_id = %tracker.id, user_id, frequency = %tracker.frequency.kind(), "created tracker");
        self.get_tracker(&tracker.id)
    }

    pub fn get_tracker(&self, id: &str) -> Result<Tracker> {
        fetch_tracker(&self.conn, id)
    }

    /// Trackers owned by `user_id`, oldest first. `active` filters on `is_active`.
    pub fn list_trackers(&self, user_id: &str, active: Option<bool>) -> Result<Vec<Tracker>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TRACKER_COLUMNS} FROM trackers
             WHERE user_id = ?1 AND (?2 IS NULL OR is_active = ?2)
             ORDER BY created_at, rowid"
        ))?;
        let trackers = stmt
            .query_map(params![user_id, active], tracker_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(trackers)
    }

    /// Apply `update` to a tracker. Aggregates are recomputed as of `as_of`
    /// when the change can move the schedule.
    pub fn update_tracker(
        &self,
        id: &str,
        update: &UpdateTracker,
        as_of: NaiveDate,
    ) -> Result<Tracker> {
        let tx = self.conn.unchecked_transaction()?;
        let current = fetch_tracker(&tx, id)?;
        if update.is_empty() {
            return Ok(current);
        }

        let mut updated = update.apply_to(&current);
        updated.title = validate_title(&updated.title)?;
        validate_tracker(&updated)?;
        updated.updated_at = Utc::now().to_rfc3339();
        update_tracker_row(&tx, &updated)?;

        if update.touches_schedule() {
            refresh_in(&tx, &updated, as_of)?;
        }
        tx.commit()?;
        tracing::info!(tracker_id = id, "updated tracker");
        self.get_tracker(id)
    }

    /// Delete a tracker and its completion log. Returns false if it did not exist.
    pub fn delete_tracker(&self, id: &str) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let completions = tx.execute(
            "DELETE FROM tracker_completions WHERE tracker_id = ?1",
            params![id],
        )?;
        let rows = tx.execute("DELETE FROM trackers WHERE id = ?1", params![id])?;
        tx.commit()?;
        if rows > 0 {
            tracing::info!(tracker_id = id, completions, "deleted tracker");
        }
        Ok(rows > 0)
    }

    // --- Completions ---

    pub fn get_completion(&self, id: &str) -> Result<TrackerCompletion> {
        let completion = self
            .conn
            .query_row(
                &format!("SELECT {COMPLETION_COLUMNS} FROM tracker_completions WHERE id = ?1"),
                params![id],
                completion_from_row,
            )
            .optional()?;
        match completion {
            Some(c) => Ok(c),
            None => Err(TrackerError::completion_not_found(id).into()),
        }
    }

    /// Completions of one tracker, ascending by date, optionally bounded (inclusive).
    pub fn get_completions(
        &self,
        tracker_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<TrackerCompletion>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COMPLETION_COLUMNS} FROM tracker_completions
             WHERE tracker_id = ?1
               AND (?2 IS NULL OR completion_date >= ?2)
               AND (?3 IS NULL OR completion_date <= ?3)
             ORDER BY completion_date"
        ))?;
        let completions = stmt
            .query_map(params![tracker_id, from, to], completion_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(completions)
    }

    pub fn completion_dates(&self, tracker_id: &str) -> Result<Vec<NaiveDate>> {
        load_dates(&self.conn, tracker_id)
    }

    pub fn has_completion(&self, tracker_id: &str, date: NaiveDate) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tracker_completions WHERE tracker_id = ?1 AND completion_date = ?2",
            params![tracker_id, date],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Record a completion and refresh the tracker's cached aggregates in one
    /// transaction. A second completion on the same date replaces
    /// `completed_at` and, when given, `notes`.
    pub fn record_completion(
        &self,
        completion: &NewCompletion,
        as_of: NaiveDate,
    ) -> Result<RecordedCompletion> {
        let tx = self.conn.unchecked_transaction()?;
        let tracker = fetch_tracker(&tx, &completion.tracker_id)?;
        let saved = upsert_completion(&tx, completion)?;
        let stats = refresh_in(&tx, &tracker, as_of)?;
        tx.commit()?;
        tracing::info!(
            tracker_id = %tracker.id,
            date = %saved.completion_date,
            current_streak = stats.current_streak,
            "recorded completion"
        );
        Ok(RecordedCompletion {
            completion: saved,
            stats,
        })
    }

    /// Insert many completions for one tracker, skipping dates already
    /// recorded, then refresh aggregates once. Returns the rows inserted and
    /// the refreshed statistics.
    pub fn insert_completions(
        &self,
        tracker_id: &str,
        entries: &[(NaiveDate, Option<String>)],
        as_of: NaiveDate,
    ) -> Result<(usize, TrackerStats)> {
        let tx = self.conn.unchecked_transaction()?;
        let tracker = fetch_tracker(&tx, tracker_id)?;
        let now = Utc::now().to_rfc3339();
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO tracker_completions (id, tracker_id, completion_date, completed_at, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(tracker_id, completion_date) DO NOTHING",
            )?;
            for (date, notes) in entries {
                inserted += stmt.execute(params![
                    Uuid::new_v4().to_string(),
                    tracker_id,
                    date,
                    now,
                    notes,
                ])?;
            }
        }
        let stats = refresh_in(&tx, &tracker, as_of)?;
        tx.commit()?;
        tracing::info!(tracker_id, inserted, "bulk inserted completions");
        Ok((inserted, stats))
    }

    /// Remove a completion and refresh its tracker's aggregates.
    pub fn delete_completion(&self, id: &str, as_of: NaiveDate) -> Result<TrackerStats> {
        let tx = self.conn.unchecked_transaction()?;
        let tracker_id: Option<String> = tx
            .query_row(
                "SELECT tracker_id FROM tracker_completions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(tracker_id) = tracker_id else {
            return Err(TrackerError::completion_not_found(id).into());
        };
        tx.execute("DELETE FROM tracker_completions WHERE id = ?1", params![id])?;
        let tracker = fetch_tracker(&tx, &tracker_id)?;
        let stats = refresh_in(&tx, &tracker, as_of)?;
        tx.commit()?;
        tracing::info!(tracker_id = %tracker_id, completion_id = id, "deleted completion");
        Ok(stats)
    }

    /// Recompute a tracker's cached aggregates from its full completion log.
    pub fn refresh_aggregates(&self, tracker_id: &str, as_of: NaiveDate) -> Result<TrackerStats> {
        let tx = self.conn.unchecked_transaction()?;
        let tracker = fetch_tracker(&tx, tracker_id)?;
        let stats = refresh_in(&tx, &tracker, as_of)?;
        tx.commit()?;
        Ok(stats)
    }

    /// Statistics computed from the completion log without touching the cache.
    pub fn tracker_stats(&self, tracker: &Tracker, as_of: NaiveDate) -> Result<TrackerStats> {
        let dates = load_dates(&self.conn, &tracker.id)?;
        Ok(schedule::compute_stats(tracker, &dates, as_of)?)
    }

    // --- User Settings ---

    pub fn set_setting(&self, user_id: &str, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO user_settings (user_id, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![user_id, key, value, now],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, user_id: &str, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM user_settings WHERE user_id = ?1 AND key = ?2",
                params![user_id, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn delete_setting(&self, user_id: &str, key: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM user_settings WHERE user_id = ?1 AND key = ?2",
            params![user_id, key],
        )?;
        Ok(rows > 0)
    }

    // --- API tokens ---

    /// Store a bearer token for `user_id`. Only its SHA-256 hash is kept.
    pub fn create_api_token(
        &self,
        user_id: &str,
        label: Option<&str>,
        token: &str,
    ) -> Result<ApiToken> {
        if token.len() < TOKEN_PREFIX_LEN * 2 {
            bail!("API token is too short");
        }
        let now = Utc::now().to_rfc3339();
        let prefix: String = token.chars().take(TOKEN_PREFIX_LEN).collect();
        self.conn
            .execute(
                "INSERT INTO api_tokens (user_id, label, prefix, token_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![user_id, label, prefix, hash_token(token), now],
            )
            .context("Failed to store API token")?;
        let id = self.conn.last_insert_rowid();
        Ok(ApiToken {
            id,
            user_id: user_id.to_string(),
            label: label.map(str::to_string),
            prefix,
            created_at: now,
        })
    }

    pub fn list_api_tokens(&self, user_id: &str) -> Result<Vec<ApiToken>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, label, prefix, created_at FROM api_tokens
             WHERE user_id = ?1 ORDER BY id",
        )?;
        let tokens = stmt
            .query_map(params![user_id], |row| {
                Ok(ApiToken {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    label: row.get(2)?,
                    prefix: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tokens)
    }

    pub fn revoke_api_token(&self, user_id: &str, id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM api_tokens WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(rows > 0)
    }

    /// The user a bearer token belongs to, if it is known.
    pub fn user_for_token(&self, token: &str) -> Result<Option<String>> {
        let user = self
            .conn
            .query_row(
                "SELECT user_id FROM api_tokens WHERE token_hash = ?1",
                params![hash_token(token)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(user)
    }

    // --- Export / Import ---

    pub fn export_user(&self, user_id: &str) -> Result<ExportData> {
        let trackers = self.list_trackers(user_id, None)?;
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.tracker_id, c.completion_date, c.completed_at, c.notes
             FROM tracker_completions c
             JOIN trackers t ON c.tracker_id = t.id
             WHERE t.user_id = ?1
             ORDER BY c.tracker_id, c.completion_date",
        )?;
        let completions = stmt
            .query_map(params![user_id], completion_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ExportData {
            version: EXPORT_VERSION,
            exported_at: Utc::now().to_rfc3339(),
            user_id: user_id.to_string(),
            trackers,
            completions,
        })
    }

    /// Merge an export into `user_id`'s data.
    ///
    /// Trackers already owned by the user are overwritten by id; ids that
    /// belong to another user are imported under a fresh id. Completions that
    /// collide on `(tracker, date)` or reference a tracker missing from the
    /// export are skipped. Aggregates are recomputed as of `as_of`.
    pub fn import_user(
        &self,
        user_id: &str,
        data: &ExportData,
        as_of: NaiveDate,
    ) -> Result<ImportSummary> {
        if data.version > EXPORT_VERSION {
            bail!(
                "Unsupported export version {} (this build reads up to {EXPORT_VERSION})",
                data.version
            );
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut summary = ImportSummary::default();
        let mut imported: HashMap<&str, Tracker> = HashMap::new();

        for incoming in &data.trackers {
            validate_tracker(incoming)
                .with_context(|| format!("Invalid tracker '{}' in import", incoming.id))?;
            let owner: Option<String> = tx
                .query_row(
                    "SELECT user_id FROM trackers WHERE id = ?1",
                    params![incoming.id],
                    |row| row.get(0),
                )
                .optional()?;

            let mut tracker = incoming.clone();
            tracker.user_id = user_id.to_string();
            tracker.title = validate_title(&tracker.title)?;
            if tracker.created_at.is_empty() {
                tracker.created_at = Utc::now().to_rfc3339();
            }
            tracker.updated_at.clone_from(&tracker.created_at);
            match owner {
                Some(owner) if owner == user_id => update_tracker_row(&tx, &tracker)?,
                Some(_) => {
                    tracker.id = Uuid::new_v4().to_string();
                    insert_tracker_row(&tx, &tracker)?;
                }
                None => insert_tracker_row(&tx, &tracker)?,
            }
            imported.insert(incoming.id.as_str(), tracker);
            summary.trackers_imported += 1;
        }

        for completion in &data.completions {
            let Some(tracker) = imported.get(completion.tracker_id.as_str()) else {
                summary.completions_skipped += 1;
                continue;
            };
            let rows = tx.execute(
                "INSERT INTO tracker_completions (id, tracker_id, completion_date, completed_at, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(tracker_id, completion_date) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    tracker.id,
                    completion.completion_date,
                    completion.completed_at,
                    completion.notes,
                ],
            )?;
            if rows > 0 {
                summary.completions_imported += 1;
            } else {
                summary.completions_skipped += 1;
            }
        }

        for tracker in imported.values() {
            refresh_in(&tx, tracker, as_of)?;
        }
        tx.commit()?;
        tracing::info!(
            user_id,
            trackers = summary.trackers_imported,
            completions = summary.completions_imported,
            skipped = summary.completions_skipped,
            "imported data"
        );
        Ok(summary)
    }
}

// --- Row mapping helpers ---

fn tracker_from_row(row: &rusqlite::Row) -> rusqlite::Result<Tracker> {
    let kind: String = row.get(8)?;
    let frequency = frequency_from_columns(&kind, row.get(9)?, row.get(10)?, row.get(11)?)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, e))?;
    Ok(Tracker {
        id: row.get(0)?,
        user_id: row.get(1)?,
        project_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        category: row.get(5)?,
        icon: row.get(6)?,
        color: row.get(7)?,
        frequency,
        start_date: row.get(12)?,
        end_date: row.get(13)?,
        utc_offset_minutes: row.get(14)?,
        total_completions: row.get(15)?,
        current_streak: row.get(16)?,
        best_streak: row.get(17)?,
        is_active: row.get(18)?,
        created_at: row.get(19)?,
        updated_at: row.get(20)?,
    })
}

fn completion_from_row(row: &rusqlite::Row) -> rusqlite::Result<TrackerCompletion> {
    Ok(TrackerCompletion {
        id: row.get(0)?,
        tracker_id: row.get(1)?,
        completion_date: row.get(2)?,
        completed_at: row.get(3)?,
        notes: row.get(4)?,
    })
}

type ColumnError = Box<dyn std::error::Error + Send + Sync>;

fn frequency_from_columns(
    kind: &str,
    frequency_value: Option<i64>,
    target_days: Option<String>,
    custom_dates: Option<String>,
) -> std::result::Result<Frequency, ColumnError> {
    let fields = FrequencyFields {
        frequency: FrequencyKind::parse(kind)?,
        frequency_value,
        target_days: target_days
            .as_deref()
            .map(serde_json::from_str::<Vec<i64>>)
            .transpose()?,
        custom_dates: custom_dates
            .as_deref()
            .map(serde_json::from_str::<Vec<NaiveDate>>)
            .transpose()?,
    };
    Ok(Frequency::from_fields(&fields)?)
}

/// The flat SQL columns for a frequency: tag, value, and JSON lists.
fn frequency_columns(
    frequency: &Frequency,
) -> Result<(&'static str, Option<i64>, Option<String>, Option<String>)> {
    let fields = FrequencyFields::from(frequency.clone());
    let target_days = fields
        .target_days
        .map(|days| serde_json::to_string(&days))
        .transpose()?;
    let custom_dates = fields
        .custom_dates
        .map(|dates| serde_json::to_string(&dates))
        .transpose()?;
    Ok((
        fields.frequency.as_str(),
        fields.frequency_value,
        target_days,
        custom_dates,
    ))
}

fn hash_token(token: &str) -> String {
    Sha256::digest(token.as_bytes())
        .iter()
        .fold(String::with_capacity(64), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
}

// --- Connection-level helpers, shared by plain and transactional paths ---

fn fetch_tracker(conn: &Connection, id: &str) -> Result<Tracker> {
    let tracker = conn
        .query_row(
            &format!("SELECT {TRACKER_COLUMNS} FROM trackers WHERE id = ?1"),
            params![id],
            tracker_from_row,
        )
        .optional()
        .with_context(|| format!("Failed to load tracker {id}"))?;
    match tracker {
        Some(t) => Ok(t),
        None => Err(TrackerError::tracker_not_found(id).into()),
    }
}

fn insert_tracker_row(conn: &Connection, t: &Tracker) -> Result<()> {
    let (frequency, frequency_value, target_days, custom_dates) = frequency_columns(&t.frequency)?;
    conn.execute(
        "INSERT INTO trackers (id, user_id, project_id, title, description, category, icon, color,
            frequency, frequency_value, target_days, custom_dates, start_date, end_date,
            utc_offset_minutes, total_completions, current_streak, best_streak, is_active,
            created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
        params![
            t.id,
            t.user_id,
            t.project_id,
            t.title,
            t.description,
            t.category,
            t.icon,
            t.color,
            frequency,
            frequency_value,
            target_days,
            custom_dates,
            t.start_date,
            t.end_date,
            t.utc_offset_minutes,
            t.total_completions,
            t.current_streak,
            t.best_streak,
            t.is_active,
            t.created_at,
            t.updated_at,
        ],
    )
    .with_context(|| format!("Failed to insert tracker {}", t.id))?;
    Ok(())
}

/// Overwrite a tracker's definition. Cached aggregates are left alone.
fn update_tracker_row(conn: &Connection, t: &Tracker) -> Result<()> {
    let (frequency, frequency_value, target_days, custom_dates) = frequency_columns(&t.frequency)?;
    conn.execute(
        "UPDATE trackers SET project_id = ?1, title = ?2, description = ?3, category = ?4,
            icon = ?5, color = ?6, frequency = ?7, frequency_value = ?8, target_days = ?9,
            custom_dates = ?10, start_date = ?11, end_date = ?12, utc_offset_minutes = ?13,
            is_active = ?14, updated_at = ?15
         WHERE id = ?16",
        params![
            t.project_id,
            t.title,
            t.description,
            t.category,
            t.icon,
            t.color,
            frequency,
            frequency_value,
            target_days,
            custom_dates,
            t.start_date,
            t.end_date,
            t.utc_offset_minutes,
            t.is_active,
            t.updated_at,
            t.id,
        ],
    )
    .with_context(|| format!("Failed to update tracker {}", t.id))?;
    Ok(())
}

fn load_dates(conn: &Connection, tracker_id: &str) -> Result<Vec<NaiveDate>> {
    let mut stmt = conn.prepare(
        "SELECT completion_date FROM tracker_completions
         WHERE tracker_id = ?1 ORDER BY completion_date",
    )?;
    let dates = stmt
        .query_map(params![tracker_id], |row| row.get(0))?
        .collect::<Result<Vec<NaiveDate>, _>>()?;
    Ok(dates)
}

fn upsert_completion(conn: &Connection, c: &NewCompletion) -> Result<TrackerCompletion> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO tracker_completions (id, tracker_id, completion_date, completed_at, notes)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(tracker_id, completion_date) DO UPDATE SET
            completed_at = excluded.completed_at,
            notes = COALESCE(excluded.notes, tracker_completions.notes)",
        params![
            Uuid::new_v4().to_string(),
            c.tracker_id,
            c.completion_date,
            now,
            c.notes,
        ],
    )?;
    let saved = conn.query_row(
        &format!(
            "SELECT {COMPLETION_COLUMNS} FROM tracker_completions
             WHERE tracker_id = ?1 AND completion_date = ?2"
        ),
        params![c.tracker_id, c.completion_date],
        completion_from_row,
    )?;
    Ok(saved)
}

/// Recompute and store `tracker`'s aggregates from its completion log.
fn refresh_in(conn: &Connection, tracker: &Tracker, as_of: NaiveDate) -> Result<TrackerStats> {
    let dates = load_dates(conn, &tracker.id)?;
    let stats = schedule::compute_stats(tracker, &dates, as_of)?;
    conn.execute(
        "UPDATE trackers SET total_completions = ?1, current_streak = ?2, best_streak = ?3
         WHERE id = ?4",
        params![
            stats.total_completions,
            stats.current_streak,
            stats.best_streak,
            tracker.id,
        ],
    )?;
    tracing::debug!(
        tracker_id = %tracker.id,
        %as_of,
        total = stats.total_completions,
        current = stats.current_streak,
        best = stats.best_streak,
        "refreshed aggregates"
    );
    Ok(stats)
}
