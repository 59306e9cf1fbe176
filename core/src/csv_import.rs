use std::collections::BTreeSet;
use std::io::Read;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::Serialize;

use crate::db::Database;
use crate::models::Tracker;

/// A single completion parsed from a CSV history file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRow {
    /// 1-based line in the source file, header included.
    pub line: usize,
    pub date: NaiveDate,
    pub notes: Option<String>,
}

/// Summary of what a CSV import would do / did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CsvImportSummary {
    pub rows_parsed: usize,
    pub completions_recorded: usize,
    pub duplicates_skipped: usize,
    pub out_of_range: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

/// Parse a completion history CSV from any reader.
///
/// Expected header: `Date[,Notes]` (case-insensitive, extra columns ignored).
pub fn parse_completion_csv<R: Read>(reader: R) -> Result<Vec<CompletionRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("Failed to read CSV headers")?.clone();
    let col =
        |name: &str| -> Option<usize> { headers.iter().position(|h| h.eq_ignore_ascii_case(name)) };

    let Some(idx_date) = col("Date") else {
        bail!("Missing required column: Date");
    };
    let idx_notes = col("Notes").or_else(|| col("Note"));

    let mut rows = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let line = i + 2;
        let record = result.with_context(|| format!("Failed to parse CSV row {line}"))?;

        let raw_date = record.get(idx_date).unwrap_or("").trim();
        if raw_date.is_empty() {
            continue;
        }
        let date = normalize_date(raw_date).with_context(|| format!("Row {line}"))?;
        let notes = idx_notes
            .and_then(|idx| record.get(idx))
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);

        rows.push(CompletionRow { line, date, notes });
    }

    Ok(rows)
}

/// Parse a `YYYY-MM-DD`, `M/D/YYYY` or `D/M/YYYY` date.
///
/// Slash dates are read month-first; day-first is only tried when that fails.
pub fn normalize_date(raw: &str) -> Result<NaiveDate> {
    for format in ["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Ok(date);
        }
    }
    bail!("Cannot parse date: '{raw}'")
}

/// Record parsed rows as completions of `tracker`.
///
/// Rows outside the tracker's start/end range are counted and dropped; dates
/// repeated in the file or already recorded are skipped. When `dry_run` is
/// true nothing is written.
pub fn import_completions(
    db: &Database,
    tracker: &Tracker,
    rows: &[CompletionRow],
    dry_run: bool,
    as_of: NaiveDate,
) -> Result<CsvImportSummary> {
    let mut summary = CsvImportSummary {
        rows_parsed: rows.len(),
        ..CsvImportSummary::default()
    };

    let existing: BTreeSet<NaiveDate> = db.completion_dates(&tracker.id)?.into_iter().collect();
    let mut seen = BTreeSet::new();
    let mut entries = Vec::new();

    for row in rows {
        let in_range = row.date >= tracker.start_date
            && tracker.end_date.is_none_or(|end| row.date <= end);
        if !in_range {
            summary.out_of_range += 1;
            continue;
        }
        if existing.contains(&row.date) || !seen.insert(row.date) {
            summary.duplicates_skipped += 1;
            continue;
        }
        entries.push((row.date, row.notes.clone()));
    }

    summary.first_date = seen.first().copied();
    summary.last_date = seen.last().copied();

    if dry_run {
        summary.completions_recorded = entries.len();
    } else if !entries.is_empty() {
        let (inserted, stats) = db.insert_completions(&tracker.id, &entries, as_of)?;
        summary.completions_recorded = inserted;
        tracing::info!(
            tracker_id = %tracker.id,
            inserted,
            best_streak = stats.best_streak,
            "imported completion history"
        );
    }

    Ok(summary)
}
