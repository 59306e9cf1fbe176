//! Tracker scheduling and statistics.
//!
//! Everything here is a pure function of its inputs: no clock reads, no I/O.
//! Dates are calendar dates (`NaiveDate`); callers resolve "today" in the
//! tracker's timezone with [`local_today`] before calling in.
//!
//! Two views of a schedule exist. The *live* view ([`is_scheduled`],
//! next-date lookups, due lists) treats paused trackers as never scheduled.
//! The *history* view (streaks, completion rate, calendars) evaluates the
//! rule regardless of `is_active`, so pausing a tracker does not erase the
//! record of what was due before it was paused.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use chrono::{DateTime, Datelike, Days, FixedOffset, NaiveDate, Utc};
use serde::Serialize;

use crate::error::TrackerError;
use crate::models::{
    Frequency, MAX_CALENDAR_DAYS, Tracker, TrackerCalendarDay, TrackerCompletion, TrackerStats,
    validate_utc_offset,
};

/// How far ahead an open-ended next-date search looks. Every calendar rule
/// repeats within a year, so a miss past this point means "never".
const SEARCH_HORIZON_DAYS: u64 = 366;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Streaks {
    pub current: u32,
    pub best: u32,
}

#[derive(Clone, Copy)]
enum Rule<'a> {
    Once,
    Daily,
    Every(u32),
    Weekly([bool; 7]),
    Monthly(u32),
    Dates(&'a BTreeSet<NaiveDate>),
    External(&'a dyn Fn(NaiveDate) -> bool),
}

/// A validated view over one tracker's schedule rule.
#[derive(Clone, Copy)]
pub struct Schedule<'a> {
    start: NaiveDate,
    end: Option<NaiveDate>,
    active: bool,
    rule: Rule<'a>,
}

impl<'a> Schedule<'a> {
    pub fn new(tracker: &'a Tracker) -> Result<Self, TrackerError> {
        let rule = match &tracker.frequency {
            Frequency::Once => Rule::Once,
            Frequency::Daily => Rule::Daily,
            Frequency::EveryXDays { interval } => {
                if *interval < 1 {
                    return Err(TrackerError::invalid(
                        "frequency_value must be at least 1 for every_x_days",
                    ));
                }
                Rule::Every(*interval)
            }
            Frequency::Weekly { days } => {
                let mut mask = [false; 7];
                for &day in days {
                    let slot = mask.get_mut(usize::from(day)).ok_or_else(|| {
                        TrackerError::invalid(format!(
                            "target_days must be weekday indices 0 (Sunday) to 6 (Saturday), got {day}"
                        ))
                    })?;
                    *slot = true;
                }
                Rule::Weekly(mask)
            }
            Frequency::Monthly => Rule::Monthly(tracker.start_date.day()),
            Frequency::Custom { dates } => Rule::Dates(dates),
        };
        Ok(Self {
            start: tracker.start_date,
            end: tracker.end_date,
            active: tracker.is_active,
            rule,
        })
    }

    /// Schedule a `custom` tracker with a caller-supplied predicate instead of
    /// its stored date list. Range bounds and the active flag still apply.
    pub fn with_predicate(
        tracker: &'a Tracker,
        predicate: &'a dyn Fn(NaiveDate) -> bool,
    ) -> Result<Self, TrackerError> {
        if !matches!(tracker.frequency, Frequency::Custom { .. }) {
            return Err(TrackerError::invalid(format!(
                "an external schedule only applies to custom trackers, not {}",
                tracker.frequency.kind()
            )));
        }
        Ok(Self {
            start: tracker.start_date,
            end: tracker.end_date,
            active: tracker.is_active,
            rule: Rule::External(predicate),
        })
    }

    /// The same rule with the active flag ignored, for historical views.
    #[must_use]
    pub fn history(self) -> Self {
        Self {
            active: true,
            ..self
        }
    }

    fn in_range(&self, date: NaiveDate) -> bool {
        date >= self.start && self.end.is_none_or(|end| date <= end)
    }

    fn rule_matches(&self, date: NaiveDate) -> bool {
        match self.rule {
            Rule::Once => date == self.start,
            Rule::Daily => true,
            Rule::Every(n) => (date - self.start).num_days() % i64::from(n) == 0,
            Rule::Weekly(mask) => mask
                .get(date.weekday().num_days_from_sunday() as usize)
                .copied()
                .unwrap_or(false),
            Rule::Monthly(day) => date.day() == day.min(days_in_month(date.year(), date.month())),
            Rule::Dates(dates) => dates.contains(&date),
            Rule::External(predicate) => predicate(date),
        }
    }

    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.active && self.in_range(date) && self.rule_matches(date)
    }

    /// Scheduled dates in `[from, to]`, ascending.
    #[must_use]
    pub fn dates_between(&self, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        if !self.active {
            return Vec::new();
        }
        let from = from.max(self.start);
        let to = match self.end {
            Some(end) => to.min(end),
            None => to,
        };
        if from > to {
            return Vec::new();
        }
        match self.rule {
            Rule::Dates(dates) => dates.range(from..=to).copied().collect(),
            Rule::Once => {
                if (from..=to).contains(&self.start) {
                    vec![self.start]
                } else {
                    Vec::new()
                }
            }
            Rule::Every(n) => {
                let mut out = Vec::new();
                let mut next = first_interval_on_or_after(self.start, n, from);
                while let Some(date) = next.filter(|d| *d <= to) {
                    out.push(date);
                    next = date.checked_add_days(Days::new(u64::from(n)));
                }
                out
            }
            Rule::Daily | Rule::Weekly(_) | Rule::Monthly(_) | Rule::External(_) => from
                .iter_days()
                .take_while(|d| *d <= to)
                .filter(|d| self.rule_matches(*d))
                .collect(),
        }
    }

    /// Smallest scheduled date strictly after `after`, if any.
    pub fn next_after(&self, after: NaiveDate) -> Result<Option<NaiveDate>, TrackerError> {
        if !self.active {
            return Ok(None);
        }
        let Some(day_after) = after.succ_opt() else {
            return Err(TrackerError::OutOfRange(format!(
                "no calendar date follows {after}"
            )));
        };
        let from = day_after.max(self.start);
        let candidate = match self.rule {
            Rule::Once => (self.start > after).then_some(self.start),
            Rule::Daily => Some(from),
            Rule::Every(n) => first_interval_on_or_after(self.start, n, from),
            Rule::Dates(dates) => dates
                .range((Bound::Excluded(after), Bound::Unbounded))
                .find(|d| **d >= self.start)
                .copied(),
            Rule::Weekly(_) | Rule::Monthly(_) | Rule::External(_) => from
                .iter_days()
                .take(SEARCH_HORIZON_DAYS as usize)
                .find(|d| self.rule_matches(*d)),
        };
        Ok(candidate.filter(|d| self.in_range(*d)))
    }
}

/// Number of days in the given month.
fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map_or(28, |d| d.day())
}

/// First `start + k * n` (k >= 0) that falls on or after `from`.
fn first_interval_on_or_after(start: NaiveDate, n: u32, from: NaiveDate) -> Option<NaiveDate> {
    if from <= start {
        return Some(start);
    }
    let elapsed = u64::try_from((from - start).num_days()).ok()?;
    let step = u64::from(n);
    let k = elapsed.div_ceil(step);
    start.checked_add_days(Days::new(k * step))
}

/// Whether `tracker` is due on `date`. Paused trackers are never due.
pub fn is_scheduled(tracker: &Tracker, date: NaiveDate) -> Result<bool, TrackerError> {
    Ok(Schedule::new(tracker)?.contains(date))
}

/// Scheduled dates of `tracker` in `[from, to]`.
pub fn scheduled_dates(
    tracker: &Tracker,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<NaiveDate>, TrackerError> {
    Ok(Schedule::new(tracker)?.dates_between(from, to))
}

/// Last date whose outcome is known as of `as_of`: `as_of` clipped to `end_date`.
fn window_end(schedule: &Schedule<'_>, as_of: NaiveDate) -> NaiveDate {
    match schedule.end {
        Some(end) => as_of.min(end),
        None => as_of,
    }
}

fn streaks_for(schedule: &Schedule<'_>, done: &BTreeSet<NaiveDate>, as_of: NaiveDate) -> Streaks {
    let last = window_end(schedule, as_of);
    let mut run: u32 = 0;
    let mut best: u32 = 0;
    for date in schedule.dates_between(schedule.start, last) {
        if done.contains(&date) {
            run += 1;
            best = best.max(run);
        } else if date != as_of {
            run = 0;
        }
        // An unfinished `as_of` is still pending and leaves the run intact.
    }
    Streaks { current: run, best }
}

fn rate_for(schedule: &Schedule<'_>, done: &BTreeSet<NaiveDate>, as_of: NaiveDate) -> u32 {
    let scheduled = schedule.dates_between(schedule.start, window_end(schedule, as_of));
    let total = scheduled.len() as u64;
    if total == 0 {
        return 0;
    }
    let completed = scheduled.iter().filter(|d| done.contains(d)).count() as u64;
    // round-half-up of completed * 100 / total
    ((completed * 200 + total) / (total * 2)) as u32
}

/// Current and best streak of completed scheduled dates as of `as_of`.
pub fn compute_streaks(
    tracker: &Tracker,
    completions: &[NaiveDate],
    as_of: NaiveDate,
) -> Result<Streaks, TrackerError> {
    let schedule = Schedule::new(tracker)?.history();
    let done: BTreeSet<NaiveDate> = completions.iter().copied().collect();
    Ok(streaks_for(&schedule, &done, as_of))
}

/// Rounded percentage of scheduled dates in `[start_date, min(as_of, end_date)]`
/// that were completed. Zero when nothing was scheduled.
pub fn completion_rate(
    tracker: &Tracker,
    completions: &[NaiveDate],
    as_of: NaiveDate,
) -> Result<u32, TrackerError> {
    let schedule = Schedule::new(tracker)?.history();
    let done: BTreeSet<NaiveDate> = completions.iter().copied().collect();
    Ok(rate_for(&schedule, &done, as_of))
}

/// First scheduled date strictly after `as_of`, bounded by `end_date`.
pub fn next_scheduled_date(
    tracker: &Tracker,
    as_of: NaiveDate,
) -> Result<Option<NaiveDate>, TrackerError> {
    Schedule::new(tracker)?.next_after(as_of)
}

fn stats_for(
    tracker: &Tracker,
    schedule: Schedule<'_>,
    completions: &[NaiveDate],
    as_of: NaiveDate,
) -> Result<TrackerStats, TrackerError> {
    let done: BTreeSet<NaiveDate> = completions.iter().copied().collect();
    let history = schedule.history();
    let streaks = streaks_for(&history, &done, as_of);
    Ok(TrackerStats {
        tracker_id: tracker.id.clone(),
        total_completions: u32::try_from(done.len()).unwrap_or(u32::MAX),
        current_streak: streaks.current,
        best_streak: streaks.best,
        completion_rate: rate_for(&history, &done, as_of),
        last_completion_date: done.last().copied(),
        next_scheduled_date: schedule.next_after(as_of)?,
    })
}

/// Full statistics for `tracker` from its completion dates as of `as_of`.
///
/// Duplicate dates are counted once.
pub fn compute_stats(
    tracker: &Tracker,
    completions: &[NaiveDate],
    as_of: NaiveDate,
) -> Result<TrackerStats, TrackerError> {
    stats_for(tracker, Schedule::new(tracker)?, completions, as_of)
}

/// [`compute_stats`] for a `custom` tracker whose schedule comes from `predicate`.
pub fn compute_stats_with_predicate(
    tracker: &Tracker,
    predicate: &dyn Fn(NaiveDate) -> bool,
    completions: &[NaiveDate],
    as_of: NaiveDate,
) -> Result<TrackerStats, TrackerError> {
    stats_for(
        tracker,
        Schedule::with_predicate(tracker, predicate)?,
        completions,
        as_of,
    )
}

/// One [`TrackerCalendarDay`] per date in `[from, to]`.
pub fn calendar(
    tracker: &Tracker,
    completions: &[TrackerCompletion],
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<TrackerCalendarDay>, TrackerError> {
    if from > to {
        return Err(TrackerError::OutOfRange(format!(
            "calendar start {from} is after end {to}"
        )));
    }
    let span = (to - from).num_days() + 1;
    if span > MAX_CALENDAR_DAYS {
        return Err(TrackerError::OutOfRange(format!(
            "calendar spans {span} days, at most {MAX_CALENDAR_DAYS} allowed"
        )));
    }

    let schedule = Schedule::new(tracker)?.history();
    let by_date: BTreeMap<NaiveDate, &TrackerCompletion> = completions
        .iter()
        .filter(|c| c.tracker_id == tracker.id)
        .map(|c| (c.completion_date, c))
        .collect();

    Ok(from
        .iter_days()
        .take_while(|d| *d <= to)
        .map(|date| {
            let completion = by_date.get(&date).map(|c| (*c).clone());
            TrackerCalendarDay {
                date,
                is_scheduled: schedule.contains(date),
                is_completed: completion.is_some(),
                completion,
            }
        })
        .collect())
}

/// Calendar date at `now` in a zone `utc_offset_minutes` away from UTC.
pub fn local_today(now: DateTime<Utc>, utc_offset_minutes: i32) -> Result<NaiveDate, TrackerError> {
    validate_utc_offset(utc_offset_minutes)?;
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60).ok_or_else(|| {
        TrackerError::invalid(format!("invalid utc offset {utc_offset_minutes} minutes"))
    })?;
    Ok(now.with_timezone(&offset).date_naive())
}

/// First day of the `days`-long window that ends on `end`.
pub fn window_start(end: NaiveDate, days: u64) -> Result<NaiveDate, TrackerError> {
    end.checked_sub_days(Days::new(days.saturating_sub(1)))
        .ok_or_else(|| TrackerError::OutOfRange(format!("{days} days before {end}")))
}
