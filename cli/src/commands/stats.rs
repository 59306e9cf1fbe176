use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use planner_core::schedule;
use planner_core::service::PlannerService;

use super::helpers::{describe_frequency, parse_date, short_id, truncate};
use super::resolve_tracker_id;

/// Days shown by `planner calendar` when no start date is given.
const DEFAULT_CALENDAR_DAYS: u64 = 28;

pub(crate) fn cmd_stats(
    svc: &PlannerService,
    user: &str,
    tracker: &str,
    as_of: Option<String>,
    json: bool,
) -> Result<()> {
    let id = resolve_tracker_id(svc, user, tracker)?;
    let tracker = svc.get_tracker(user, &id)?;
    let as_of = parse_date(as_of, svc.today_for(&tracker)?)?;
    let stats = svc.tracker_stats(user, &id, Some(as_of))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("{} as of {as_of}", tracker.title);
        println!("  Completions:    {}", stats.total_completions);
        println!("  Current streak: {}", stats.current_streak);
        println!("  Best streak:    {}", stats.best_streak);
        println!("  Completion:     {}%", stats.completion_rate);
        println!(
            "  Last done:      {}",
            stats
                .last_completion_date
                .map_or_else(|| "-".to_string(), |d| d.to_string())
        );
        println!(
            "  Next scheduled: {}",
            stats
                .next_scheduled_date
                .map_or_else(|| "-".to_string(), |d| d.to_string())
        );
    }

    Ok(())
}

pub(crate) fn cmd_calendar(
    svc: &PlannerService,
    user: &str,
    tracker: &str,
    from: Option<String>,
    to: Option<String>,
    json: bool,
) -> Result<()> {
    let id = resolve_tracker_id(svc, user, tracker)?;
    let tracker = svc.get_tracker(user, &id)?;
    let today = svc.today_for(&tracker)?;
    let to = parse_date(to, today)?;
    let from = match from {
        Some(s) => parse_date(Some(s), today)?,
        None => schedule::window_start(to, DEFAULT_CALENDAR_DAYS)?,
    };

    let days = svc.tracker_calendar(user, &id, from, to)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&days)?);
        return Ok(());
    }

    #[derive(Tabled)]
    struct DayRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Day")]
        weekday: String,
        #[tabled(rename = "Scheduled")]
        scheduled: String,
        #[tabled(rename = "Done")]
        done: String,
        #[tabled(rename = "Notes")]
        notes: String,
    }

    let rows: Vec<DayRow> = days
        .iter()
        .filter(|d| d.is_scheduled || d.is_completed)
        .map(|d| DayRow {
            date: d.date.format("%Y-%m-%d").to_string(),
            weekday: d.date.format("%a").to_string(),
            scheduled: if d.is_scheduled { "yes" } else { "-" }.to_string(),
            done: match (d.is_completed, d.is_scheduled) {
                (true, _) => "done".to_string(),
                (false, true) if d.date < today => "missed".to_string(),
                _ => String::new(),
            },
            notes: d
                .completion
                .as_ref()
                .and_then(|c| c.notes.as_deref())
                .map(|n| truncate(n, 30))
                .unwrap_or_default(),
        })
        .collect();

    println!(
        "{} ({}), {from} to {to}",
        tracker.title,
        describe_frequency(&tracker.frequency)
    );
    if rows.is_empty() {
        eprintln!("Nothing scheduled or completed in this range.");
    } else {
        let table = Table::new(&rows).with(Style::rounded()).to_string();
        println!("{table}");
    }

    Ok(())
}

pub(crate) fn cmd_due(
    svc: &PlannerService,
    user: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = match date {
        Some(s) => Some(parse_date(Some(s), svc.today(user)?)?),
        None => None,
    };
    let due = svc.due_trackers(user, date)?;
    let day = date.map_or_else(|| "today".to_string(), |d| format!("on {d}"));

    if json {
        println!("{}", serde_json::to_string_pretty(&due)?);
        return Ok(());
    }
    if due.is_empty() {
        eprintln!("Nothing due {day}.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct DueRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Streak")]
        streak: u32,
        #[tabled(rename = "Status")]
        status: String,
    }

    let remaining = due.iter().filter(|d| !d.is_completed).count();
    let rows: Vec<DueRow> = due
        .iter()
        .map(|d| DueRow {
            id: short_id(&d.tracker.id),
            title: truncate(&d.tracker.title, 30),
            streak: d.tracker.current_streak,
            status: if d.is_completed { "done" } else { "to do" }.to_string(),
        })
        .collect();

    println!("Due {day}: {remaining} of {} remaining", due.len());
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..3)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use planner_core::models::{NewCompletion, NewTracker};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn seeded() -> (PlannerService, String) {
        let svc = PlannerService::new_in_memory().unwrap();
        let tracker = svc
            .create_tracker("local", &NewTracker::daily("Walk", d(2024, 1, 1)))
            .unwrap();
        svc.record_completion(
            "local",
            &NewCompletion {
                tracker_id: tracker.id.clone(),
                completion_date: d(2024, 1, 1),
                notes: None,
            },
        )
        .unwrap();
        (svc, tracker.id)
    }

    #[test]
    fn test_stats_and_calendar_run() {
        let (svc, id) = seeded();
        cmd_stats(&svc, "local", &id, Some("2024-01-02".into()), true).unwrap();
        cmd_calendar(
            &svc,
            "local",
            &id,
            Some("2024-01-01".into()),
            Some("2024-01-07".into()),
            false,
        )
        .unwrap();
    }

    #[test]
    fn test_calendar_rejects_inverted_range() {
        let (svc, id) = seeded();
        let result = cmd_calendar(
            &svc,
            "local",
            &id,
            Some("2024-02-01".into()),
            Some("2024-01-01".into()),
            true,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_due_for_date() {
        let (svc, _) = seeded();
        cmd_due(&svc, "local", Some("2024-01-01".into()), false).unwrap();
        cmd_due(&svc, "local", Some("2023-12-31".into()), true).unwrap();
        cmd_due(&svc, "local", None, false).unwrap();
    }

    #[test]
    fn test_calendar_default_window_at_calendar_start() {
        let (svc, id) = seeded();
        let err = cmd_calendar(
            &svc,
            "local",
            &id,
            None,
            Some(NaiveDate::MIN.to_string()),
            true,
        )
        .unwrap_err();
        assert!(matches!(
            planner_core::error::tracker_error(&err),
            Some(planner_core::error::TrackerError::OutOfRange(_))
        ));
    }
}
