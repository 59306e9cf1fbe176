use anyhow::Result;

use planner_core::models::NewCompletion;
use planner_core::schedule;
use planner_core::service::PlannerService;

use super::helpers::parse_date;
use super::resolve_tracker_id;

pub(crate) fn cmd_done(
    svc: &PlannerService,
    user: &str,
    tracker: &str,
    date: Option<String>,
    notes: Option<String>,
    json: bool,
) -> Result<()> {
    let id = resolve_tracker_id(svc, user, tracker)?;
    let tracker = svc.get_tracker(user, &id)?;
    let date = parse_date(date, svc.today_for(&tracker)?)?;

    let recorded = svc.record_completion(
        user,
        &NewCompletion {
            tracker_id: id,
            completion_date: date,
            notes,
        },
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recorded)?);
    } else {
        let stats = &recorded.stats;
        println!("Done: \"{}\" on {date}", tracker.title);
        if !schedule::is_scheduled(&tracker, date)? {
            eprintln!("  Note: {date} is not a scheduled day for this tracker");
        }
        println!(
            "  Streak: {} (best {}), {} total",
            stats.current_streak, stats.best_streak, stats.total_completions
        );
    }

    Ok(())
}

pub(crate) fn cmd_undo(
    svc: &PlannerService,
    user: &str,
    tracker: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let id = resolve_tracker_id(svc, user, tracker)?;
    let tracker = svc.get_tracker(user, &id)?;
    let date = parse_date(date, svc.today_for(&tracker)?)?;

    let stats = svc.undo_completion(user, &id, date)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Removed completion of \"{}\" on {date}", tracker.title);
        println!(
            "  Streak: {} (best {}), {} total",
            stats.current_streak, stats.best_streak, stats.total_completions
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use planner_core::models::NewTracker;

    #[test]
    fn test_done_then_undo() {
        let svc = PlannerService::new_in_memory().unwrap();
        let tracker = svc
            .create_tracker(
                "local",
                &NewTracker::daily("Floss", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            )
            .unwrap();

        cmd_done(
            &svc,
            "local",
            &tracker.id,
            Some("2024-01-02".into()),
            Some("mint".into()),
            true,
        )
        .unwrap();
        // recording the same day again does not double count
        cmd_done(&svc, "local", &tracker.id, Some("2024-01-02".into()), None, true).unwrap();
        assert_eq!(
            svc.get_tracker("local", &tracker.id)
                .unwrap()
                .total_completions,
            1
        );

        cmd_undo(&svc, "local", &tracker.id, Some("2024-01-02".into()), true).unwrap();
        assert_eq!(
            svc.get_tracker("local", &tracker.id)
                .unwrap()
                .total_completions,
            0
        );

        let err = cmd_undo(&svc, "local", &tracker.id, Some("2024-01-02".into()), true);
        assert!(err.is_err());
    }
}
