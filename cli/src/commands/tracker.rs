use anyhow::{Result, bail};
use clap::Args;

use planner_core::models::{NewTracker, UpdateTracker};
use planner_core::service::PlannerService;

use super::helpers::{describe_frequency, parse_date, parse_frequency, print_tracker_table};
use super::resolve_tracker_id;

/// Tracker fields shared by `tracker add` and `tracker edit`.
#[derive(Args, Debug, Default)]
pub(crate) struct TrackerFields {
    /// Schedule: once, daily, every_x_days, weekly, monthly, custom
    #[arg(short, long)]
    pub frequency: Option<String>,
    /// Interval in days (every_x_days)
    #[arg(long)]
    pub every: Option<u32>,
    /// Weekdays, comma separated (weekly), e.g. mon,wed,fri
    #[arg(long)]
    pub days: Option<String>,
    /// Dates, comma separated YYYY-MM-DD (custom)
    #[arg(long)]
    pub dates: Option<String>,
    /// First scheduled date (YYYY-MM-DD or today/yesterday/tomorrow)
    #[arg(long)]
    pub start: Option<String>,
    /// Last scheduled date, inclusive
    #[arg(long)]
    pub end: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long)]
    pub icon: Option<String>,
    #[arg(long)]
    pub color: Option<String>,
    /// Project this tracker belongs to
    #[arg(long)]
    pub project: Option<String>,
    /// UTC offset in minutes used to decide this tracker's "today"
    #[arg(long, allow_hyphen_values = true)]
    pub utc_offset: Option<i32>,
}

impl TrackerFields {
    fn has_schedule_params(&self) -> bool {
        self.every.is_some() || self.days.is_some() || self.dates.is_some()
    }
}

pub(crate) fn cmd_tracker_add(
    svc: &PlannerService,
    user: &str,
    title: &str,
    fields: TrackerFields,
    json: bool,
) -> Result<()> {
    let today = svc.today(user)?;
    let frequency = parse_frequency(
        fields.frequency.as_deref().unwrap_or("daily"),
        fields.every,
        fields.days.as_deref(),
        fields.dates.as_deref(),
    )?;
    let start_date = parse_date(fields.start, today)?;
    let end_date = fields.end.map(|e| parse_date(Some(e), today)).transpose()?;

    let tracker = svc.create_tracker(
        user,
        &NewTracker {
            project_id: fields.project,
            title: title.to_string(),
            description: fields.description,
            category: fields.category,
            icon: fields.icon,
            color: fields.color,
            frequency,
            start_date,
            end_date,
            utc_offset_minutes: fields.utc_offset,
            is_active: true,
        },
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tracker)?);
    } else {
        println!(
            "Created \"{}\" ({}), starting {}",
            tracker.title,
            describe_frequency(&tracker.frequency),
            tracker.start_date
        );
        println!("  ID: {}", tracker.id);
    }

    Ok(())
}

pub(crate) fn cmd_tracker_list(
    svc: &PlannerService,
    user: &str,
    all: bool,
    paused: bool,
    json: bool,
) -> Result<()> {
    let filter = match (all, paused) {
        (true, _) => None,
        (false, true) => Some(false),
        (false, false) => Some(true),
    };
    let trackers = svc.list_trackers(user, filter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&trackers)?);
    } else if trackers.is_empty() {
        eprintln!("No trackers found. Use `planner tracker add` to create one.");
    } else {
        print_tracker_table(&trackers);
    }

    Ok(())
}

pub(crate) fn cmd_tracker_show(
    svc: &PlannerService,
    user: &str,
    tracker: &str,
    refresh: bool,
    json: bool,
) -> Result<()> {
    let id = resolve_tracker_id(svc, user, tracker)?;
    if refresh {
        svc.refresh_tracker(user, &id)?;
    }
    let tracker = svc.get_tracker(user, &id)?;
    let stats = svc.tracker_stats(user, &id, None)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "tracker": tracker,
                "stats": stats,
            }))?
        );
        return Ok(());
    }

    println!("{} [{}]", tracker.title, tracker.id);
    if let Some(ref desc) = tracker.description {
        println!("  {desc}");
    }
    println!("  Schedule:    {}", describe_frequency(&tracker.frequency));
    match tracker.end_date {
        Some(end) => println!("  Runs:        {} to {end}", tracker.start_date),
        None => println!("  Runs:        from {}", tracker.start_date),
    }
    if let Some(ref category) = tracker.category {
        println!("  Category:    {category}");
    }
    if !tracker.is_active {
        println!("  Status:      paused");
    }
    println!("  Completions: {}", stats.total_completions);
    println!(
        "  Streak:      {} (best {})",
        stats.current_streak, stats.best_streak
    );
    println!("  Rate:        {}%", stats.completion_rate);
    if let Some(last) = stats.last_completion_date {
        println!("  Last done:   {last}");
    }
    match stats.next_scheduled_date {
        Some(next) => println!("  Next:        {next}"),
        None => println!("  Next:        -"),
    }

    Ok(())
}

pub(crate) fn cmd_tracker_edit(
    svc: &PlannerService,
    user: &str,
    tracker: &str,
    title: Option<String>,
    fields: TrackerFields,
    no_end: bool,
    json: bool,
) -> Result<()> {
    let id = resolve_tracker_id(svc, user, tracker)?;
    let today = svc.today(user)?;

    let frequency = match fields.frequency.as_deref() {
        Some(kind) => Some(parse_frequency(
            kind,
            fields.every,
            fields.days.as_deref(),
            fields.dates.as_deref(),
        )?),
        None if fields.has_schedule_params() => {
            bail!("--every, --days and --dates require --frequency");
        }
        None => None,
    };
    let end_date = if no_end {
        Some(None)
    } else {
        fields
            .end
            .map(|e| parse_date(Some(e), today).map(Some))
            .transpose()?
    };

    let update = UpdateTracker {
        title,
        description: fields.description.map(Some),
        category: fields.category.map(Some),
        icon: fields.icon.map(Some),
        color: fields.color.map(Some),
        project_id: fields.project.map(Some),
        frequency,
        start_date: fields.start.map(|s| parse_date(Some(s), today)).transpose()?,
        end_date,
        utc_offset_minutes: fields.utc_offset.map(Some),
        is_active: None,
    };
    if update.is_empty() {
        bail!("Nothing to update. Pass at least one field (see --help)");
    }

    let updated = svc.update_tracker(user, &id, &update)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&updated)?);
    } else {
        println!(
            "Updated \"{}\" ({})",
            updated.title,
            describe_frequency(&updated.frequency)
        );
    }

    Ok(())
}

pub(crate) fn cmd_tracker_set_active(
    svc: &PlannerService,
    user: &str,
    tracker: &str,
    active: bool,
    json: bool,
) -> Result<()> {
    let id = resolve_tracker_id(svc, user, tracker)?;
    let updated = svc.set_active(user, &id, active)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&updated)?);
    } else if active {
        println!("Resumed \"{}\"", updated.title);
    } else {
        println!("Paused \"{}\". History is kept.", updated.title);
    }

    Ok(())
}

pub(crate) fn cmd_tracker_delete(
    svc: &PlannerService,
    user: &str,
    tracker: &str,
    json: bool,
) -> Result<()> {
    let id = resolve_tracker_id(svc, user, tracker)?;
    let existing = svc.get_tracker(user, &id)?;
    svc.delete_tracker(user, &id)?;

    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!(
            "Deleted \"{}\" and {} completion(s)",
            existing.title, existing.total_completions
        );
    }

    Ok(())
}
