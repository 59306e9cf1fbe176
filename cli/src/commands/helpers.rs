use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use planner_core::models::{Frequency, FrequencyFields, FrequencyKind, Tracker};

const WEEKDAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Resolve a date argument against `today` (the user's local date).
pub(crate) fn parse_date(date_str: Option<String>, today: NaiveDate) -> Result<NaiveDate> {
    match date_str {
        None => Ok(today),
        Some(s) => match s.as_str() {
            "today" => Ok(today),
            "yesterday" => Ok(today - chrono::Duration::days(1)),
            "tomorrow" => Ok(today + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// Parse a weekday given as a name ("mon", "Monday") or an index (0 = Sunday).
pub(crate) fn parse_weekday(s: &str) -> Result<i64> {
    let s = s.trim();
    if let Ok(idx) = s.parse::<i64>() {
        return Ok(idx);
    }
    let lower = s.to_lowercase();
    WEEKDAY_NAMES
        .iter()
        .position(|name| lower.starts_with(&name.to_lowercase()))
        .and_then(|i| i64::try_from(i).ok())
        .with_context(|| format!("Invalid weekday '{s}'. Use sun..sat or 0..6"))
}

/// Build a schedule rule from CLI flags.
///
/// `days` is a comma list of weekdays for `weekly`; `dates` a comma list of
/// `YYYY-MM-DD` dates for `custom`.
pub(crate) fn parse_frequency(
    kind: &str,
    every: Option<u32>,
    days: Option<&str>,
    dates: Option<&str>,
) -> Result<Frequency> {
    let kind = FrequencyKind::parse(kind)?;

    let target_days = days
        .map(|list| {
            list.split(',')
                .filter(|d| !d.trim().is_empty())
                .map(parse_weekday)
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?;
    let custom_dates = dates
        .map(|list| {
            list.split(',')
                .filter(|d| !d.trim().is_empty())
                .map(|d| {
                    NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d")
                        .with_context(|| format!("Invalid date '{d}'. Use YYYY-MM-DD"))
                })
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?;

    if kind == FrequencyKind::Weekly && target_days.is_none() {
        bail!("--days is required for weekly trackers (e.g. --days mon,wed,fri)");
    }
    if kind == FrequencyKind::Custom && custom_dates.is_none() {
        bail!("--dates is required for custom trackers (e.g. --dates 2024-05-01,2024-05-15)");
    }

    let fields = FrequencyFields {
        frequency: kind,
        frequency_value: every.map(i64::from),
        target_days,
        custom_dates,
    };
    Ok(Frequency::from_fields(&fields)?)
}

/// Short human description of a schedule rule, e.g. "every 3 days".
pub(crate) fn describe_frequency(frequency: &Frequency) -> String {
    match frequency {
        Frequency::Once => "once".to_string(),
        Frequency::Daily => "daily".to_string(),
        Frequency::EveryXDays { interval: 1 } => "every day".to_string(),
        Frequency::EveryXDays { interval } => format!("every {interval} days"),
        Frequency::Weekly { days } if days.is_empty() => "weekly (no days)".to_string(),
        Frequency::Weekly { days } => days
            .iter()
            .map(|d| WEEKDAY_NAMES[usize::from(*d)])
            .collect::<Vec<_>>()
            .join(", "),
        Frequency::Monthly => "monthly".to_string(),
        Frequency::Custom { dates } => format!("{} custom dates", dates.len()),
    }
}

pub(crate) fn print_tracker_table(trackers: &[Tracker]) {
    #[derive(Tabled)]
    struct TrackerRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Schedule")]
        schedule: String,
        #[tabled(rename = "Streak")]
        streak: u32,
        #[tabled(rename = "Best")]
        best: u32,
        #[tabled(rename = "Done")]
        total: u32,
        #[tabled(rename = "Status")]
        status: String,
    }

    let rows: Vec<TrackerRow> = trackers
        .iter()
        .map(|t| TrackerRow {
            id: short_id(&t.id),
            title: truncate(&t.title, 30),
            schedule: describe_frequency(&t.frequency),
            streak: t.current_streak,
            best: t.best_streak,
            total: t.total_completions,
            status: if t.is_active { "active" } else { "paused" }.to_string(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..6)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

/// First eight characters of an id, enough to recognise it in a table.
pub(crate) fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_parse_date_none() {
        assert_eq!(parse_date(None, d(2024, 3, 1)).unwrap(), d(2024, 3, 1));
    }

    #[test]
    fn test_parse_date_keywords() {
        let today = d(2024, 3, 1);
        assert_eq!(parse_date(Some("today".to_string()), today).unwrap(), today);
        assert_eq!(
            parse_date(Some("yesterday".to_string()), today).unwrap(),
            d(2024, 2, 29)
        );
        assert_eq!(
            parse_date(Some("tomorrow".to_string()), today).unwrap(),
            d(2024, 3, 2)
        );
    }

    #[test]
    fn test_parse_date_iso() {
        let date = parse_date(Some("2024-01-15".to_string()), d(2024, 3, 1)).unwrap();
        assert_eq!(date, d(2024, 1, 15));
    }

    #[test]
    fn test_parse_date_invalid() {
        assert!(parse_date(Some("nope".to_string()), d(2024, 3, 1)).is_err());
    }

    #[test]
    fn test_parse_weekday() {
        assert_eq!(parse_weekday("sun").unwrap(), 0);
        assert_eq!(parse_weekday("Monday").unwrap(), 1);
        assert_eq!(parse_weekday(" fri ").unwrap(), 5);
        assert_eq!(parse_weekday("6").unwrap(), 6);
        assert!(parse_weekday("mo").is_err());
        assert!(parse_weekday("funday").is_err());
    }

    #[test]
    fn test_parse_frequency_weekly() {
        let f = parse_frequency("weekly", None, Some("mon,wed,fri"), None).unwrap();
        assert_eq!(
            f,
            Frequency::Weekly {
                days: [1, 3, 5].into_iter().collect()
            }
        );
    }

    #[test]
    fn test_parse_frequency_every_x_days() {
        let f = parse_frequency("every-x-days", Some(3), None, None).unwrap();
        assert_eq!(f, Frequency::EveryXDays { interval: 3 });

        assert!(parse_frequency("every_x_days", None, None, None).is_err());
        assert!(parse_frequency("every_x_days", Some(0), None, None).is_err());
    }

    #[test]
    fn test_parse_frequency_requires_parameters() {
        assert!(parse_frequency("weekly", None, None, None).is_err());
        assert!(parse_frequency("custom", None, None, None).is_err());
        assert!(parse_frequency("weekly", None, Some("mon,9"), None).is_err());
        assert!(parse_frequency("hourly", None, None, None).is_err());
    }

    #[test]
    fn test_parse_frequency_custom() {
        let f = parse_frequency("custom", None, None, Some("2024-05-15, 2024-05-01")).unwrap();
        let Frequency::Custom { dates } = f else {
            panic!("expected custom frequency");
        };
        assert_eq!(
            dates.into_iter().collect::<Vec<_>>(),
            vec![d(2024, 5, 1), d(2024, 5, 15)]
        );
    }

    #[test]
    fn test_describe_frequency() {
        assert_eq!(describe_frequency(&Frequency::Daily), "daily");
        assert_eq!(
            describe_frequency(&Frequency::EveryXDays { interval: 3 }),
            "every 3 days"
        );
        assert_eq!(
            describe_frequency(&Frequency::Weekly {
                days: [1, 3, 5].into_iter().collect()
            }),
            "Mon, Wed, Fri"
        );
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world this is long", 10), "hello w...");
    }

    #[test]
    fn test_truncate_utf8() {
        assert_eq!(truncate("Méditation du matin", 10), "Méditat...");
        assert_eq!(truncate("日本語の勉強をする", 8), "日本語の勉...");
    }
}
