use std::path::Path;

use anyhow::{Context, Result};

use planner_core::models::ExportData;
use planner_core::service::PlannerService;

use super::helpers::json_error;
use super::resolve_tracker_id;

pub(crate) fn cmd_import_csv(
    svc: &PlannerService,
    user: &str,
    tracker: &str,
    path: &Path,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let id = resolve_tracker_id(svc, user, tracker)?;
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;

    let summary = svc.import_completion_csv(user, &id, &data, dry_run)?;

    if summary.rows_parsed == 0 {
        if json {
            println!("{}", json_error("No rows found in CSV file"));
        } else {
            eprintln!("No rows found in CSV file.");
        }
        return Ok(());
    }

    let span = match (summary.first_date, summary.last_date) {
        (Some(first), Some(last)) => format!("{first} to {last}"),
        _ => "-".to_string(),
    };

    if json {
        println!(
            "{}",
            serde_json::json!({
                "dry_run": dry_run,
                "rows_parsed": summary.rows_parsed,
                "completions_recorded": summary.completions_recorded,
                "duplicates_skipped": summary.duplicates_skipped,
                "out_of_range": summary.out_of_range,
                "first_date": summary.first_date,
                "last_date": summary.last_date,
            })
        );
    } else if dry_run {
        println!("Dry run, no changes made.\n");
        println!("  Rows parsed:          {}", summary.rows_parsed);
        println!("  Completions to add:   {}", summary.completions_recorded);
        println!("  Duplicates skipped:   {}", summary.duplicates_skipped);
        println!("  Outside tracker range: {}", summary.out_of_range);
        println!("  Dates spanned:        {span}");
    } else {
        println!("Import complete.\n");
        println!("  Rows parsed:          {}", summary.rows_parsed);
        println!("  Completions added:    {}", summary.completions_recorded);
        println!("  Duplicates skipped:   {}", summary.duplicates_skipped);
        println!("  Outside tracker range: {}", summary.out_of_range);
        println!("  Dates spanned:        {span}");
    }

    Ok(())
}

pub(crate) fn cmd_import_json(
    svc: &PlannerService,
    user: &str,
    path: &Path,
    json: bool,
) -> Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    let data: ExportData = serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("Failed to parse export file: {}", path.display()))?;

    let summary = svc.import(user, &data)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Import complete.\n");
        println!("  Trackers imported:    {}", summary.trackers_imported);
        println!("  Completions imported: {}", summary.completions_imported);
        println!("  Completions skipped:  {}", summary.completions_skipped);
    }

    Ok(())
}
