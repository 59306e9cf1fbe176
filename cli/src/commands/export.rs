use std::path::Path;

use anyhow::{Context, Result};

use planner_core::service::PlannerService;

/// Write the user's trackers and completions as JSON, to `output` or stdout.
pub(crate) fn cmd_export(
    svc: &PlannerService,
    user: &str,
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let data = svc.export(user)?;
    let body = serde_json::to_string_pretty(&data)?;

    let Some(path) = output else {
        println!("{body}");
        return Ok(());
    };

    std::fs::write(path, &body)
        .with_context(|| format!("Failed to write export file: {}", path.display()))?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "path": path.display().to_string(),
                "trackers": data.trackers.len(),
                "completions": data.completions.len(),
            })
        );
    } else {
        println!(
            "Exported {} tracker(s) and {} completion(s) to {}",
            data.trackers.len(),
            data.completions.len(),
            path.display()
        );
    }

    Ok(())
}
