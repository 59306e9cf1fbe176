mod completion;
mod export;
mod helpers;
mod import;
mod stats;
mod token;
mod tracker;

use anyhow::{Result, bail};

use planner_core::error::{TrackerError, tracker_error};
use planner_core::service::PlannerService;

pub(crate) use completion::{cmd_done, cmd_undo};
pub(crate) use export::cmd_export;
pub(crate) use import::{cmd_import_csv, cmd_import_json};
pub(crate) use stats::{cmd_calendar, cmd_due, cmd_stats};
pub(crate) use token::{cmd_token_create, cmd_token_list, cmd_token_revoke};
pub(crate) use tracker::{
    TrackerFields, cmd_tracker_add, cmd_tracker_delete, cmd_tracker_edit, cmd_tracker_list,
    cmd_tracker_set_active, cmd_tracker_show,
};

/// Resolve a full tracker id or a unique id prefix among the user's trackers.
pub(super) fn resolve_tracker_id(svc: &PlannerService, user: &str, query: &str) -> Result<String> {
    match svc.get_tracker(user, query) {
        Ok(tracker) => return Ok(tracker.id),
        Err(e) if !matches!(tracker_error(&e), Some(TrackerError::NotFound { .. })) => {
            return Err(e);
        }
        Err(_) => {}
    }

    let matches: Vec<String> = svc
        .list_trackers(user, None)?
        .into_iter()
        .filter(|t| t.id.starts_with(query))
        .map(|t| t.id)
        .collect();

    match matches.as_slice() {
        [id] => Ok(id.clone()),
        [] => Err(TrackerError::tracker_not_found(query).into()),
        _ => bail!(
            "Tracker id '{query}' is ambiguous ({} matches). Use more characters",
            matches.len()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use planner_core::models::NewTracker;

    #[test]
    fn test_resolve_tracker_id_by_prefix() {
        let svc = PlannerService::new_in_memory().unwrap();
        let tracker = svc
            .create_tracker(
                "local",
                &NewTracker::daily("Run", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            )
            .unwrap();

        assert_eq!(
            resolve_tracker_id(&svc, "local", &tracker.id).unwrap(),
            tracker.id
        );
        assert_eq!(
            resolve_tracker_id(&svc, "local", &tracker.id[..6]).unwrap(),
            tracker.id
        );

        let err = resolve_tracker_id(&svc, "local", "zzzz").unwrap_err();
        assert!(matches!(
            tracker_error(&err),
            Some(TrackerError::NotFound { .. })
        ));
    }

    #[test]
    fn test_resolve_tracker_id_ignores_other_users_prefixes() {
        let svc = PlannerService::new_in_memory().unwrap();
        let tracker = svc
            .create_tracker(
                "bob",
                &NewTracker::daily("Run", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            )
            .unwrap();

        assert!(resolve_tracker_id(&svc, "local", &tracker.id[..6]).is_err());
        let err = resolve_tracker_id(&svc, "local", &tracker.id).unwrap_err();
        assert_eq!(tracker_error(&err), Some(&TrackerError::Forbidden));
    }
}
