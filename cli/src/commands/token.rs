use anyhow::{Result, bail};
use tabled::{Table, Tabled, settings::Style};

use planner_core::service::PlannerService;

use crate::config::generate_token;

pub(crate) fn cmd_token_create(
    svc: &PlannerService,
    user: &str,
    label: Option<&str>,
    json: bool,
) -> Result<()> {
    let token = generate_token();
    let created = svc.create_api_token(user, label, &token)?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "id": created.id,
                "user_id": created.user_id,
                "label": created.label,
                "token": token,
            })
        );
    } else {
        println!("Created API token {} for {}", created.id, created.user_id);
        println!("  {token}");
        eprintln!("Store it now, it cannot be shown again.");
        eprintln!("Include in requests: Authorization: Bearer {token}");
    }

    Ok(())
}

pub(crate) fn cmd_token_list(svc: &PlannerService, user: &str, json: bool) -> Result<()> {
    let tokens = svc.list_api_tokens(user)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tokens)?);
    } else if tokens.is_empty() {
        eprintln!("No API tokens. Use `planner token create` to make one.");
    } else {
        #[derive(Tabled)]
        struct TokenRow {
            #[tabled(rename = "ID")]
            id: i64,
            #[tabled(rename = "Label")]
            label: String,
            #[tabled(rename = "Token")]
            prefix: String,
            #[tabled(rename = "Created")]
            created_at: String,
        }

        let rows: Vec<TokenRow> = tokens
            .iter()
            .map(|t| TokenRow {
                id: t.id,
                label: t.label.clone().unwrap_or_default(),
                prefix: format!("{}...", t.prefix),
                created_at: t.created_at.clone(),
            })
            .collect();

        println!("{}", Table::new(&rows).with(Style::rounded()));
    }

    Ok(())
}

pub(crate) fn cmd_token_revoke(svc: &PlannerService, user: &str, id: i64, json: bool) -> Result<()> {
    if !svc.revoke_api_token(user, id)? {
        bail!("No API token with id {id}");
    }

    if json {
        println!("{}", serde_json::json!({ "revoked": id }));
    } else {
        println!("Revoked API token {id}");
    }

    Ok(())
}
