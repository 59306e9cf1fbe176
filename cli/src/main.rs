mod commands;
mod config;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    TrackerFields, cmd_calendar, cmd_done, cmd_due, cmd_export, cmd_import_csv, cmd_import_json,
    cmd_stats, cmd_token_create, cmd_token_list, cmd_token_revoke, cmd_tracker_add,
    cmd_tracker_delete, cmd_tracker_edit, cmd_tracker_list, cmd_tracker_set_active,
    cmd_tracker_show, cmd_undo,
};
use crate::config::Config;
use planner_core::service::PlannerService;

#[derive(Parser)]
#[command(
    name = "planner",
    version,
    about = "A local-first habit tracker",
    long_about = "Track habits on daily, weekly, monthly or custom schedules, \
                  keep streaks, and serve them over a small REST API."
)]
struct Cli {
    /// Act as this user (default: `default_user` from config.toml)
    #[arg(long, global = true)]
    user: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, inspect and manage trackers
    Tracker {
        #[command(subcommand)]
        command: TrackerCommands,
    },
    /// Mark a tracker done for a day
    Done {
        /// Tracker ID (or unique prefix)
        tracker: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Optional notes
        #[arg(long)]
        notes: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove the completion recorded for a day
    Undo {
        /// Tracker ID (or unique prefix)
        tracker: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show streaks and completion rate for a tracker
    Stats {
        /// Tracker ID (or unique prefix)
        tracker: String,
        /// Compute as of this date (default: today)
        #[arg(long)]
        as_of: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show scheduled and completed days for a tracker
    Calendar {
        /// Tracker ID (or unique prefix)
        tracker: String,
        /// First day (default: four weeks before --to)
        #[arg(long)]
        from: Option<String>,
        /// Last day (default: today)
        #[arg(long)]
        to: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List trackers scheduled for a day
    Due {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import data from other sources
    Import {
        #[command(subcommand)]
        command: ImportCommands,
    },
    /// Export all trackers and completions as JSON
    Export {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Output a JSON summary (with --output)
        #[arg(long)]
        json: bool,
    },
    /// Manage API tokens for the REST server
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on (default: server.port from config.toml, else 8080)
        #[arg(short, long)]
        port: Option<u16>,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long)]
        bind: Option<String>,
        /// Disable token authentication and act as the default user
        #[arg(long)]
        no_auth: bool,
    },
}

#[derive(Subcommand)]
enum TrackerCommands {
    /// Create a tracker
    Add {
        /// Tracker title
        title: String,
        #[command(flatten)]
        fields: TrackerFields,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List trackers (active only by default)
    List {
        /// Include paused trackers
        #[arg(short, long)]
        all: bool,
        /// Show only paused trackers
        #[arg(long, conflicts_with = "all")]
        paused: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a tracker with its current statistics
    Show {
        /// Tracker ID (or unique prefix)
        tracker: String,
        /// Rebuild cached streaks from the completion log first
        #[arg(long)]
        refresh: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change a tracker's title, schedule or details
    Edit {
        /// Tracker ID (or unique prefix)
        tracker: String,
        /// New title
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        fields: TrackerFields,
        /// Remove the end date
        #[arg(long, conflicts_with = "end")]
        no_end: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Pause a tracker (kept, but never scheduled)
    Pause {
        /// Tracker ID (or unique prefix)
        tracker: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resume a paused tracker
    Resume {
        /// Tracker ID (or unique prefix)
        tracker: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a tracker and all its completions
    Delete {
        /// Tracker ID (or unique prefix)
        tracker: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ImportCommands {
    /// Import completion history for a tracker from a CSV file (Date[,Notes])
    Csv {
        /// Tracker ID (or unique prefix)
        tracker: String,
        /// Path to the CSV file
        file: PathBuf,
        /// Show what would be imported without writing to the database
        #[arg(long)]
        dry_run: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import a JSON file written by `planner export`
    Json {
        /// Path to the export file
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Create a new API token (shown once)
    Create {
        /// Label to recognise the token by
        #[arg(long)]
        label: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List API tokens
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Revoke an API token by ID
    Revoke {
        /// Token ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.settings.log_level);

    let svc = PlannerService::new(&config.db_path.to_string_lossy())?;
    let user = cli
        .user
        .unwrap_or_else(|| config.settings.default_user.clone());
    if let Some(offset) = config.settings.default_utc_offset_minutes {
        if svc.default_utc_offset(&user)?.is_none() {
            svc.set_default_utc_offset(&user, Some(offset))?;
        }
    }
    tracing::debug!(db = %config.db_path.display(), user = %user, "opened planner database");

    match cli.command {
        Commands::Tracker { command } => match command {
            TrackerCommands::Add {
                title,
                fields,
                json,
            } => cmd_tracker_add(&svc, &user, &title, fields, json),
            TrackerCommands::List { all, paused, json } => {
                cmd_tracker_list(&svc, &user, all, paused, json)
            }
            TrackerCommands::Show {
                tracker,
                refresh,
                json,
            } => cmd_tracker_show(&svc, &user, &tracker, refresh, json),
            TrackerCommands::Edit {
                tracker,
                title,
                fields,
                no_end,
                json,
            } => cmd_tracker_edit(&svc, &user, &tracker, title, fields, no_end, json),
            TrackerCommands::Pause { tracker, json } => {
                cmd_tracker_set_active(&svc, &user, &tracker, false, json)
            }
            TrackerCommands::Resume { tracker, json } => {
                cmd_tracker_set_active(&svc, &user, &tracker, true, json)
            }
            TrackerCommands::Delete { tracker, json } => {
                cmd_tracker_delete(&svc, &user, &tracker, json)
            }
        },
        Commands::Done {
            tracker,
            date,
            notes,
            json,
        } => cmd_done(&svc, &user, &tracker, date, notes, json),
        Commands::Undo {
            tracker,
            date,
            json,
        } => cmd_undo(&svc, &user, &tracker, date, json),
        Commands::Stats {
            tracker,
            as_of,
            json,
        } => cmd_stats(&svc, &user, &tracker, as_of, json),
        Commands::Calendar {
            tracker,
            from,
            to,
            json,
        } => cmd_calendar(&svc, &user, &tracker, from, to, json),
        Commands::Due { date, json } => cmd_due(&svc, &user, date, json),
        Commands::Import { command } => match command {
            ImportCommands::Csv {
                tracker,
                file,
                dry_run,
                json,
            } => cmd_import_csv(&svc, &user, &tracker, &file, dry_run, json),
            ImportCommands::Json { file, json } => cmd_import_json(&svc, &user, &file, json),
        },
        Commands::Export { output, json } => cmd_export(&svc, &user, output.as_deref(), json),
        Commands::Token { command } => match command {
            TokenCommands::Create { label, json } => {
                cmd_token_create(&svc, &user, label.as_deref(), json)
            }
            TokenCommands::List { json } => cmd_token_list(&svc, &user, json),
            TokenCommands::Revoke { id, json } => cmd_token_revoke(&svc, &user, id, json),
        },
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let port = port.unwrap_or(config.settings.server.port);
            let bind = bind.unwrap_or_else(|| config.settings.server.bind.clone());
            let auth = if no_auth {
                server::Auth::Disabled { user }
            } else {
                server::ensure_token(&svc, &user)?;
                server::Auth::Tokens
            };
            server::start_server(svc, port, &bind, auth).await
        }
    }
}
