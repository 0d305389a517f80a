use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use trialwatch::config::Config;
use trialwatch::notify::{RunStatus, TracingNotifier};
use trialwatch::pipeline::RunOutcome;
use trialwatch::store::{SqliteStore, TrialwatchReader};

/// Trial spike detection and video engagement refresh.
#[derive(Parser, Debug)]
#[command(name = "trialwatch", version, about)]
struct Cli {
    /// Config file (defaults to the platform config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate trial volume and, on a spike, refresh video metrics.
    Run {
        /// App to process; repeat for several.
        #[arg(long = "app")]
        apps: Vec<String>,
        /// Process every app listed in the config.
        #[arg(long, conflicts_with = "apps")]
        all: bool,
        /// Day to evaluate (YYYY-MM-DD, UTC). Defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List recorded trigger events for an app.
    Triggers {
        #[arg(long)]
        app: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// List metric deltas recorded for one trigger.
    Deltas {
        #[arg(long)]
        app: String,
        #[arg(long)]
        date: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trialwatch=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let db_path = config.resolved_database_path()?;

    match cli.command {
        Commands::Run { apps, all, date } => {
            let apps = if all { config.apps.clone() } else { apps };
            if apps.is_empty() {
                bail!("no apps given: pass --app <id> or --all with `apps` set in the config");
            }
            let date = date.unwrap_or_else(|| chrono::Utc::now().date_naive());
            run_apps(&config, db_path, &apps, date).await
        }
        Commands::Triggers { app, limit } => {
            let reader = TrialwatchReader::open(&db_path)?;
            let rows = reader.triggers(&app, limit)?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
            Ok(())
        }
        Commands::Deltas { app, date } => {
            let reader = TrialwatchReader::open(&db_path)?;
            let rows = reader.deltas(&app, &date.format("%Y-%m-%d").to_string())?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
            Ok(())
        }
    }
}

async fn run_apps(config: &Config, db_path: PathBuf, apps: &[String], date: NaiveDate) -> Result<()> {
    let store = Arc::new(SqliteStore::open(&db_path)?);
    let coordinator = trialwatch::build_coordinator(config, store, Arc::new(TracingNotifier))
        .context("building pipeline")?;

    let mut unsuccessful = Vec::new();
    for app in apps {
        match coordinator.run(app, date).await {
            Ok(RunOutcome::Processed(summary)) => {
                if summary.status == RunStatus::BatchAborted {
                    unsuccessful.push(app.as_str());
                }
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            Ok(RunOutcome::AlreadyTriggered(event)) => {
                tracing::info!(app_id = app.as_str(), date = %event.date, "already triggered, skipping");
            }
            Ok(RunOutcome::Normal { .. } | RunOutcome::NotEvaluable(_)) => {}
            Err(err) => {
                tracing::error!(app_id = app.as_str(), error = %err, "pipeline run failed");
                unsuccessful.push(app.as_str());
            }
        }
    }

    if !unsuccessful.is_empty() {
        bail!("{} of {} app runs did not complete: {}", unsuccessful.len(), apps.len(), unsuccessful.join(", "));
    }
    Ok(())
}
