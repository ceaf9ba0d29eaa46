//! cronlatch-worker: polling worker and inspection CLI for the scheduler.
//!
//! Any number of workers (and embedding processes) may point at the same
//! database; claims are exclusive per job instant.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use cronlatch_core::{CronlatchConfig, CONFIG_PATH_ENV};
use cronlatch_scheduler::{
    Dispatcher, FailurePolicy, JobStore, NewJob, RecurrenceRule, SchedulerEngine,
    SchedulerHandle, SqliteStore, WATERMARK_NEVER,
};

mod handlers;

// ── CLI ─────────────────────────────────────────────────────────────

/// Run due scheduled jobs exactly once per instant across all workers.
#[derive(Parser, Debug)]
#[command(name = "cronlatch-worker", version, about)]
struct Cli {
    /// Path to cronlatch.toml.
    #[arg(long, env = CONFIG_PATH_ENV)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll for due jobs until interrupted.
    Run,
    /// Execute a single dispatch pass and print its report.
    Pass,
    /// List jobs.
    Jobs {
        /// Include inactive jobs and jobs in disabled groups.
        #[arg(long)]
        all: bool,
    },
    /// Register a job.
    Add {
        name: String,
        /// Rule text, e.g. "0,30 9-17 dow:1-5".
        rule: String,
        #[arg(long, default_value = handlers::LOG_HANDLER)]
        handler: String,
        #[arg(long)]
        group: Option<String>,
        /// Explicit job id (a UUID is generated otherwise).
        #[arg(long)]
        id: Option<String>,
    },
    /// Delete a job.
    Remove { id: String },
    /// Enable or disable every job in a group.
    Group {
        name: String,
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
    },
    /// Print the dispatch watermark.
    Watermark {
        /// Recompute it from the store first.
        #[arg(long)]
        rebuild: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = CronlatchConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("config load failed ({e}), using defaults");
        CronlatchConfig::default()
    });

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.as_str().into()),
        )
        .init();

    config
        .database
        .ensure_parent_dir()
        .context("creating database directory")?;
    info!(path = %config.database.path, "opening scheduler database");
    let store: Arc<dyn JobStore> = Arc::new(
        SqliteStore::open(&config.database.path)
            .with_context(|| format!("opening {}", config.database.path))?,
    );

    match cli.command {
        Command::Run => run(store, &config).await,
        Command::Pass => {
            let dispatcher = dispatcher(store, &config);
            let report = tokio::task::spawn_blocking(move || dispatcher.run_due_pass(Utc::now()))
                .await??;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Jobs { all } => {
            let handle = SchedulerHandle::new(store);
            let jobs = if all {
                handle.list_jobs()?
            } else {
                handle.list_active_jobs()?
            };
            println!("{}", serde_json::to_string_pretty(&jobs)?);
            Ok(())
        }
        Command::Add {
            name,
            rule,
            handler,
            group,
            id,
        } => {
            let rule: RecurrenceRule = rule.parse()?;
            let mut new = NewJob::new(name, handler, rule);
            if let Some(id) = id {
                new = new.with_id(id);
            }
            if let Some(group) = group {
                new = new.in_group(group);
            }
            let job = SchedulerHandle::new(store).add_job(new)?;
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(())
        }
        Command::Remove { id } => {
            SchedulerHandle::new(store).remove_job(&id)?;
            Ok(())
        }
        Command::Group {
            name,
            enable,
            disable,
        } => {
            if enable == disable {
                anyhow::bail!("pass exactly one of --enable or --disable");
            }
            SchedulerHandle::new(store).set_group_enabled(&name, enable)?;
            Ok(())
        }
        Command::Watermark { rebuild } => {
            let handle = SchedulerHandle::new(store);
            let value = if rebuild {
                handle.watermark().rebuild()?
            } else {
                handle.watermark().get()?
            };
            println!("{}", describe_watermark(value));
            Ok(())
        }
    }
}

fn dispatcher(store: Arc<dyn JobStore>, config: &CronlatchConfig) -> Dispatcher {
    Dispatcher::new(store, handlers::builtin_registry())
        .with_failure_policy(FailurePolicy::from(&config.scheduler))
}

async fn run(store: Arc<dyn JobStore>, config: &CronlatchConfig) -> anyhow::Result<()> {
    let dispatcher = Arc::new(dispatcher(store, config));
    dispatcher.watermark().rebuild()?;
    let engine = SchedulerEngine::from_config(dispatcher, &config.scheduler);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(engine.run(shutdown_rx));

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("interrupt received, stopping");
    if shutdown_tx.send(true).is_err() {
        warn!("scheduler engine already stopped");
    }
    worker.await?;
    Ok(())
}

fn describe_watermark(value: i64) -> String {
    if value == WATERMARK_NEVER {
        return "never (no schedulable jobs)".to_string();
    }
    match DateTime::from_timestamp(value, 0) {
        Some(t) => format!("{value} ({})", t.to_rfc3339()),
        None => value.to_string(),
    }
}
