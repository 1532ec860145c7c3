mod config;
mod job;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use daylock_scheduler::{DailyScheduler, RunLog};

use config::Config;
use job::CommandJob;

#[derive(Parser)]
#[command(name = "daylock")]
#[command(about = "Daylock — crash-safe, at-most-once-per-day job scheduler")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler loop until terminated
    Run,
    /// Perform a single claim/execute/finalize cycle and exit
    RunOnce,
    /// Show recent runs for the configured job
    History {
        /// Maximum number of runs to show
        #[arg(short, long, default_value_t = 14)]
        limit: usize,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => run_scheduler(config, false).await?,
        Commands::RunOnce => run_scheduler(config, true).await?,
        Commands::History { limit, json } => show_history(&config, limit, json)?,
    }

    Ok(())
}

async fn run_scheduler(config: Config, once: bool) -> Result<()> {
    if !config.enabled {
        info!("Scheduler disabled by DAYLOCK_ENABLED");
        return Ok(());
    }

    let scheduler_config = config.scheduler_config()?;
    let Some(command) = config.job_command.clone() else {
        anyhow::bail!("DAYLOCK_JOB_COMMAND must be set to define the job body");
    };

    info!(
        job = %scheduler_config.job_name,
        db = %config.db_path,
        "Starting Daylock"
    );

    let run_log = RunLog::open(&config.db_path)?;
    let job = Arc::new(CommandJob::new(command));
    let scheduler = Arc::new(DailyScheduler::new(scheduler_config, run_log, job));

    if once {
        let ran = scheduler.run_once().await?;
        info!(ran, "Single cycle finished");
        return Ok(());
    }

    let shutdown = Arc::clone(&scheduler);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.stop();
        }
    });

    scheduler.run_forever().await;
    Ok(())
}

fn show_history(config: &Config, limit: usize, json: bool) -> Result<()> {
    let run_log = RunLog::open(&config.db_path)?;
    let runs = run_log.recent(&config.job_name, limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No runs recorded for job '{}'", config.job_name);
        return Ok(());
    }

    println!(
        "{:<12} {:<8} {:>7}  {:<25} {:<22} error",
        "run_date", "status", "attempt", "started_at", "locked_by"
    );
    for run in runs {
        println!(
            "{:<12} {:<8} {:>7}  {:<25} {:<22} {}",
            run.run_date.to_string(),
            run.status.as_str(),
            run.attempt,
            run.started_at.to_rfc3339(),
            run.locked_by.as_deref().unwrap_or("-"),
            run.error_message.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}
