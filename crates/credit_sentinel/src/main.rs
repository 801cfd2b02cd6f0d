//! Operator CLI for the credit-risk serving core.
//!
//! Exit codes: 0 success, 2 precondition failed (e.g. bootstrap already
//! exists), 3 invariant violation (e.g. rollback to an unknown version),
//! 1 unexpected error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use config::Config;
use risk_structs::{CoreError, TriggerReason};
use tracing::error;
use tracing_subscriber::EnvFilter;

use credit_sentinel::commands;

/// Self-healing serving core for the credit-risk classifier.
#[derive(Parser)]
#[command(name = "credit-sentinel")]
#[command(about = "Monitoring, shadow retraining and gated promotion for the credit-risk model")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the frozen reference baseline from a CSV of feature rows
    BootstrapReference {
        /// CSV file whose header matches the feature schema
        rows_source: PathBuf,
    },

    /// Enqueue one retraining orchestration
    TriggerRetraining {
        /// Trigger reason recorded in the decision (manual, scheduled,
        /// drift_alert)
        #[arg(long, default_value = "manual")]
        reason: String,
    },

    /// Restore an archived model version to production
    Rollback {
        model_name: String,
        version: i64,
    },

    /// Print the production version and recent decisions
    Status,

    /// Run one monitoring tick and exit
    MonitorOnce,

    /// Start the monitoring and retraining workers
    Run,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            let code = err
                .downcast_ref::<CoreError>()
                .map_or(1, CoreError::exit_code);
            ExitCode::from(code)
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let config = Arc::new(Config::from_env()?);

    // The bootstrap command only touches the baseline directory.
    if let Commands::BootstrapReference { rows_source } = &cli.command {
        commands::bootstrap::run(&config, rows_source)?;
        return Ok(());
    }

    let pool = database::create_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    match cli.command {
        Commands::BootstrapReference { .. } => unreachable!("handled above"),
        Commands::TriggerRetraining { reason } => {
            let trigger: TriggerReason = reason
                .parse()
                .map_err(|err: String| anyhow::anyhow!(err))?;
            commands::trigger::run(&pool, config, trigger).await?;
        }
        Commands::Rollback {
            model_name,
            version,
        } => {
            commands::rollback::run(&pool, config, &model_name, version).await?;
        }
        Commands::Status => {
            commands::status::run(&pool, &config).await?;
        }
        Commands::MonitorOnce => {
            commands::monitor::run(&pool, config).await?;
        }
        Commands::Run => {
            commands::run::run(&pool, config).await?;
        }
    }

    Ok(())
}
