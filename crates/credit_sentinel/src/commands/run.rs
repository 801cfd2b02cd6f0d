//! Run command: start the monitoring and retraining workers.

use std::sync::Arc;

use config::Config;
use shadow_trainer::LogisticTrainer;
use sqlx::SqlitePool;

use crate::scheduler;

/// Starts all workers and blocks until ctrl-c.
///
/// # Errors
///
/// Returns an error if worker startup fails.
pub async fn run(pool: &SqlitePool, config: Arc<Config>) -> anyhow::Result<()> {
    scheduler::run_workers(pool.clone(), config, Arc::new(LogisticTrainer::default())).await
}
