//! Storage layer for the serving core.
//!
//! Provides connection pooling, embedded migrations and the repositories
//! for the prediction/label ledger, monitoring metrics, retraining
//! decisions and the model registry.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

pub mod decisions;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod registry;

pub use decisions::DecisionsRepository;
pub use ledger::PredictionLedger;
pub use metrics::MonitoringMetricsRepository;
pub use models::*;
pub use registry::{ModelRegistry, PromotionOutcome};

/// Creates a connection pool for the given SQLite URL, creating the
/// database file if needed.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the connection fails.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

/// Creates an in-memory pool sharing a single connection. Used by tests
/// and local experimentation; an in-memory database with more than one
/// connection would be one database per connection.
///
/// # Errors
///
/// Returns an error if the connection fails.
pub async fn create_memory_pool() -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
}

/// Runs all pending migrations.
///
/// # Errors
///
/// Returns an error if running migrations fails.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
