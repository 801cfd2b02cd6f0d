//! Rollback command: manual archived -> production restore.

use std::sync::Arc;

use config::Config;
use risk_structs::CoreError;
use sqlx::SqlitePool;

use crate::promoter::ModelPromoter;
use crate::signals::Signals;

/// Runs the rollback command.
///
/// # Errors
///
/// Fails with an invariant violation for an unknown version or a target
/// that is not archived.
pub async fn run(
    pool: &SqlitePool,
    config: Arc<Config>,
    model_name: &str,
    version: i64,
) -> Result<(), CoreError> {
    let promoter = ModelPromoter::new(pool.clone(), config, Arc::new(Signals::default()));
    let outcome = promoter.rollback(model_name, version).await?;

    println!(
        "Rolled back {model_name} to v{} (archived v{})",
        outcome.promoted_version,
        outcome
            .archived_version
            .map_or_else(|| "-".into(), |v| v.to_string()),
    );
    Ok(())
}
