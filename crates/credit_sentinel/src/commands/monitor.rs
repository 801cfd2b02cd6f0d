//! Monitor-once command: a single monitoring tick.

use std::sync::Arc;

use chrono::Utc;
use config::Config;
use risk_structs::CoreError;
use sqlx::SqlitePool;

use crate::monitoring::{MonitoringEngine, TickOutcome};
use crate::signals::Signals;

/// Runs one monitoring tick and prints its outcome.
///
/// # Errors
///
/// Propagates integrity and storage failures; a degenerate tick (too few
/// samples) is a successful run.
pub async fn run(pool: &SqlitePool, config: Arc<Config>) -> Result<(), CoreError> {
    let engine = MonitoringEngine::new(pool.clone(), config, Arc::new(Signals::default()));

    match engine.tick(Utc::now()).await? {
        TickOutcome::Completed {
            run_id,
            num_predictions,
            drift_detected,
            feature_drift_ratio,
        } => {
            println!(
                "Monitoring run {run_id}: {num_predictions} predictions, \
                 drift_ratio {feature_drift_ratio:.2}, dataset_drift {drift_detected}"
            );
        }
        TickOutcome::InsufficientSamples {
            run_id,
            num_predictions,
        } => {
            println!(
                "Monitoring run {run_id}: insufficient samples ({num_predictions}), analysis skipped"
            );
        }
        TickOutcome::OverlapSkipped { run_id } => {
            println!("Monitoring run {run_id}: overlapping tick skipped");
        }
    }
    Ok(())
}
