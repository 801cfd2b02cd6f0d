//! Trigger-retraining command: one orchestration, synchronously.

use std::sync::Arc;

use config::Config;
use risk_structs::{CoreError, TriggerReason};
use shadow_trainer::LogisticTrainer;
use sqlx::SqlitePool;

use crate::orchestrator::RetrainingOrchestrator;
use crate::signals::Signals;

/// Runs one retraining orchestration and prints the recorded decision.
///
/// # Errors
///
/// Returns an error for failures outside the decision taxonomy; a skip
/// or reject decision is a successful run.
pub async fn run(
    pool: &SqlitePool,
    config: Arc<Config>,
    trigger: TriggerReason,
) -> Result<(), CoreError> {
    let orchestrator = RetrainingOrchestrator::new(
        pool.clone(),
        config,
        Arc::new(LogisticTrainer::default()),
        Arc::new(Signals::default()),
    );

    let outcome = orchestrator.run(trigger).await?;

    let gate = outcome
        .failed_gate
        .map_or_else(String::new, |g| format!(" [{g}]"));
    println!(
        "Decision {}: {}{gate} {}",
        outcome.decision_id, outcome.action, outcome.reason
    );
    if let Some(version) = outcome.shadow_version {
        println!("Shadow version: v{version}");
    }
    Ok(())
}
