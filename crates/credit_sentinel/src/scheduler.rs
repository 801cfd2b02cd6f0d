//! Worker scheduling.
//!
//! Three workers, each single-flight by construction: the monitoring
//! loop on a fixed interval, the retraining loop on its wall-clock
//! schedule (which also runs the staging janitor), and the drift-alert
//! listener feeding the same per-model orchestration entry point.
//! Workers stop between ticks on ctrl-c.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use config::Config;
use database::ModelRegistry;
use risk_structs::TriggerReason;
use shadow_trainer::Trainer;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::monitoring::MonitoringEngine;
use crate::orchestrator::RetrainingOrchestrator;
use crate::signals::{DriftAlert, Signals};

/// Starts all workers and blocks until ctrl-c.
///
/// # Errors
///
/// Returns an error if the shutdown signal cannot be installed.
pub async fn run_workers(
    pool: SqlitePool,
    config: Arc<Config>,
    trainer: Arc<dyn Trainer>,
) -> anyhow::Result<()> {
    let signals = Arc::new(Signals::default());
    let engine = Arc::new(MonitoringEngine::new(
        pool.clone(),
        config.clone(),
        signals.clone(),
    ));
    let orchestrator = Arc::new(RetrainingOrchestrator::new(
        pool.clone(),
        config.clone(),
        trainer,
        signals.clone(),
    ));

    info!(
        monitoring_interval_s = config.monitoring_interval_s,
        retraining_interval_s = config.retraining_interval_s,
        model_name = %config.model_name,
        "workers starting"
    );

    let monitoring = tokio::spawn(monitoring_worker(engine, config.clone()));
    let retraining = tokio::spawn(retraining_worker(
        orchestrator.clone(),
        pool,
        config.clone(),
    ));
    let drift_listener = tokio::spawn(drift_worker(orchestrator, signals.subscribe_drift()));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping workers");

    monitoring.abort();
    retraining.abort();
    drift_listener.abort();
    Ok(())
}

/// Fixed-interval monitoring loop. A tick that runs long is skipped by
/// the engine's own overlap guard; missed interval slots are dropped,
/// not queued.
async fn monitoring_worker(engine: Arc<MonitoringEngine>, config: Arc<Config>) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.monitoring_interval_s));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        match engine.tick(Utc::now()).await {
            Ok(outcome) => info!(?outcome, "monitoring tick finished"),
            // Fatal for this run only; the next tick retries from scratch.
            Err(err) => error!(error = %err, "monitoring tick failed"),
        }
    }
}

/// Wall-clock retraining schedule plus the staging-TTL janitor.
async fn retraining_worker(
    orchestrator: Arc<RetrainingOrchestrator>,
    pool: SqlitePool,
    config: Arc<Config>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.retraining_interval_s));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; retraining at process start is
    // not wanted, so consume it.
    interval.tick().await;

    loop {
        interval.tick().await;

        match orchestrator.run(TriggerReason::Scheduled).await {
            Ok(outcome) => info!(
                action = %outcome.action,
                reason = %outcome.reason,
                "scheduled orchestration finished"
            ),
            Err(err) => error!(error = %err, "scheduled orchestration failed"),
        }

        let ttl = chrono::Duration::seconds(config.staging_ttl_s);
        if let Err(err) =
            ModelRegistry::archive_stale_staging(&pool, &config.model_name, Utc::now(), ttl).await
        {
            error!(error = %err, "staging janitor failed");
        }
    }
}

/// Consumes drift alerts, deduplicating on `run_id` per the
/// at-least-once delivery contract.
async fn drift_worker(
    orchestrator: Arc<RetrainingOrchestrator>,
    mut alerts: broadcast::Receiver<DriftAlert>,
) {
    let mut seen: HashSet<Uuid> = HashSet::new();

    loop {
        match alerts.recv().await {
            Ok(alert) => {
                if !seen.insert(alert.run_id) {
                    continue;
                }
                info!(
                    run_id = %alert.run_id,
                    ratio = alert.feature_drift_ratio,
                    "drift alert received, triggering orchestration"
                );
                match orchestrator
                    .run_with_alert(TriggerReason::DriftAlert, Some(&alert))
                    .await
                {
                    Ok(outcome) => info!(
                        action = %outcome.action,
                        reason = %outcome.reason,
                        "drift-triggered orchestration finished"
                    ),
                    Err(err) => error!(error = %err, "drift-triggered orchestration failed"),
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "drift alerts lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
