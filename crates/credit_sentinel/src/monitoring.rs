//! Monitoring engine: one worker, serialized ticks.
//!
//! Each tick verifies the reference baseline, streams the lookback
//! window out of the ledger, computes proxy metrics and per-feature
//! drift verdicts, persists exactly one metrics row plus a detail
//! artifact, and publishes a drift alert when the dataset-level verdict
//! fires. The engine observes and reports; acting on drift belongs to
//! the orchestrator.

use std::fs;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use config::Config;
use database::{CreateMonitoringMetric, MonitoringMetricsRepository, PredictionLedger};
use drift_analytics::{DriftConfig, DriftDetector, DriftSummary, ProxyAccumulator, ProxyMetrics};
use futures_util::TryStreamExt;
use reference_baseline::BaselineStore;
use risk_structs::{with_retry, CoreError, RetryPolicy};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::signals::{DriftAlert, Signals};

/// What one tick did.
#[derive(Debug)]
pub enum TickOutcome {
    Completed {
        run_id: Uuid,
        num_predictions: u64,
        drift_detected: bool,
        feature_drift_ratio: f64,
    },
    InsufficientSamples {
        run_id: Uuid,
        num_predictions: u64,
    },
    OverlapSkipped {
        run_id: Uuid,
    },
}

/// Per-run artifact with the full per-feature detail.
#[derive(Debug, Serialize)]
struct DriftArtifact<'a> {
    run_at: DateTime<Utc>,
    lookback_hours: i64,
    p_threshold: f64,
    effect_size_floor: f64,
    dataset_threshold: f64,
    proxy_metrics: &'a ProxyMetrics,
    drift: &'a DriftSummary,
}

pub struct MonitoringEngine {
    pool: SqlitePool,
    config: Arc<Config>,
    store: BaselineStore,
    signals: Arc<Signals>,
    retry: RetryPolicy,
    tick_guard: tokio::sync::Mutex<()>,
}

impl MonitoringEngine {
    #[must_use]
    pub fn new(pool: SqlitePool, config: Arc<Config>, signals: Arc<Signals>) -> Self {
        let store = BaselineStore::new(&config.baseline_dir);
        Self {
            pool,
            config,
            store,
            signals,
            retry: RetryPolicy::default(),
            tick_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Executes one monitoring tick at `now`.
    ///
    /// # Errors
    ///
    /// [`CoreError::Integrity`] aborts the tick before any row is
    /// written; storage failures surface after the retry policy is
    /// exhausted and mark the run fatal in the operational log.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickOutcome, CoreError> {
        let lookback = self.config.monitoring_lookback_h;

        // A tick never starts while the previous one is writing; an
        // overlapping attempt records a skip row and returns.
        let Ok(_guard) = self.tick_guard.try_lock() else {
            warn!("monitoring tick overlapped, skipping");
            let run_id = self
                .insert_row(CreateMonitoringMetric::degenerate(
                    now,
                    lookback,
                    0,
                    "overlap_skip",
                ))
                .await?;
            return Ok(TickOutcome::OverlapSkipped { run_id });
        };

        // The baseline digest is verified on every run; a mismatch is
        // fatal for the tick and leaves no metrics row behind.
        let baseline = self.store.load()?;

        let window_start = now - Duration::hours(lookback);
        let mut accumulator = ProxyAccumulator::new();
        let mut columns: Vec<Vec<f64>> = vec![Vec::new(); baseline.feature_schema.len()];

        {
            let mut stream =
                PredictionLedger::stream_predictions_since(&self.pool, window_start, now);
            while let Some(record) = stream.try_next().await? {
                accumulator.observe(record.predicted_class, record.predicted_probability);
                for (idx, value) in record.features.0.iter().enumerate() {
                    if let (Some(value), Some(column)) = (value, columns.get_mut(idx)) {
                        column.push(*value);
                    }
                }
            }
        }

        let num_predictions = accumulator.count();
        if num_predictions < self.config.min_samples_for_monitoring {
            info!(
                num_predictions,
                min_required = self.config.min_samples_for_monitoring,
                "insufficient samples for statistical analysis"
            );
            let run_id = self
                .insert_row(CreateMonitoringMetric::degenerate(
                    now,
                    lookback,
                    num_predictions as i64,
                    "insufficient_samples",
                ))
                .await?;
            return Ok(TickOutcome::InsufficientSamples {
                run_id,
                num_predictions,
            });
        }

        let Some(proxy) = accumulator.finish() else {
            return Err(CoreError::InvariantViolation(
                "non-empty window produced no proxy metrics".into(),
            ));
        };

        let reference_columns: Vec<Vec<f64>> = (0..baseline.feature_schema.len())
            .map(|idx| baseline.column_values(idx))
            .collect();
        let drift_config = DriftConfig {
            p_threshold: self.config.drift_p_threshold,
            effect_size_floor: self.config.drift_effect_size_floor,
            dataset_threshold: self.config.dataset_drift_threshold,
            ..DriftConfig::default()
        };
        let detector =
            DriftDetector::new(&baseline.feature_schema, &reference_columns, drift_config);
        let summary = detector.detect(&columns);

        let artifact_ref = self.write_artifact(now, lookback, &proxy, &summary)?;

        let run_id = self
            .insert_row(CreateMonitoringMetric {
                run_at: now,
                lookback_hours: lookback,
                num_predictions: num_predictions as i64,
                positive_rate: Some(proxy.positive_rate),
                probability_mean: Some(proxy.probability_mean),
                probability_std: Some(proxy.probability_std),
                entropy: Some(proxy.entropy),
                dataset_drift_detected: summary.dataset_drift_detected,
                feature_drift_ratio: summary.feature_drift_ratio,
                num_drifted_features: summary.num_drifted_features as i64,
                num_evaluated_features: summary.num_evaluated_features as i64,
                drift_artifact_ref: Some(artifact_ref),
                drift_artifact_format: Some("json".into()),
                reason: None,
            })
            .await?;

        info!(
            %run_id,
            num_predictions,
            drifted = summary.num_drifted_features,
            evaluated = summary.num_evaluated_features,
            ratio = summary.feature_drift_ratio,
            dataset_drift = summary.dataset_drift_detected,
            "monitoring tick complete"
        );

        if summary.dataset_drift_detected {
            self.signals.publish_drift(DriftAlert {
                run_id,
                run_at: now,
                feature_drift_ratio: summary.feature_drift_ratio,
                drifted_features: summary.drifted_features.clone(),
            });
        }

        Ok(TickOutcome::Completed {
            run_id,
            num_predictions,
            drift_detected: summary.dataset_drift_detected,
            feature_drift_ratio: summary.feature_drift_ratio,
        })
    }

    async fn insert_row(&self, row: CreateMonitoringMetric) -> Result<Uuid, CoreError> {
        with_retry(&self.retry, "monitoring_metrics.insert", || {
            let row = row.clone();
            async move { MonitoringMetricsRepository::insert(&self.pool, row).await }
        })
        .await
    }

    fn write_artifact(
        &self,
        run_at: DateTime<Utc>,
        lookback_hours: i64,
        proxy: &ProxyMetrics,
        summary: &DriftSummary,
    ) -> Result<String, CoreError> {
        let artifact = DriftArtifact {
            run_at,
            lookback_hours,
            p_threshold: self.config.drift_p_threshold,
            effect_size_floor: self.config.drift_effect_size_floor,
            dataset_threshold: self.config.dataset_drift_threshold,
            proxy_metrics: proxy,
            drift: summary,
        };

        let dir = self.config.artifact_dir.join("drift");
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!(
            "drift_summary_{}.json",
            run_at.format("%Y%m%d_%H%M%S")
        ));
        fs::write(&path, serde_json::to_vec_pretty(&artifact)?)?;

        Ok(path.to_string_lossy().into_owned())
    }
}
