//! Retraining orchestrator.
//!
//! One single-flight worker per model name. On trigger it checks data
//! eligibility fail-closed, assembles a temporal train/replay split,
//! trains a shadow under a deadline, replays both models over identical
//! labeled rows and hands the evidence to the gate. Every invocation
//! records exactly one decision row, whether or not training ran.

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use config::Config;
use dashmap::DashMap;
use database::{
    CreateDecision, CreateModelVersion, DecisionsRepository, ModelRegistry,
    MonitoringMetricRecord, MonitoringMetricsRepository, PredictionLedger,
};
use model_eval::{
    build_segment_specs, compare, compare_segments, evaluate, evaluate_gates,
    ClassificationMetrics, GateEvidence, GateOutcome, GateThresholds, ModelComparison,
};
use reference_baseline::BaselineStore;
use risk_structs::{
    with_retry, CoreError, DecisionAction, FailedGate, FeatureRow, RetryPolicy, TriggerReason,
};
use serde::Serialize;
use shadow_trainer::{temporal_split, LabeledRow, TrainOutcome, Trainer};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::promoter::ModelPromoter;
use crate::signals::{DriftAlert, Signals};

/// Result of one orchestration, mirroring the recorded decision row.
#[derive(Debug, Clone)]
pub struct OrchestrationOutcome {
    pub decision_id: Uuid,
    pub action: DecisionAction,
    pub failed_gate: Option<FailedGate>,
    pub reason: String,
    pub shadow_version: Option<i64>,
}

/// Everything a decision row needs besides the verdict itself.
struct DecisionContext {
    trigger: TriggerReason,
    drift: Option<MonitoringMetricRecord>,
    drifted_features: Option<Vec<String>>,
    labeled_samples: i64,
    coverage_pct: f64,
    production_version: Option<i64>,
}

/// Evaluation artifact persisted per gate run.
#[derive(Serialize)]
struct EvaluationArtifact<'a> {
    decided_at: DateTime<Utc>,
    model_name: &'a str,
    production_version: Option<i64>,
    shadow_version: i64,
    thresholds: &'a GateThresholds,
    evidence: &'a GateEvidence,
    outcome: &'a GateOutcome,
    production_metrics: &'a ClassificationMetrics,
    shadow_metrics: &'a ClassificationMetrics,
    comparison: &'a ModelComparison,
}

pub struct RetrainingOrchestrator {
    pool: SqlitePool,
    config: Arc<Config>,
    store: BaselineStore,
    trainer: Arc<dyn Trainer>,
    promoter: ModelPromoter,
    locks: DashMap<String, Arc<Mutex<()>>>,
    retry: RetryPolicy,
}

impl RetrainingOrchestrator {
    #[must_use]
    pub fn new(
        pool: SqlitePool,
        config: Arc<Config>,
        trainer: Arc<dyn Trainer>,
        signals: Arc<Signals>,
    ) -> Self {
        let store = BaselineStore::new(&config.baseline_dir);
        let promoter = ModelPromoter::new(pool.clone(), config.clone(), signals);
        Self {
            pool,
            config,
            store,
            trainer,
            promoter,
            locks: DashMap::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Runs one orchestration for the configured model name.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures outside the decision taxonomy
    /// (reference corruption, storage down beyond retries); everything
    /// else is absorbed into the recorded decision.
    pub async fn run(&self, trigger: TriggerReason) -> Result<OrchestrationOutcome, CoreError> {
        self.run_with_alert(trigger, None).await
    }

    /// Like [`Self::run`], carrying the drifted-feature snapshot of the
    /// alert that triggered it.
    ///
    /// # Errors
    ///
    /// See [`Self::run`].
    pub async fn run_with_alert(
        &self,
        trigger: TriggerReason,
        alert: Option<&DriftAlert>,
    ) -> Result<OrchestrationOutcome, CoreError> {
        let model_name = self.config.model_name.clone();
        let now = Utc::now();

        let drift = MonitoringMetricsRepository::get_recent(&self.pool, 1)
            .await?
            .into_iter()
            .next();
        let mut ctx = DecisionContext {
            trigger,
            drift,
            drifted_features: alert.map(|a| a.drifted_features.clone()),
            labeled_samples: 0,
            coverage_pct: 0.0,
            production_version: None,
        };

        // At most one orchestration in flight per model name; contending
        // triggers are dropped with a recorded skip.
        let lock = self
            .locks
            .entry(model_name.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let Ok(_guard) = lock.try_lock() else {
            warn!(model_name = %model_name, trigger = %trigger, "orchestration already in flight");
            return self
                .record_decision(
                    &ctx,
                    DecisionAction::Skip,
                    None,
                    "orchestration_in_flight".into(),
                    None,
                    None,
                    None,
                    None,
                )
                .await;
        };

        info!(model_name = %model_name, trigger = %trigger, "orchestration started");

        // Data eligibility over the labeling window, fail closed.
        let window_start = now - Duration::hours(self.config.training_window_h);
        let coverage = PredictionLedger::coverage_stats(&self.pool, window_start, now).await?;
        ctx.labeled_samples = coverage.num_labeled as i64;
        ctx.coverage_pct = coverage.coverage_pct();

        let production = ModelRegistry::get_production(&self.pool, &model_name).await?;
        ctx.production_version = production.as_ref().map(|p| p.version);

        if coverage.num_labeled < self.config.min_samples_for_decision {
            let reason = format!(
                "num_samples {} < {}",
                coverage.num_labeled, self.config.min_samples_for_decision
            );
            return self
                .record_decision(
                    &ctx,
                    DecisionAction::Skip,
                    Some(FailedGate::SampleValidity),
                    reason,
                    None,
                    None,
                    None,
                    None,
                )
                .await;
        }
        if ctx.coverage_pct < self.config.min_coverage_pct {
            let reason = format!(
                "coverage {:.1}% < {:.1}%",
                ctx.coverage_pct, self.config.min_coverage_pct
            );
            return self
                .record_decision(
                    &ctx,
                    DecisionAction::Skip,
                    Some(FailedGate::LabelCoverage),
                    reason,
                    None,
                    None,
                    None,
                    None,
                )
                .await;
        }

        // Cooldown pre-check: rejecting here spares the training cost.
        let days_since_last_promotion =
            match ModelRegistry::last_promoted_at(&self.pool, &model_name).await? {
                Some(at) => Some((now - at).num_days()),
                None => None,
            };
        if production.is_some() {
            if let Some(days) = days_since_last_promotion {
                if days < self.config.promotion_cooldown_days {
                    let reason = format!(
                        "{days} days < {} days cooldown",
                        self.config.promotion_cooldown_days
                    );
                    return self
                        .record_decision(
                            &ctx,
                            DecisionAction::Reject,
                            Some(FailedGate::PromotionCooldown),
                            reason,
                            None,
                            None,
                            None,
                            None,
                        )
                        .await;
                }
            }
        }

        // Assemble the labeled window and split temporally.
        let joined = PredictionLedger::join_labeled(&self.pool, window_start, now).await?;
        let rows: Vec<LabeledRow> = joined
            .into_iter()
            .map(|row| LabeledRow {
                prediction_id: row.prediction.prediction_id,
                created_at: row.prediction.created_at,
                features: row.prediction.features.0.clone(),
                true_class: row.true_class as u8,
                logged_class: row.prediction.predicted_class as u8,
                logged_probability: row.prediction.predicted_probability,
            })
            .collect();

        let (train_rows, replay_rows) = temporal_split(rows, self.config.test_fraction);
        if train_rows.is_empty() || replay_rows.is_empty() {
            return self
                .record_decision(
                    &ctx,
                    DecisionAction::Skip,
                    None,
                    "empty_partition".into(),
                    None,
                    None,
                    None,
                    None,
                )
                .await;
        }
        let replay_classes: HashSet<u8> = replay_rows.iter().map(|r| r.true_class).collect();
        if replay_classes.len() < 2 {
            return self
                .record_decision(
                    &ctx,
                    DecisionAction::Skip,
                    None,
                    "replay_single_class".into(),
                    None,
                    None,
                    None,
                    None,
                )
                .await;
        }

        // Train the shadow under its deadline.
        let trained = match self.train_shadow(&train_rows, &replay_rows).await {
            Ok(outcome) => outcome,
            Err(reason) => {
                return self
                    .record_decision(
                        &ctx,
                        DecisionAction::Skip,
                        None,
                        reason,
                        None,
                        None,
                        None,
                        None,
                    )
                    .await;
            }
        };

        // Register the shadow in staging with its blob on disk.
        let shadow_version = ModelRegistry::next_version(&self.pool, &model_name).await?;
        let checkpoint_path = self
            .config
            .model_dir
            .join(format!("{model_name}_v{shadow_version}.json"));
        fs::create_dir_all(&self.config.model_dir)?;
        fs::write(&checkpoint_path, trained.model.to_bytes()?)?;

        ModelRegistry::insert_staging(
            &self.pool,
            CreateModelVersion {
                model_name: model_name.clone(),
                version: shadow_version,
                trained_at: now,
                training_run_reference: format!("train-{}", Uuid::new_v4()),
                checkpoint_path: checkpoint_path.to_string_lossy().into_owned(),
                trigger_reason: trigger,
                f1_score: Some(trained.metrics.f1),
                brier_score: Some(trained.metrics.brier),
                num_training_samples: Some(train_rows.len() as i64),
                feature_drift_ratio_at_training: ctx
                    .drift
                    .as_ref()
                    .map(|d| d.feature_drift_ratio),
            },
        )
        .await?;

        // Replay both models over the identical held-out rows. The
        // production scores are the ones logged at serving time.
        let y_true: Vec<u8> = replay_rows.iter().map(|r| r.true_class).collect();
        let production_pred: Vec<u8> = replay_rows.iter().map(|r| r.logged_class).collect();
        let production_prob: Vec<f64> =
            replay_rows.iter().map(|r| r.logged_probability).collect();
        let shadow_prob: Vec<f64> = replay_rows
            .iter()
            .map(|r| trained.model.predict_proba(&r.features))
            .collect();
        let shadow_pred: Vec<u8> = shadow_prob.iter().map(|&p| u8::from(p >= 0.5)).collect();

        let production_metrics = evaluate(&y_true, &production_pred, &production_prob);
        let shadow_metrics = evaluate(&y_true, &shadow_pred, &shadow_prob);
        let comparison = compare(&production_metrics, &shadow_metrics);

        // Bootstrap: no production model yet, promotion bypasses the
        // comparison gates but never the registry invariant.
        let Some(production_row) = production else {
            let decision_id = Uuid::new_v4();
            self.promoter
                .promote_shadow(&model_name, shadow_version, None, decision_id)
                .await?;
            info!(model_name = %model_name, shadow_version, "bootstrap promotion complete");
            return self
                .record_with_id(
                    &ctx,
                    decision_id,
                    DecisionAction::Promote,
                    None,
                    "bootstrap".into(),
                    Some(shadow_version),
                    None,
                    None,
                    None,
                )
                .await;
        };

        // Fairness segments from training-set percentiles.
        let baseline = self.store.load()?;
        let segment_columns: Vec<(String, usize)> = self
            .config
            .segment_features
            .iter()
            .filter_map(|name| {
                baseline
                    .feature_schema
                    .index_of(name)
                    .map(|idx| (name.clone(), idx))
            })
            .collect();
        let train_features: Vec<FeatureRow> =
            train_rows.iter().map(|r| r.features.clone()).collect();
        let replay_features: Vec<FeatureRow> =
            replay_rows.iter().map(|r| r.features.clone()).collect();
        let specs = build_segment_specs(
            &segment_columns,
            &train_features,
            self.config.segment_buckets,
        );
        let segments = compare_segments(
            &specs,
            &replay_features,
            &y_true,
            &production_pred,
            &production_prob,
            &shadow_pred,
            &shadow_prob,
            self.config.segment_min,
        );

        let thresholds = GateThresholds {
            min_samples_for_decision: self.config.min_samples_for_decision,
            min_coverage_pct: self.config.min_coverage_pct,
            promotion_cooldown_days: self.config.promotion_cooldown_days,
            min_f1_improvement_pct: self.config.min_f1_improvement_pct,
            max_brier_degradation: self.config.max_brier_degradation,
            min_segment_f1_drop: self.config.min_segment_f1_drop,
        };
        let evidence = GateEvidence {
            num_samples: replay_rows.len() as u64,
            coverage_pct: ctx.coverage_pct,
            days_since_last_promotion,
            production_f1: production_metrics.f1_score,
            shadow_f1: shadow_metrics.f1_score,
            production_brier: production_metrics.brier_score,
            shadow_brier: shadow_metrics.brier_score,
            segments,
        };
        let outcome = evaluate_gates(&evidence, &thresholds);

        let artifact_ref = self.write_evaluation_artifact(&EvaluationArtifact {
            decided_at: now,
            model_name: &model_name,
            production_version: Some(production_row.version),
            shadow_version,
            thresholds: &thresholds,
            evidence: &evidence,
            outcome: &outcome,
            production_metrics: &production_metrics,
            shadow_metrics: &shadow_metrics,
            comparison: &comparison,
        })?;

        match outcome.decision {
            DecisionAction::Promote => {
                let decision_id = Uuid::new_v4();
                match self
                    .promoter
                    .promote_shadow(
                        &model_name,
                        shadow_version,
                        Some(production_row.version),
                        decision_id,
                    )
                    .await
                {
                    Ok(_) => {
                        self.record_with_id(
                            &ctx,
                            decision_id,
                            DecisionAction::Promote,
                            None,
                            outcome.reason,
                            Some(shadow_version),
                            Some(comparison.f1_improvement_pct),
                            Some(comparison.brier_change),
                            Some(artifact_ref),
                        )
                        .await
                    }
                    Err(CoreError::RegistryConflict(detail)) => {
                        // The losing orchestration records a reject and
                        // does not retry; the shadow stays in staging
                        // until the TTL janitor reaps it.
                        error!(model_name = %model_name, shadow_version, detail = %detail, "promotion race lost");
                        self.record_decision(
                            &ctx,
                            DecisionAction::Reject,
                            Some(FailedGate::ConcurrentPromotion),
                            "concurrent promotion won the registry commit".into(),
                            Some(shadow_version),
                            Some(comparison.f1_improvement_pct),
                            Some(comparison.brier_change),
                            Some(artifact_ref),
                        )
                        .await
                    }
                    Err(err) => Err(err),
                }
            }
            _ => {
                // Rejected: the shadow remains in staging until the TTL
                // janitor archives it.
                self.record_decision(
                    &ctx,
                    DecisionAction::Reject,
                    outcome.failed_gate,
                    outcome.reason,
                    Some(shadow_version),
                    Some(comparison.f1_improvement_pct),
                    Some(comparison.brier_change),
                    Some(artifact_ref),
                )
                .await
            }
        }
    }

    /// Runs the training function on a blocking thread under the
    /// configured deadline. Failure modes come back as skip reasons.
    async fn train_shadow(
        &self,
        train_rows: &[LabeledRow],
        replay_rows: &[LabeledRow],
    ) -> Result<TrainOutcome, String> {
        let trainer = self.trainer.clone();
        let train = train_rows.to_vec();
        let replay = replay_rows.to_vec();
        let seed = self.config.training_seed;

        let handle =
            tokio::task::spawn_blocking(move || trainer.train(&train, &replay, seed));
        let deadline = std::time::Duration::from_secs(self.config.training_timeout_s);

        match tokio::time::timeout(deadline, handle).await {
            Err(_) => {
                warn!("training exceeded its deadline");
                Err("training_timeout".into())
            }
            Ok(Err(join_err)) => {
                error!(error = %join_err, "training task failed");
                Err("training_failed".into())
            }
            Ok(Ok(Err(train_err))) => {
                warn!(error = %train_err, "training function raised");
                Err("training_failed".into())
            }
            Ok(Ok(Ok(outcome))) => Ok(outcome),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_decision(
        &self,
        ctx: &DecisionContext,
        action: DecisionAction,
        failed_gate: Option<FailedGate>,
        reason: String,
        shadow_version: Option<i64>,
        f1_improvement_pct: Option<f64>,
        brier_change: Option<f64>,
        artifact_ref: Option<String>,
    ) -> Result<OrchestrationOutcome, CoreError> {
        self.record_with_id(
            ctx,
            Uuid::new_v4(),
            action,
            failed_gate,
            reason,
            shadow_version,
            f1_improvement_pct,
            brier_change,
            artifact_ref,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_with_id(
        &self,
        ctx: &DecisionContext,
        decision_id: Uuid,
        action: DecisionAction,
        failed_gate: Option<FailedGate>,
        reason: String,
        shadow_version: Option<i64>,
        f1_improvement_pct: Option<f64>,
        brier_change: Option<f64>,
        artifact_ref: Option<String>,
    ) -> Result<OrchestrationOutcome, CoreError> {
        let input = CreateDecision {
            decision_id,
            decided_at: Utc::now(),
            trigger_reason: ctx.trigger,
            action,
            failed_gate,
            reason: reason.clone(),
            feature_drift_ratio: ctx.drift.as_ref().map(|d| d.feature_drift_ratio),
            num_drifted_features: ctx.drift.as_ref().map(|d| d.num_drifted_features),
            dataset_drift_detected: ctx.drift.as_ref().map(|d| d.dataset_drift_detected),
            drifted_features: ctx.drifted_features.clone(),
            labeled_samples: ctx.labeled_samples,
            coverage_pct: ctx.coverage_pct,
            shadow_model_version: shadow_version,
            production_model_version: ctx.production_version,
            f1_improvement_pct,
            brier_change,
            evaluation_artifact_ref: artifact_ref,
        };

        with_retry(&self.retry, "retraining_decisions.insert", || {
            let input = input.clone();
            async move { DecisionsRepository::insert(&self.pool, input).await }
        })
        .await?;

        Ok(OrchestrationOutcome {
            decision_id,
            action,
            failed_gate,
            reason,
            shadow_version,
        })
    }

    fn write_evaluation_artifact(&self, artifact: &EvaluationArtifact<'_>) -> Result<String, CoreError> {
        let dir = self.config.artifact_dir.join("evaluations");
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!(
            "evaluation_{}.json",
            artifact.decided_at.format("%Y%m%d_%H%M%S")
        ));
        fs::write(&path, serde_json::to_vec_pretty(artifact)?)?;
        Ok(path.to_string_lossy().into_owned())
    }
}
