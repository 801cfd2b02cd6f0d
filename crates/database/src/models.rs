//! Database model types.

use risk_structs::{DecisionAction, FailedGate, FeatureRow, ModelStage, TriggerReason};
use serde::Serialize;
use sqlx::types::chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

/// A served prediction as logged by the serving shell. Append-only.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct PredictionRecord {
    pub prediction_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub model_name: String,
    pub model_version: i64,
    pub features: Json<FeatureRow>,
    pub predicted_class: i64,
    pub predicted_probability: f64,
    pub request_source: String,
    pub response_time_ms: Option<i64>,
}

/// A late-arriving ground-truth label, at most one per prediction.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct LabelRecord {
    pub prediction_id: Uuid,
    pub true_class: i64,
    pub label_observed_at: DateTime<Utc>,
    pub label_source: String,
    pub days_delayed: i64,
}

/// A prediction joined with its label.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LabeledPrediction {
    #[sqlx(flatten)]
    pub prediction: PredictionRecord,
    pub true_class: i64,
    pub label_observed_at: DateTime<Utc>,
    pub label_source: String,
    pub days_delayed: i64,
}

/// One row per monitoring run.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct MonitoringMetricRecord {
    pub run_id: Uuid,
    pub run_at: DateTime<Utc>,
    pub lookback_hours: i64,
    pub num_predictions: i64,
    pub positive_rate: Option<f64>,
    pub probability_mean: Option<f64>,
    pub probability_std: Option<f64>,
    pub entropy: Option<f64>,
    pub dataset_drift_detected: bool,
    pub feature_drift_ratio: f64,
    pub num_drifted_features: i64,
    pub num_evaluated_features: i64,
    pub drift_artifact_ref: Option<String>,
    pub drift_artifact_format: Option<String>,
    pub reason: Option<String>,
}

/// One row per invocation of the retraining decision loop.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct RetrainingDecision {
    pub decision_id: Uuid,
    pub decided_at: DateTime<Utc>,
    pub trigger_reason: TriggerReason,
    pub action: DecisionAction,
    pub failed_gate: Option<FailedGate>,
    pub reason: String,
    pub feature_drift_ratio: Option<f64>,
    pub num_drifted_features: Option<i64>,
    pub dataset_drift_detected: Option<bool>,
    pub drifted_features: Option<Json<Vec<String>>>,
    pub labeled_samples: i64,
    pub coverage_pct: f64,
    pub shadow_model_version: Option<i64>,
    pub production_model_version: Option<i64>,
    pub f1_improvement_pct: Option<f64>,
    pub brier_change: Option<f64>,
    pub evaluation_artifact_ref: Option<String>,
}

/// Governance row for one registered model version.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ModelVersion {
    pub model_name: String,
    pub version: i64,
    pub stage: ModelStage,
    pub trained_at: DateTime<Utc>,
    pub promoted_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub training_run_reference: String,
    pub checkpoint_path: String,
    pub trigger_reason: TriggerReason,
    pub f1_score: Option<f64>,
    pub brier_score: Option<f64>,
    pub num_training_samples: Option<i64>,
    pub feature_drift_ratio_at_training: Option<f64>,
    pub decision_id: Option<Uuid>,
}

/// Label coverage over a prediction window, computed in one pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoverageStats {
    pub num_predictions: u64,
    pub num_labeled: u64,
    pub coverage_fraction: f64,
}

impl CoverageStats {
    #[must_use]
    pub fn coverage_pct(&self) -> f64 {
        self.coverage_fraction * 100.0
    }
}

/// Input for appending a prediction to the ledger.
#[derive(Debug, Clone)]
pub struct CreatePrediction {
    pub prediction_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub model_name: String,
    pub model_version: i64,
    pub features: FeatureRow,
    pub predicted_class: i64,
    pub predicted_probability: f64,
    pub request_source: String,
    pub response_time_ms: Option<i64>,
}

/// Input for appending a label to the ledger. `days_delayed` is derived
/// from the referenced prediction at append time.
#[derive(Debug, Clone)]
pub struct CreateLabel {
    pub prediction_id: Uuid,
    pub true_class: i64,
    pub label_observed_at: DateTime<Utc>,
    pub label_source: String,
}

/// Input for one monitoring-metrics row.
#[derive(Debug, Clone)]
pub struct CreateMonitoringMetric {
    pub run_at: DateTime<Utc>,
    pub lookback_hours: i64,
    pub num_predictions: i64,
    pub positive_rate: Option<f64>,
    pub probability_mean: Option<f64>,
    pub probability_std: Option<f64>,
    pub entropy: Option<f64>,
    pub dataset_drift_detected: bool,
    pub feature_drift_ratio: f64,
    pub num_drifted_features: i64,
    pub num_evaluated_features: i64,
    pub drift_artifact_ref: Option<String>,
    pub drift_artifact_format: Option<String>,
    pub reason: Option<String>,
}

impl CreateMonitoringMetric {
    /// A degenerate row for ticks that did no analysis (too few samples,
    /// or a skipped overlapping tick).
    #[must_use]
    pub fn degenerate(
        run_at: DateTime<Utc>,
        lookback_hours: i64,
        num_predictions: i64,
        reason: &str,
    ) -> Self {
        Self {
            run_at,
            lookback_hours,
            num_predictions,
            positive_rate: None,
            probability_mean: None,
            probability_std: None,
            entropy: None,
            dataset_drift_detected: false,
            feature_drift_ratio: 0.0,
            num_drifted_features: 0,
            num_evaluated_features: 0,
            drift_artifact_ref: None,
            drift_artifact_format: None,
            reason: Some(reason.to_string()),
        }
    }
}

/// Input for one retraining-decision row.
///
/// The caller allocates `decision_id` so the promotion transaction can
/// reference it before the row itself is written.
#[derive(Debug, Clone)]
pub struct CreateDecision {
    pub decision_id: Uuid,
    pub decided_at: DateTime<Utc>,
    pub trigger_reason: TriggerReason,
    pub action: DecisionAction,
    pub failed_gate: Option<FailedGate>,
    pub reason: String,
    pub feature_drift_ratio: Option<f64>,
    pub num_drifted_features: Option<i64>,
    pub dataset_drift_detected: Option<bool>,
    pub drifted_features: Option<Vec<String>>,
    pub labeled_samples: i64,
    pub coverage_pct: f64,
    pub shadow_model_version: Option<i64>,
    pub production_model_version: Option<i64>,
    pub f1_improvement_pct: Option<f64>,
    pub brier_change: Option<f64>,
    pub evaluation_artifact_ref: Option<String>,
}

/// Input for registering a freshly trained model version.
#[derive(Debug, Clone)]
pub struct CreateModelVersion {
    pub model_name: String,
    pub version: i64,
    pub trained_at: DateTime<Utc>,
    pub training_run_reference: String,
    pub checkpoint_path: String,
    pub trigger_reason: TriggerReason,
    pub f1_score: Option<f64>,
    pub brier_score: Option<f64>,
    pub num_training_samples: Option<i64>,
    pub feature_drift_ratio_at_training: Option<f64>,
}
