//! Shadow model training.
//!
//! The training algorithm is an external collaborator behind the
//! [`Trainer`] seam: a pure function from `(training rows, replay rows,
//! seed)` to a model blob plus metrics. The bundled
//! [`LogisticTrainer`] is the deterministic reference implementation that
//! keeps the system runnable and testable end to end; deployments with a
//! heavier training stack plug in through the same trait.

mod split;
mod training;

use chrono::{DateTime, Utc};
use model_eval::ClassificationMetrics;
use risk_structs::FeatureRow;
use serde::{Deserialize, Serialize};
pub use split::temporal_split;
pub use training::LogisticTrainer;
use uuid::Uuid;

/// One labeled ledger row, carrying both the ground truth used for
/// training and the production scores logged when the prediction was
/// served. The logged scores are authoritative for replay evaluation of
/// the production model.
#[derive(Debug, Clone)]
pub struct LabeledRow {
    pub prediction_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub features: FeatureRow,
    pub true_class: u8,
    pub logged_class: u8,
    pub logged_probability: f64,
}

/// Metrics reported by the training function; `f1`, `brier`, `precision`,
/// `recall` and `auc` are contractual, the rest rides along verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub f1: f64,
    pub brier: f64,
    pub precision: f64,
    pub recall: f64,
    pub auc: Option<f64>,
    pub accuracy: f64,
    pub train_samples: u64,
    pub test_samples: u64,
}

impl TrainingMetrics {
    #[must_use]
    pub fn from_evaluation(metrics: &ClassificationMetrics, train_samples: u64) -> Self {
        Self {
            f1: metrics.f1_score,
            brier: metrics.brier_score,
            precision: metrics.precision,
            recall: metrics.recall,
            auc: metrics.roc_auc,
            accuracy: metrics.accuracy,
            train_samples,
            test_samples: metrics.num_samples,
        }
    }
}

/// A trained logistic model: standardization parameters plus weights.
/// This struct is the blob format; it serializes to JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    pub feature_count: usize,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
    pub weights: Vec<f64>,
    pub intercept: f64,
}

impl TrainedModel {
    /// Probability of class 1 for one feature row. Missing values fall
    /// back to the training mean (standardized zero).
    #[must_use]
    pub fn predict_proba(&self, features: &FeatureRow) -> f64 {
        let mut z = self.intercept;
        for (idx, weight) in self.weights.iter().enumerate() {
            let standardized = match features.get(idx).copied().flatten() {
                Some(value) => (value - self.means[idx]) / self.stds[idx],
                None => 0.0,
            };
            z += weight * standardized;
        }
        sigmoid(z)
    }

    /// Predicted class at the 0.5 decision threshold.
    #[must_use]
    pub fn predict_class(&self, features: &FeatureRow) -> u8 {
        u8::from(self.predict_proba(features) >= 0.5)
    }

    /// Serializes the model blob.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    /// Deserializes a model blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob is not a valid model.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Output of one training run.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub model: TrainedModel,
    pub metrics: TrainingMetrics,
}

/// The training-function contract: deterministic given inputs and seed.
pub trait Trainer: Send + Sync {
    /// Trains on `training_rows` and evaluates on `test_rows`.
    ///
    /// # Errors
    ///
    /// Returns an error when the data cannot support training (empty or
    /// single-class input) or the algorithm itself fails.
    fn train(
        &self,
        training_rows: &[LabeledRow],
        test_rows: &[LabeledRow],
        seed: u64,
    ) -> anyhow::Result<TrainOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> TrainedModel {
        TrainedModel {
            feature_count: 2,
            means: vec![50.0, 5000.0],
            stds: vec![10.0, 2000.0],
            weights: vec![1.5, -0.5],
            intercept: 0.2,
        }
    }

    #[test]
    fn test_predict_proba_bounds() {
        let m = model();
        let p = m.predict_proba(&vec![Some(80.0), Some(1000.0)]);
        assert!((0.0..=1.0).contains(&p));
        assert!(p > 0.5, "high first feature pushes toward class 1");
    }

    #[test]
    fn test_missing_value_uses_training_mean() {
        let m = model();
        let with_mean = m.predict_proba(&vec![Some(50.0), Some(5000.0)]);
        let with_missing = m.predict_proba(&vec![None, None]);
        assert!((with_mean - with_missing).abs() < 1e-12);
    }

    #[test]
    fn test_blob_round_trip() {
        let m = model();
        let bytes = m.to_bytes().expect("serialize");
        let back = TrainedModel::from_bytes(&bytes).expect("deserialize");
        assert_eq!(back.weights, m.weights);
        assert_eq!(back.intercept, m.intercept);

        let row = vec![Some(42.0), Some(3000.0)];
        assert!((m.predict_proba(&row) - back.predict_proba(&row)).abs() < 1e-15);
    }

    #[test]
    fn test_bad_blob_rejected() {
        assert!(TrainedModel::from_bytes(b"not a model").is_err());
    }
}
