//! Deterministic logistic-regression trainer.
//!
//! Mini-batch gradient descent over standardized features with a
//! splitmix64-driven Fisher-Yates shuffle per epoch, so the same rows
//! and seed always produce the same weights.

use model_eval::evaluate;
use tracing::debug;

use crate::{sigmoid, LabeledRow, TrainOutcome, TrainedModel, Trainer, TrainingMetrics};

/// Reference implementation of the training contract.
#[derive(Debug, Clone)]
pub struct LogisticTrainer {
    pub epochs: usize,
    pub learning_rate: f64,
    pub l2_penalty: f64,
    pub batch_size: usize,
}

impl Default for LogisticTrainer {
    fn default() -> Self {
        Self {
            epochs: 200,
            learning_rate: 0.1,
            l2_penalty: 1e-4,
            batch_size: 64,
        }
    }
}

impl Trainer for LogisticTrainer {
    fn train(
        &self,
        training_rows: &[LabeledRow],
        test_rows: &[LabeledRow],
        seed: u64,
    ) -> anyhow::Result<TrainOutcome> {
        if training_rows.is_empty() {
            anyhow::bail!("no training rows");
        }
        if test_rows.is_empty() {
            anyhow::bail!("no evaluation rows");
        }

        let positives = training_rows.iter().filter(|r| r.true_class == 1).count();
        if positives == 0 || positives == training_rows.len() {
            anyhow::bail!("training rows are single-class");
        }

        let feature_count = training_rows[0].features.len();
        let (means, stds) = standardization_params(training_rows, feature_count);

        // Standardize once; missing values sit at the mean.
        let matrix: Vec<Vec<f64>> = training_rows
            .iter()
            .map(|row| {
                (0..feature_count)
                    .map(|idx| match row.features.get(idx).copied().flatten() {
                        Some(v) => (v - means[idx]) / stds[idx],
                        None => 0.0,
                    })
                    .collect()
            })
            .collect();
        let targets: Vec<f64> = training_rows
            .iter()
            .map(|row| f64::from(row.true_class))
            .collect();

        let mut weights = vec![0.0; feature_count];
        let mut intercept = 0.0;
        let mut indices: Vec<usize> = (0..training_rows.len()).collect();

        for epoch in 0..self.epochs {
            shuffle_indices(&mut indices, seed, epoch as u64);

            for batch in indices.chunks(self.batch_size) {
                let mut grad_w = vec![0.0; feature_count];
                let mut grad_b = 0.0;

                for &i in batch {
                    let z = intercept
                        + weights
                            .iter()
                            .zip(&matrix[i])
                            .map(|(w, x)| w * x)
                            .sum::<f64>();
                    let error = sigmoid(z) - targets[i];
                    for (g, x) in grad_w.iter_mut().zip(&matrix[i]) {
                        *g += error * x;
                    }
                    grad_b += error;
                }

                let scale = self.learning_rate / batch.len() as f64;
                for (w, g) in weights.iter_mut().zip(&grad_w) {
                    *w -= scale * (g + self.l2_penalty * *w);
                }
                intercept -= scale * grad_b;
            }

            if epoch % 50 == 0 {
                debug!(epoch, "training epoch complete");
            }
        }

        let model = TrainedModel {
            feature_count,
            means,
            stds,
            weights,
            intercept,
        };

        let y_true: Vec<u8> = test_rows.iter().map(|r| r.true_class).collect();
        let y_prob: Vec<f64> = test_rows
            .iter()
            .map(|r| model.predict_proba(&r.features))
            .collect();
        let y_pred: Vec<u8> = y_prob.iter().map(|&p| u8::from(p >= 0.5)).collect();
        let evaluation = evaluate(&y_true, &y_pred, &y_prob);

        Ok(TrainOutcome {
            metrics: TrainingMetrics::from_evaluation(&evaluation, training_rows.len() as u64),
            model,
        })
    }
}

fn standardization_params(rows: &[LabeledRow], feature_count: usize) -> (Vec<f64>, Vec<f64>) {
    let mut means = vec![0.0; feature_count];
    let mut stds = vec![1.0; feature_count];

    for idx in 0..feature_count {
        let values: Vec<f64> = rows
            .iter()
            .filter_map(|row| row.features.get(idx).copied().flatten())
            .collect();
        if values.is_empty() {
            continue;
        }

        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        means[idx] = mean;
        if variance.sqrt() > f64::EPSILON {
            stds[idx] = variance.sqrt();
        }
    }

    (means, stds)
}

/// Fisher-Yates shuffle over a splitmix64 stream. Seed and epoch are
/// folded into the stream state, so every epoch draws its own
/// reproducible permutation.
fn shuffle_indices(indices: &mut [usize], seed: u64, epoch: u64) {
    let mut state = seed ^ epoch.wrapping_mul(0xd6e8_feb8_6659_fd93);

    for i in (1..indices.len()).rev() {
        state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^= z >> 31;
        let j = (z % (i as u64 + 1)) as usize;
        indices.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::*;

    /// Linearly separable rows: class 1 iff the first feature is high.
    fn separable_rows(n: usize) -> Vec<LabeledRow> {
        (0..n)
            .map(|i| {
                let positive = i % 2 == 0;
                let base = if positive { 70.0 } else { 25.0 };
                LabeledRow {
                    prediction_id: Uuid::new_v4(),
                    created_at: Utc
                        .with_ymd_and_hms(2024, 6, 1, 0, 0, 0)
                        .unwrap()
                        + chrono::Duration::minutes(i as i64),
                    features: vec![Some(base + (i % 10) as f64), Some(3000.0 + i as f64)],
                    true_class: u8::from(positive),
                    logged_class: 0,
                    logged_probability: 0.5,
                }
            })
            .collect()
    }

    #[test]
    fn test_learns_separable_data() {
        let rows = separable_rows(400);
        let (train, test) = crate::temporal_split(rows, 0.2);
        let outcome = LogisticTrainer::default()
            .train(&train, &test, 42)
            .expect("training succeeds");

        assert!(
            outcome.metrics.f1 > 0.95,
            "separable data should be learned, f1 = {}",
            outcome.metrics.f1
        );
        assert!(outcome.metrics.brier < 0.1);
        assert!(outcome.metrics.auc.unwrap() > 0.95);
    }

    #[test]
    fn test_deterministic_given_seed() {
        let rows = separable_rows(200);
        let (train, test) = crate::temporal_split(rows, 0.2);
        let trainer = LogisticTrainer::default();

        let a = trainer.train(&train, &test, 7).expect("run a");
        let b = trainer.train(&train, &test, 7).expect("run b");
        assert_eq!(a.model.weights, b.model.weights);
        assert_eq!(a.model.intercept, b.model.intercept);

        let c = trainer.train(&train, &test, 8).expect("run c");
        assert_ne!(
            a.model.weights, c.model.weights,
            "a different seed shuffles differently"
        );
    }

    #[test]
    fn test_single_class_rejected() {
        let mut rows = separable_rows(100);
        for row in &mut rows {
            row.true_class = 1;
        }
        let (train, test) = crate::temporal_split(rows, 0.2);
        let err = LogisticTrainer::default()
            .train(&train, &test, 42)
            .expect_err("single-class training data");
        assert!(err.to_string().contains("single-class"));
    }

    #[test]
    fn test_empty_inputs_rejected() {
        let rows = separable_rows(100);
        let trainer = LogisticTrainer::default();
        assert!(trainer.train(&[], &rows, 42).is_err());
        assert!(trainer.train(&rows, &[], 42).is_err());
    }

    #[test]
    fn test_shuffle_is_a_permutation() {
        let mut indices: Vec<usize> = (0..50).collect();
        let original = indices.clone();
        shuffle_indices(&mut indices, 99, 0);
        assert_ne!(indices, original);
        indices.sort_unstable();
        assert_eq!(indices, original);
    }

    #[test]
    fn test_shuffle_varies_by_epoch() {
        let mut first: Vec<usize> = (0..50).collect();
        let mut second: Vec<usize> = (0..50).collect();
        shuffle_indices(&mut first, 7, 0);
        shuffle_indices(&mut second, 7, 1);
        assert_ne!(first, second, "each epoch draws a distinct permutation");
    }
}
