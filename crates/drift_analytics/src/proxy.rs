//! Label-free proxy metrics.
//!
//! These are trends over the model's own outputs, computable on every
//! monitoring tick without ground truth. Label-dependent evaluation
//! belongs to the retraining loop.

use serde::{Deserialize, Serialize};

use crate::stats::WelfordStats;

/// Summary statistics of one prediction window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProxyMetrics {
    pub num_predictions: u64,
    /// Fraction of predictions with class 1.
    pub positive_rate: f64,
    pub probability_mean: f64,
    pub probability_std: f64,
    /// Mean binary entropy of the predicted probabilities, in nats.
    /// Higher means a less decisive model over the window.
    pub entropy: f64,
}

/// One-pass accumulator over a streamed prediction window.
#[derive(Debug, Default)]
pub struct ProxyAccumulator {
    count: u64,
    positives: u64,
    probability: WelfordStats,
    entropy_sum: f64,
}

impl ProxyAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, predicted_class: i64, predicted_probability: f64) {
        self.count += 1;
        if predicted_class == 1 {
            self.positives += 1;
        }
        self.probability.update(predicted_probability);
        self.entropy_sum += binary_entropy(predicted_probability);
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Finalizes the window; `None` if nothing was observed.
    #[must_use]
    pub fn finish(self) -> Option<ProxyMetrics> {
        if self.count == 0 {
            return None;
        }

        Some(ProxyMetrics {
            num_predictions: self.count,
            positive_rate: self.positives as f64 / self.count as f64,
            probability_mean: self.probability.mean(),
            probability_std: self.probability.std_dev(),
            entropy: self.entropy_sum / self.count as f64,
        })
    }
}

/// `-p ln p - (1-p) ln(1-p)` with `0 ln 0 = 0`.
#[must_use]
pub fn binary_entropy(p: f64) -> f64 {
    let p = p.clamp(0.0, 1.0);
    let mut entropy = 0.0;
    if p > 0.0 {
        entropy -= p * p.ln();
    }
    if p < 1.0 {
        entropy -= (1.0 - p) * (1.0 - p).ln();
    }
    entropy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_entropy_edges() {
        assert_eq!(binary_entropy(0.0), 0.0);
        assert_eq!(binary_entropy(1.0), 0.0);
        assert!((binary_entropy(0.5) - std::f64::consts::LN_2).abs() < 1e-12);
    }

    #[test]
    fn test_accumulator_basic_window() {
        let mut acc = ProxyAccumulator::new();
        for (class, prob) in [(1, 0.9), (0, 0.1), (0, 0.2), (1, 0.8)] {
            acc.observe(class, prob);
        }

        let metrics = acc.finish().expect("non-empty window");
        assert_eq!(metrics.num_predictions, 4);
        assert!((metrics.positive_rate - 0.5).abs() < 1e-12);
        assert!((metrics.probability_mean - 0.5).abs() < 1e-12);
        assert!(metrics.probability_std > 0.0);
        assert!((metrics.entropy - binary_entropy(0.9)).abs() < 0.2);
    }

    #[test]
    fn test_empty_window_is_none() {
        assert!(ProxyAccumulator::new().finish().is_none());
    }

    #[test]
    fn test_decisive_model_has_low_entropy() {
        let mut decisive = ProxyAccumulator::new();
        let mut uncertain = ProxyAccumulator::new();
        for _ in 0..100 {
            decisive.observe(1, 0.99);
            uncertain.observe(1, 0.55);
        }
        let decisive = decisive.finish().unwrap();
        let uncertain = uncertain.finish().unwrap();
        assert!(decisive.entropy < uncertain.entropy);
    }
}
