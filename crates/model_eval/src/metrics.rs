//! Classification metrics over labeled replay rows.

use serde::{Deserialize, Serialize};

/// Confusion counts for a binary classifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negatives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
    pub true_positives: u64,
}

/// Full metric set for one model over one replay set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub num_samples: u64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    /// `None` when the replay set is single-class.
    pub roc_auc: Option<f64>,
    pub brier_score: f64,
    /// Mean absolute gap between predicted probability and observed
    /// positive rate over 10 uniform bins; `None` with no usable bins.
    pub expected_calibration_error: Option<f64>,
    pub confusion: ConfusionMatrix,
}

/// Shadow-versus-production deltas, computed on identical samples.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelComparison {
    pub f1_improvement: f64,
    /// Relative F1 improvement in percent, per
    /// [`relative_f1_improvement_pct`].
    pub f1_improvement_pct: f64,
    pub brier_change: f64,
    pub roc_auc_improvement: Option<f64>,
}

/// Relative F1 improvement in percent. A zero production F1 against a
/// nonzero shadow F1 is infinite improvement; both zero is none. The
/// performance gate and the recorded comparison share this definition,
/// so the decision row always carries the value the verdict was based
/// on.
#[must_use]
pub fn relative_f1_improvement_pct(production_f1: f64, shadow_f1: f64) -> f64 {
    if production_f1 > 0.0 {
        (shadow_f1 - production_f1) / production_f1 * 100.0
    } else if shadow_f1 > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

/// Evaluates predicted classes and probabilities against ground truth.
///
/// All three slices must have the same length; precision/recall/F1 use
/// zero when undefined (no predicted or no actual positives).
#[must_use]
pub fn evaluate(y_true: &[u8], y_pred: &[u8], y_prob: &[f64]) -> ClassificationMetrics {
    debug_assert_eq!(y_true.len(), y_pred.len());
    debug_assert_eq!(y_true.len(), y_prob.len());

    let mut confusion = ConfusionMatrix::default();
    let mut brier_sum = 0.0;

    for ((&truth, &pred), &prob) in y_true.iter().zip(y_pred).zip(y_prob) {
        match (truth, pred) {
            (0, 0) => confusion.true_negatives += 1,
            (0, _) => confusion.false_positives += 1,
            (_, 0) => confusion.false_negatives += 1,
            _ => confusion.true_positives += 1,
        }
        brier_sum += (prob - f64::from(truth)).powi(2);
    }

    let n = y_true.len() as f64;
    let tp = confusion.true_positives as f64;
    let fp = confusion.false_positives as f64;
    let fn_ = confusion.false_negatives as f64;
    let tn = confusion.true_negatives as f64;

    let accuracy = if n > 0.0 { (tp + tn) / n } else { 0.0 };
    let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
    let recall = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
    let f1_score = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    let brier_score = if n > 0.0 { brier_sum / n } else { 0.0 };

    ClassificationMetrics {
        num_samples: y_true.len() as u64,
        accuracy,
        precision,
        recall,
        f1_score,
        roc_auc: roc_auc(y_true, y_prob),
        brier_score,
        expected_calibration_error: expected_calibration_error(y_true, y_prob),
        confusion,
    }
}

/// Shadow-versus-production comparison on identical samples.
#[must_use]
pub fn compare(
    production: &ClassificationMetrics,
    shadow: &ClassificationMetrics,
) -> ModelComparison {
    let f1_improvement = shadow.f1_score - production.f1_score;

    ModelComparison {
        f1_improvement,
        f1_improvement_pct: relative_f1_improvement_pct(production.f1_score, shadow.f1_score),
        brier_change: shadow.brier_score - production.brier_score,
        roc_auc_improvement: match (shadow.roc_auc, production.roc_auc) {
            (Some(s), Some(p)) => Some(s - p),
            _ => None,
        },
    }
}

/// ROC-AUC via the rank-sum (Mann-Whitney) formulation with midranks for
/// ties. `None` when only one class is present.
fn roc_auc(y_true: &[u8], y_prob: &[f64]) -> Option<f64> {
    let positives = y_true.iter().filter(|&&t| t == 1).count();
    let negatives = y_true.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..y_prob.len()).collect();
    order.sort_by(|&a, &b| y_prob[a].total_cmp(&y_prob[b]));

    // Assign midranks over tied probability runs.
    let mut rank_sum_positive = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && y_prob[order[j + 1]] == y_prob[order[i]] {
            j += 1;
        }
        let midrank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if y_true[idx] == 1 {
                rank_sum_positive += midrank;
            }
        }
        i = j + 1;
    }

    let p = positives as f64;
    let q = negatives as f64;
    let u = rank_sum_positive - p * (p + 1.0) / 2.0;
    Some(u / (p * q))
}

/// Expected calibration error over 10 uniform probability bins.
fn expected_calibration_error(y_true: &[u8], y_prob: &[f64]) -> Option<f64> {
    const BINS: usize = 10;

    if y_true.is_empty() {
        return None;
    }

    let mut bin_count = [0u64; BINS];
    let mut bin_prob_sum = [0.0f64; BINS];
    let mut bin_positive = [0u64; BINS];

    for (&truth, &prob) in y_true.iter().zip(y_prob) {
        let bin = ((prob * BINS as f64) as usize).min(BINS - 1);
        bin_count[bin] += 1;
        bin_prob_sum[bin] += prob;
        bin_positive[bin] += u64::from(truth == 1);
    }

    let mut gap_sum = 0.0;
    let mut used = 0u64;
    for bin in 0..BINS {
        if bin_count[bin] == 0 {
            continue;
        }
        used += 1;
        let mean_prob = bin_prob_sum[bin] / bin_count[bin] as f64;
        let positive_rate = bin_positive[bin] as f64 / bin_count[bin] as f64;
        gap_sum += (positive_rate - mean_prob).abs();
    }

    (used > 0).then(|| gap_sum / used as f64)
}
