//! Fairness segments: percentile buckets over configured features.
//!
//! Segment edges are derived from the training set and then applied to
//! the replay rows, so both models are compared on the same subgroups. A
//! segment is evaluable only when it holds at least `segment_min` replay
//! rows; smaller segments abstain rather than fail.

use risk_structs::FeatureRow;
use serde::{Deserialize, Serialize};

use crate::metrics::evaluate;

/// Bucket specification for one feature: interior percentile edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentSpec {
    pub feature: String,
    pub column_index: usize,
    /// Interior edges; `k` buckets have `k - 1` edges.
    pub edges: Vec<f64>,
}

impl SegmentSpec {
    /// Builds bucket edges from training-set percentiles. `None` when
    /// the values are empty or collapse to a single bucket.
    #[must_use]
    pub fn from_percentiles(
        feature: impl Into<String>,
        column_index: usize,
        values: &[f64],
        buckets: usize,
    ) -> Option<Self> {
        if values.is_empty() || buckets < 2 {
            return None;
        }

        let mut sorted = values.to_vec();
        sorted.sort_unstable_by(f64::total_cmp);

        let mut edges = Vec::with_capacity(buckets - 1);
        for k in 1..buckets {
            let q = k as f64 / buckets as f64;
            let idx = ((sorted.len() - 1) as f64 * q).round() as usize;
            edges.push(sorted[idx]);
        }
        edges.dedup_by(|a, b| a == b);
        if edges.is_empty() {
            return None;
        }

        Some(Self {
            feature: feature.into(),
            column_index,
            edges,
        })
    }

    /// Bucket index for a value.
    #[must_use]
    pub fn bucket(&self, value: f64) -> usize {
        self.edges.iter().filter(|&&edge| value >= edge).count()
    }

    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.edges.len() + 1
    }

    /// Human-readable segment label, e.g. `age<30`, `age 30-52`,
    /// `age>=52`.
    #[must_use]
    pub fn bucket_label(&self, bucket: usize) -> String {
        let fmt = |v: f64| {
            if v.fract() == 0.0 {
                format!("{v:.0}")
            } else {
                format!("{v:.1}")
            }
        };

        if bucket == 0 {
            format!("{}<{}", self.feature, fmt(self.edges[0]))
        } else if bucket >= self.edges.len() {
            format!("{}>={}", self.feature, fmt(self.edges[self.edges.len() - 1]))
        } else {
            format!(
                "{} {}-{}",
                self.feature,
                fmt(self.edges[bucket - 1]),
                fmt(self.edges[bucket])
            )
        }
    }
}

/// Builds segment specs for the configured features from training rows.
/// Features missing from the schema or with degenerate distributions are
/// skipped.
#[must_use]
pub fn build_segment_specs(
    segment_features: &[(String, usize)],
    training_rows: &[FeatureRow],
    buckets: usize,
) -> Vec<SegmentSpec> {
    segment_features
        .iter()
        .filter_map(|(feature, column_index)| {
            let values: Vec<f64> = training_rows
                .iter()
                .filter_map(|row| row.get(*column_index).copied().flatten())
                .collect();
            SegmentSpec::from_percentiles(feature.clone(), *column_index, &values, buckets)
        })
        .collect()
}

/// Per-segment F1 for both models on the same replay rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentComparison {
    pub segment: String,
    pub n: u64,
    pub production_f1: f64,
    pub shadow_f1: f64,
    /// False when `n < segment_min`; insufficient segments abstain from
    /// the fairness gate instead of failing it.
    pub evaluable: bool,
}

/// Scores every segment of every spec over the replay rows.
#[must_use]
pub fn compare_segments(
    specs: &[SegmentSpec],
    replay_features: &[FeatureRow],
    y_true: &[u8],
    production_pred: &[u8],
    production_prob: &[f64],
    shadow_pred: &[u8],
    shadow_prob: &[f64],
    segment_min: u64,
) -> Vec<SegmentComparison> {
    let mut comparisons = Vec::new();

    for spec in specs {
        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); spec.bucket_count()];
        for (row_idx, row) in replay_features.iter().enumerate() {
            if let Some(value) = row.get(spec.column_index).copied().flatten() {
                buckets[spec.bucket(value)].push(row_idx);
            }
        }

        for (bucket, members) in buckets.iter().enumerate() {
            if members.is_empty() {
                continue;
            }

            let pick = |source: &[u8]| -> Vec<u8> {
                members.iter().map(|&i| source[i]).collect()
            };
            let pick_f = |source: &[f64]| -> Vec<f64> {
                members.iter().map(|&i| source[i]).collect()
            };

            let truth = pick(y_true);
            let production = evaluate(&truth, &pick(production_pred), &pick_f(production_prob));
            let shadow = evaluate(&truth, &pick(shadow_pred), &pick_f(shadow_prob));

            comparisons.push(SegmentComparison {
                segment: spec.bucket_label(bucket),
                n: members.len() as u64,
                production_f1: production.f1_score,
                shadow_f1: shadow.f1_score,
                evaluable: members.len() as u64 >= segment_min,
            });
        }
    }

    comparisons
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tertile_edges() {
        let values: Vec<f64> = (1..=90).map(f64::from).collect();
        let spec = SegmentSpec::from_percentiles("age", 0, &values, 3).expect("spec");
        assert_eq!(spec.edges.len(), 2);
        assert_eq!(spec.bucket_count(), 3);
        assert!((spec.edges[0] - 31.0).abs() < 1.0);
        assert!((spec.edges[1] - 60.0).abs() < 1.0);
    }

    #[test]
    fn test_bucket_assignment_and_labels() {
        let spec = SegmentSpec {
            feature: "age".into(),
            column_index: 0,
            edges: vec![30.0, 52.0],
        };
        assert_eq!(spec.bucket(21.0), 0);
        assert_eq!(spec.bucket(30.0), 1);
        assert_eq!(spec.bucket(45.0), 1);
        assert_eq!(spec.bucket(52.0), 2);
        assert_eq!(spec.bucket(80.0), 2);

        assert_eq!(spec.bucket_label(0), "age<30");
        assert_eq!(spec.bucket_label(1), "age 30-52");
        assert_eq!(spec.bucket_label(2), "age>=52");
    }

    #[test]
    fn test_degenerate_feature_yields_no_spec() {
        let constant = vec![5.0; 100];
        assert!(SegmentSpec::from_percentiles("x", 0, &constant, 3).is_none());
        assert!(SegmentSpec::from_percentiles("x", 0, &[], 3).is_none());
    }

    #[test]
    fn test_compare_segments_counts_and_abstain() {
        let spec = SegmentSpec {
            feature: "age".into(),
            column_index: 0,
            edges: vec![40.0],
        };

        // 60 young rows, 8 old rows; segment_min 10 means the old
        // segment abstains.
        let mut features: Vec<FeatureRow> = Vec::new();
        let mut y_true = Vec::new();
        for i in 0..60 {
            features.push(vec![Some(25.0)]);
            y_true.push(u8::from(i % 2 == 0));
        }
        for i in 0..8 {
            features.push(vec![Some(60.0)]);
            y_true.push(u8::from(i % 2 == 0));
        }
        let perfect: Vec<u8> = y_true.clone();
        let probs: Vec<f64> = y_true.iter().map(|&t| f64::from(t)).collect();

        let comparisons = compare_segments(
            &[spec], &features, &y_true, &perfect, &probs, &perfect, &probs, 10,
        );

        assert_eq!(comparisons.len(), 2);
        let young = comparisons.iter().find(|c| c.segment == "age<40").unwrap();
        let old = comparisons.iter().find(|c| c.segment == "age>=40").unwrap();
        assert_eq!(young.n, 60);
        assert!(young.evaluable);
        assert_eq!(old.n, 8);
        assert!(!old.evaluable);
        assert!((young.production_f1 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rows_with_missing_segment_feature_are_skipped() {
        let spec = SegmentSpec {
            feature: "age".into(),
            column_index: 0,
            edges: vec![40.0],
        };
        let features: Vec<FeatureRow> = vec![vec![None], vec![Some(30.0)]];
        let y_true = [1_u8, 1];
        let pred = [1_u8, 1];
        let prob = [0.9, 0.9];

        let comparisons =
            compare_segments(&[spec], &features, &y_true, &pred, &prob, &pred, &prob, 1);
        assert_eq!(comparisons.len(), 1);
        assert_eq!(comparisons[0].n, 1);
    }
}
