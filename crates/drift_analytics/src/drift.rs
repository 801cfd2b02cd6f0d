//! Per-feature drift verdicts against the frozen reference.
//!
//! A feature drifts only when both conditions hold: the test p-value is
//! below the significance threshold AND the effect size is at or above
//! the floor. With large windows the p-value alone trends to zero and
//! floods alerts; the effect size keeps verdicts material.

use std::collections::BTreeMap;

use risk_structs::{FeatureSchema, SemanticType};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::stats::{chi_square_two_sample, ks_two_sample, total_variation, wasserstein_normalized};

/// Thresholds for the drift verdicts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DriftConfig {
    /// Significance threshold for the per-feature tests.
    pub p_threshold: f64,
    /// Minimum effect size (normalized Wasserstein or total variation).
    pub effect_size_floor: f64,
    /// Drift-ratio threshold above which dataset drift is declared.
    pub dataset_threshold: f64,
    /// Minimum non-null values on each side for a feature to be
    /// evaluable.
    pub min_feature_samples: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            p_threshold: 0.05,
            effect_size_floor: 0.1,
            dataset_threshold: 0.30,
            min_feature_samples: 30,
        }
    }
}

/// Verdict for one feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureDrift {
    pub feature: String,
    pub semantic_type: SemanticType,
    /// `ks` or `chi_square`.
    pub stat_test: String,
    pub p_value: Option<f64>,
    pub effect_size: Option<f64>,
    pub drifted: bool,
    pub excluded: bool,
    pub exclusion_reason: Option<String>,
    pub reference_samples: usize,
    pub current_samples: usize,
}

/// Dataset-level drift summary; the per-run artifact serializes this
/// structure verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftSummary {
    pub dataset_drift_detected: bool,
    /// `num_drifted_features / num_evaluated_features`; zero when no
    /// feature was evaluable.
    pub feature_drift_ratio: f64,
    pub num_drifted_features: u64,
    pub num_evaluated_features: u64,
    pub num_excluded_features: u64,
    pub drifted_features: Vec<String>,
    pub features: Vec<FeatureDrift>,
}

/// Drift detector bound to a frozen reference.
pub struct DriftDetector<'a> {
    schema: &'a FeatureSchema,
    /// Non-null reference values per schema column.
    reference_columns: &'a [Vec<f64>],
    config: DriftConfig,
}

impl<'a> DriftDetector<'a> {
    #[must_use]
    pub fn new(
        schema: &'a FeatureSchema,
        reference_columns: &'a [Vec<f64>],
        config: DriftConfig,
    ) -> Self {
        debug_assert_eq!(schema.len(), reference_columns.len());
        Self {
            schema,
            reference_columns,
            config,
        }
    }

    /// Runs per-feature verdicts over the window's non-null column
    /// values, one `Vec<f64>` per schema column.
    #[must_use]
    pub fn detect(&self, current_columns: &[Vec<f64>]) -> DriftSummary {
        debug_assert_eq!(current_columns.len(), self.schema.len());

        let mut features = Vec::with_capacity(self.schema.len());
        let mut drifted_features = Vec::new();
        let mut evaluated = 0_u64;
        let mut excluded = 0_u64;

        for (idx, column) in self.schema.columns().iter().enumerate() {
            let reference = &self.reference_columns[idx];
            let current = &current_columns[idx];

            if reference.len() < self.config.min_feature_samples
                || current.len() < self.config.min_feature_samples
            {
                excluded += 1;
                features.push(FeatureDrift {
                    feature: column.name.clone(),
                    semantic_type: column.semantic_type,
                    stat_test: test_name(column.semantic_type).into(),
                    p_value: None,
                    effect_size: None,
                    drifted: false,
                    excluded: true,
                    exclusion_reason: Some(format!(
                        "fewer than {} non-null values (reference {}, current {})",
                        self.config.min_feature_samples,
                        reference.len(),
                        current.len()
                    )),
                    reference_samples: reference.len(),
                    current_samples: current.len(),
                });
                continue;
            }

            evaluated += 1;
            let (p_value, effect_size) = match column.semantic_type {
                SemanticType::Continuous | SemanticType::Ordinal => {
                    let ks = ks_two_sample(reference, current);
                    (ks.p_value, wasserstein_normalized(reference, current))
                }
                SemanticType::Categorical => {
                    let (ref_counts, cur_counts) = category_counts(reference, current);
                    let chi = chi_square_two_sample(&ref_counts, &cur_counts);
                    (chi.p_value, total_variation(&ref_counts, &cur_counts))
                }
            };

            let drifted =
                p_value < self.config.p_threshold && effect_size >= self.config.effect_size_floor;
            if drifted {
                drifted_features.push(column.name.clone());
            }

            features.push(FeatureDrift {
                feature: column.name.clone(),
                semantic_type: column.semantic_type,
                stat_test: test_name(column.semantic_type).into(),
                p_value: Some(p_value),
                effect_size: Some(effect_size),
                drifted,
                excluded: false,
                exclusion_reason: None,
                reference_samples: reference.len(),
                current_samples: current.len(),
            });
        }

        let num_drifted = drifted_features.len() as u64;
        let feature_drift_ratio = if evaluated > 0 {
            num_drifted as f64 / evaluated as f64
        } else {
            0.0
        };
        let dataset_drift_detected = feature_drift_ratio >= self.config.dataset_threshold;

        debug!(
            drifted = num_drifted,
            evaluated,
            excluded,
            ratio = feature_drift_ratio,
            dataset_drift_detected,
            "drift verdicts computed"
        );

        DriftSummary {
            dataset_drift_detected,
            feature_drift_ratio,
            num_drifted_features: num_drifted,
            num_evaluated_features: evaluated,
            num_excluded_features: excluded,
            drifted_features,
            features,
        }
    }
}

fn test_name(semantic_type: SemanticType) -> &'static str {
    match semantic_type {
        SemanticType::Continuous | SemanticType::Ordinal => "ks",
        SemanticType::Categorical => "chi_square",
    }
}

/// Aligned category counts over the union of codes seen on either side.
fn category_counts(reference: &[f64], current: &[f64]) -> (Vec<u64>, Vec<u64>) {
    let mut counts: BTreeMap<i64, (u64, u64)> = BTreeMap::new();

    for v in reference {
        counts.entry(category_key(*v)).or_default().0 += 1;
    }
    for v in current {
        counts.entry(category_key(*v)).or_default().1 += 1;
    }

    counts.values().map(|&(r, c)| (r, c)).unzip()
}

/// Categorical columns carry discrete codes; keying on the rounded value
/// keeps `2.0` and `2` in the same bucket.
fn category_key(value: f64) -> i64 {
    value.round() as i64
}

#[cfg(test)]
mod tests {
    use risk_structs::FeatureColumn;

    use super::*;

    fn schema() -> FeatureSchema {
        FeatureSchema::new(vec![
            FeatureColumn::new("DebtRatio", SemanticType::Continuous),
            FeatureColumn::new("age", SemanticType::Ordinal),
            FeatureColumn::new("NumberOfDependents", SemanticType::Categorical),
        ])
    }

    fn ramp(n: usize, offset: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 / n as f64 + offset).collect()
    }

    fn codes(spec: &[(i64, usize)]) -> Vec<f64> {
        spec.iter()
            .flat_map(|&(code, count)| std::iter::repeat(code as f64).take(count))
            .collect()
    }

    #[test]
    fn test_no_drift_on_identical_window() {
        let schema = schema();
        let reference = vec![
            ramp(300, 0.0),
            ramp(300, 30.0),
            codes(&[(0, 150), (1, 100), (2, 50)]),
        ];
        let detector = DriftDetector::new(&schema, &reference, DriftConfig::default());

        let summary = detector.detect(&reference);
        assert!(!summary.dataset_drift_detected);
        assert_eq!(summary.num_drifted_features, 0);
        assert_eq!(summary.num_evaluated_features, 3);
        assert!(summary.feature_drift_ratio.abs() < 1e-12);
    }

    #[test]
    fn test_shifted_features_drift() {
        let schema = schema();
        let reference = vec![
            ramp(300, 0.0),
            ramp(300, 30.0),
            codes(&[(0, 150), (1, 100), (2, 50)]),
        ];
        let detector = DriftDetector::new(&schema, &reference, DriftConfig::default());

        let current = vec![
            ramp(300, 0.5),
            ramp(300, 45.0),
            codes(&[(0, 30), (1, 70), (2, 200)]),
        ];
        let summary = detector.detect(&current);

        assert_eq!(summary.num_drifted_features, 3);
        assert!(summary.dataset_drift_detected);
        assert!((summary.feature_drift_ratio - 1.0).abs() < 1e-12);
        assert!(summary.drifted_features.contains(&"DebtRatio".to_string()));
        assert!(summary
            .drifted_features
            .contains(&"NumberOfDependents".to_string()));
    }

    #[test]
    fn test_sparse_feature_excluded_from_denominator() {
        let schema = schema();
        let reference = vec![
            ramp(300, 0.0),
            ramp(300, 30.0),
            codes(&[(0, 150), (1, 150)]),
        ];
        let detector = DriftDetector::new(&schema, &reference, DriftConfig::default());

        // The ordinal column has only 10 non-null values in the window.
        let current = vec![ramp(300, 0.5), ramp(10, 45.0), codes(&[(0, 20), (1, 280)])];
        let summary = detector.detect(&current);

        assert_eq!(summary.num_evaluated_features, 2);
        assert_eq!(summary.num_excluded_features, 1);
        let age = summary
            .features
            .iter()
            .find(|f| f.feature == "age")
            .unwrap();
        assert!(age.excluded);
        assert!(!age.drifted);
        assert!(age.exclusion_reason.is_some());

        // Ratio identity over the evaluated set only.
        let expected =
            summary.num_drifted_features as f64 / summary.num_evaluated_features as f64;
        assert!((summary.feature_drift_ratio - expected).abs() < 1e-12);
    }

    #[test]
    fn test_small_shift_blocked_by_effect_size() {
        let schema = FeatureSchema::new(vec![FeatureColumn::new(
            "DebtRatio",
            SemanticType::Continuous,
        )]);
        // Large n makes the KS p-value significant even for a shift well
        // under the effect-size floor (0.02 / std 0.289 = 0.07).
        let reference = vec![ramp(20_000, 0.0)];
        let current = vec![ramp(20_000, 0.02)];
        let detector = DriftDetector::new(&schema, &reference, DriftConfig::default());

        let summary = detector.detect(&current);
        let feature = &summary.features[0];
        assert!(feature.p_value.unwrap() < 0.05, "p alone would alert");
        assert!(feature.effect_size.unwrap() < 0.1);
        assert!(!feature.drifted, "effect-size floor suppresses the alert");
    }

    #[test]
    fn test_summary_serializes_for_artifact() {
        let schema = schema();
        let reference = vec![
            ramp(300, 0.0),
            ramp(300, 30.0),
            codes(&[(0, 150), (1, 100), (2, 50)]),
        ];
        let detector = DriftDetector::new(&schema, &reference, DriftConfig::default());
        let summary = detector.detect(&reference);

        let json = serde_json::to_string(&summary).expect("serialize");
        let back: DriftSummary = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.num_evaluated_features, 3);
        assert_eq!(back.features.len(), 3);
    }
}
