//! The six-gate promotion decision function.
//!
//! Pure and total over well-typed evidence: same evidence, same verdict.
//! Gates run in a fixed order and the first failure short-circuits, since
//! later gates assume earlier preconditions hold. A rejection here is the
//! gate working, not a failure.

use risk_structs::{DecisionAction, FailedGate};
use serde::Serialize;
use tracing::info;

use crate::metrics::relative_f1_improvement_pct;
use crate::segments::SegmentComparison;

/// Gate thresholds, fixed at configuration time.
#[derive(Debug, Clone, Serialize)]
pub struct GateThresholds {
    pub min_samples_for_decision: u64,
    pub min_coverage_pct: f64,
    pub promotion_cooldown_days: i64,
    pub min_f1_improvement_pct: f64,
    pub max_brier_degradation: f64,
    /// Maximum tolerated per-segment relative F1 drop, in percent.
    pub min_segment_f1_drop: f64,
}

/// Everything the gate function is allowed to look at.
#[derive(Debug, Clone, Serialize)]
pub struct GateEvidence {
    /// Labeled replay rows both models were scored on.
    pub num_samples: u64,
    pub coverage_pct: f64,
    /// `None` when this model name was never promoted.
    pub days_since_last_promotion: Option<i64>,
    pub production_f1: f64,
    pub shadow_f1: f64,
    pub production_brier: f64,
    pub shadow_brier: f64,
    pub segments: Vec<SegmentComparison>,
}

/// One gate's result inside the detail report.
#[derive(Debug, Clone, Serialize)]
pub struct GateCheck {
    pub gate: FailedGate,
    pub passed: bool,
    pub detail: String,
}

/// Verdict plus the structured report the orchestrator persists.
#[derive(Debug, Clone, Serialize)]
pub struct GateOutcome {
    pub decision: DecisionAction,
    pub failed_gate: Option<FailedGate>,
    pub reason: String,
    pub checks: Vec<GateCheck>,
}

/// Runs all six gates in order, short-circuiting on the first failure.
#[must_use]
pub fn evaluate_gates(evidence: &GateEvidence, thresholds: &GateThresholds) -> GateOutcome {
    let mut checks = Vec::with_capacity(6);

    // Gate 1: enough labeled replay rows (inclusive).
    let passed = evidence.num_samples >= thresholds.min_samples_for_decision;
    checks.push(GateCheck {
        gate: FailedGate::SampleValidity,
        passed,
        detail: format!(
            "num_samples {} (min {})",
            evidence.num_samples, thresholds.min_samples_for_decision
        ),
    });
    if !passed {
        return rejected(
            checks,
            FailedGate::SampleValidity,
            format!(
                "num_samples {} < {}",
                evidence.num_samples, thresholds.min_samples_for_decision
            ),
        );
    }

    // Gate 2: labels are representative.
    let passed = evidence.coverage_pct >= thresholds.min_coverage_pct;
    checks.push(GateCheck {
        gate: FailedGate::LabelCoverage,
        passed,
        detail: format!(
            "coverage {:.1}% (min {:.1}%)",
            evidence.coverage_pct, thresholds.min_coverage_pct
        ),
    });
    if !passed {
        return rejected(
            checks,
            FailedGate::LabelCoverage,
            format!(
                "coverage {:.1}% < {:.1}%",
                evidence.coverage_pct, thresholds.min_coverage_pct
            ),
        );
    }

    // Gate 3: promotion cooldown. A model never promoted passes.
    let days = evidence.days_since_last_promotion;
    let passed = days.map_or(true, |d| d >= thresholds.promotion_cooldown_days);
    checks.push(GateCheck {
        gate: FailedGate::PromotionCooldown,
        passed,
        detail: match days {
            Some(d) => format!(
                "{d} days since last promotion (cooldown {} days)",
                thresholds.promotion_cooldown_days
            ),
            None => "no previous promotion".into(),
        },
    });
    if !passed {
        return rejected(
            checks,
            FailedGate::PromotionCooldown,
            format!(
                "{} days < {} days cooldown",
                days.unwrap_or(0),
                thresholds.promotion_cooldown_days
            ),
        );
    }

    // Gate 4: the shadow is measurably better on the primary metric.
    // One shared definition with the recorded comparison, so the
    // persisted improvement is exactly what this verdict saw.
    let improvement_pct =
        relative_f1_improvement_pct(evidence.production_f1, evidence.shadow_f1);
    let passed = improvement_pct >= thresholds.min_f1_improvement_pct;
    checks.push(GateCheck {
        gate: FailedGate::PerformanceGain,
        passed,
        detail: format!(
            "f1 {:.4} -> {:.4} ({improvement_pct:+.2}%, min {:.2}%)",
            evidence.production_f1, evidence.shadow_f1, thresholds.min_f1_improvement_pct
        ),
    });
    if !passed {
        return rejected(
            checks,
            FailedGate::PerformanceGain,
            format!(
                "f1 improvement {improvement_pct:.2}% < {:.2}%",
                thresholds.min_f1_improvement_pct
            ),
        );
    }

    // Gate 5: probabilities are not meaningfully worse (inclusive).
    let brier_change = evidence.shadow_brier - evidence.production_brier;
    let passed = brier_change <= thresholds.max_brier_degradation;
    checks.push(GateCheck {
        gate: FailedGate::CalibrationHold,
        passed,
        detail: format!(
            "brier {:.4} -> {:.4} ({brier_change:+.4}, max {:.4})",
            evidence.production_brier, evidence.shadow_brier, thresholds.max_brier_degradation
        ),
    });
    if !passed {
        return rejected(
            checks,
            FailedGate::CalibrationHold,
            format!(
                "brier degradation {brier_change:.4} > {:.4}",
                thresholds.max_brier_degradation
            ),
        );
    }

    // Gate 6: no evaluable subgroup loses. Insufficient segments abstain.
    let mut regression: Option<(String, f64)> = None;
    let mut abstained = 0_usize;
    for segment in &evidence.segments {
        if !segment.evaluable {
            abstained += 1;
            continue;
        }
        if segment.production_f1 <= 0.0 {
            continue;
        }
        let delta_pct =
            (segment.shadow_f1 - segment.production_f1) / segment.production_f1 * 100.0;
        if delta_pct < -thresholds.min_segment_f1_drop
            && regression
                .as_ref()
                .map_or(true, |(_, worst)| delta_pct < *worst)
        {
            regression = Some((segment.segment.clone(), delta_pct));
        }
    }
    let passed = regression.is_none();
    checks.push(GateCheck {
        gate: FailedGate::SegmentFairness,
        passed,
        detail: format!(
            "{} segments evaluated, {abstained} abstained (max drop {:.1}%)",
            evidence.segments.len() - abstained,
            thresholds.min_segment_f1_drop
        ),
    });
    if let Some((segment, delta_pct)) = regression {
        return rejected(
            checks,
            FailedGate::SegmentFairness,
            format!("segment {segment} regressed by {delta_pct:.1}%"),
        );
    }

    info!(
        f1_improvement_pct = improvement_pct,
        brier_change, "all gates passed"
    );

    GateOutcome {
        decision: DecisionAction::Promote,
        failed_gate: None,
        reason: "all gates passed".into(),
        checks,
    }
}

fn rejected(checks: Vec<GateCheck>, gate: FailedGate, reason: String) -> GateOutcome {
    info!(gate = %gate, reason = %reason, "gate rejected candidate");
    GateOutcome {
        decision: DecisionAction::Reject,
        failed_gate: Some(gate),
        reason,
        checks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> GateThresholds {
        GateThresholds {
            min_samples_for_decision: 200,
            min_coverage_pct: 30.0,
            promotion_cooldown_days: 7,
            min_f1_improvement_pct: 2.0,
            max_brier_degradation: 0.01,
            min_segment_f1_drop: 1.0,
        }
    }

    fn passing_evidence() -> GateEvidence {
        GateEvidence {
            num_samples: 1800,
            coverage_pct: 36.0,
            days_since_last_promotion: Some(14),
            production_f1: 0.800,
            shadow_f1: 0.826,
            production_brier: 0.150,
            shadow_brier: 0.153,
            segments: vec![
                SegmentComparison {
                    segment: "age<30".into(),
                    n: 300,
                    production_f1: 0.78,
                    shadow_f1: 0.79,
                    evaluable: true,
                },
                SegmentComparison {
                    segment: "age>=52".into(),
                    n: 280,
                    production_f1: 0.81,
                    shadow_f1: 0.82,
                    evaluable: true,
                },
            ],
        }
    }

    #[test]
    fn test_all_gates_pass() {
        let outcome = evaluate_gates(&passing_evidence(), &thresholds());
        assert_eq!(outcome.decision, DecisionAction::Promote);
        assert_eq!(outcome.failed_gate, None);
        assert_eq!(outcome.reason, "all gates passed");
        assert_eq!(outcome.checks.len(), 6);
        assert!(outcome.checks.iter().all(|c| c.passed));
    }

    #[test]
    fn test_sample_validity_boundary_inclusive() {
        let mut evidence = passing_evidence();
        evidence.num_samples = 200;
        let outcome = evaluate_gates(&evidence, &thresholds());
        assert_eq!(outcome.decision, DecisionAction::Promote, "200 passes");

        evidence.num_samples = 199;
        let outcome = evaluate_gates(&evidence, &thresholds());
        assert_eq!(outcome.failed_gate, Some(FailedGate::SampleValidity));
        assert_eq!(outcome.reason, "num_samples 199 < 200");
        // Short-circuit: only the first gate was checked.
        assert_eq!(outcome.checks.len(), 1);
    }

    #[test]
    fn test_coverage_boundary_inclusive() {
        let mut evidence = passing_evidence();
        evidence.coverage_pct = 30.0;
        assert_eq!(
            evaluate_gates(&evidence, &thresholds()).decision,
            DecisionAction::Promote
        );

        evidence.coverage_pct = 29.9;
        let outcome = evaluate_gates(&evidence, &thresholds());
        assert_eq!(outcome.failed_gate, Some(FailedGate::LabelCoverage));
        assert_eq!(outcome.reason, "coverage 29.9% < 30.0%");
    }

    #[test]
    fn test_cooldown_blocks() {
        let mut evidence = passing_evidence();
        evidence.days_since_last_promotion = Some(3);
        let outcome = evaluate_gates(&evidence, &thresholds());
        assert_eq!(outcome.failed_gate, Some(FailedGate::PromotionCooldown));
        assert_eq!(outcome.reason, "3 days < 7 days cooldown");

        // Never promoted: cooldown is vacuously satisfied.
        evidence.days_since_last_promotion = None;
        assert_eq!(
            evaluate_gates(&evidence, &thresholds()).decision,
            DecisionAction::Promote
        );
    }

    #[test]
    fn test_f1_improvement_boundary_inclusive() {
        let mut evidence = passing_evidence();
        evidence.production_f1 = 0.800;
        evidence.shadow_f1 = 0.800 * 1.02;
        assert_eq!(
            evaluate_gates(&evidence, &thresholds()).decision,
            DecisionAction::Promote,
            "exactly +2% passes"
        );

        evidence.shadow_f1 = 0.810;
        let outcome = evaluate_gates(&evidence, &thresholds());
        assert_eq!(outcome.failed_gate, Some(FailedGate::PerformanceGain));
        assert_eq!(outcome.reason, "f1 improvement 1.25% < 2.00%");
    }

    #[test]
    fn test_brier_boundary_inclusive() {
        let mut evidence = passing_evidence();
        // Values chosen so the subtraction is exact in f64.
        evidence.production_brier = 0.0;
        evidence.shadow_brier = 0.01;
        assert_eq!(
            evaluate_gates(&evidence, &thresholds()).decision,
            DecisionAction::Promote,
            "delta equal to the maximum passes"
        );

        evidence.shadow_brier = evidence.production_brier + 0.015;
        let outcome = evaluate_gates(&evidence, &thresholds());
        assert_eq!(outcome.failed_gate, Some(FailedGate::CalibrationHold));
        assert_eq!(outcome.reason, "brier degradation 0.0150 > 0.0100");
    }

    #[test]
    fn test_zero_production_f1_agrees_with_comparison() {
        let mut evidence = passing_evidence();
        evidence.production_f1 = 0.0;
        let outcome = evaluate_gates(&evidence, &thresholds());
        assert_eq!(outcome.decision, DecisionAction::Promote);

        // The same infinite value that passed the gate is what the
        // comparison records in the decision row.
        let recorded =
            relative_f1_improvement_pct(evidence.production_f1, evidence.shadow_f1);
        assert!(recorded.is_infinite());

        // Neither model scores anything: no measurable gain, gate fails.
        evidence.shadow_f1 = 0.0;
        let outcome = evaluate_gates(&evidence, &thresholds());
        assert_eq!(outcome.failed_gate, Some(FailedGate::PerformanceGain));
        assert_eq!(relative_f1_improvement_pct(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_segment_regression_fails() {
        let mut evidence = passing_evidence();
        evidence.segments[0].shadow_f1 = evidence.segments[0].production_f1 * 0.98;
        let outcome = evaluate_gates(&evidence, &thresholds());
        assert_eq!(outcome.failed_gate, Some(FailedGate::SegmentFairness));
        assert_eq!(outcome.reason, "segment age<30 regressed by -2.0%");
    }

    #[test]
    fn test_insufficient_segment_abstains() {
        let mut evidence = passing_evidence();
        evidence.segments[0].shadow_f1 = 0.0;
        evidence.segments[0].evaluable = false;
        evidence.segments[0].n = 49;
        assert_eq!(
            evaluate_gates(&evidence, &thresholds()).decision,
            DecisionAction::Promote,
            "a segment below the minimum abstains instead of failing"
        );
    }

    #[test]
    fn test_gate_determinism() {
        let evidence = passing_evidence();
        let t = thresholds();
        let a = evaluate_gates(&evidence, &t);
        let b = evaluate_gates(&evidence, &t);
        assert_eq!(a.decision, b.decision);
        assert_eq!(a.failed_gate, b.failed_gate);
        assert_eq!(a.reason, b.reason);
    }

    #[test]
    fn test_report_serializes() {
        let outcome = evaluate_gates(&passing_evidence(), &thresholds());
        let json = serde_json::to_string(&outcome).expect("serialize");
        assert!(json.contains("all gates passed"));
        assert!(json.contains("sample_validity"));
    }
}
