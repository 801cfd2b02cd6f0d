//! Registry stages and the decision vocabulary.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle stage of a registered model version.
///
/// Legal transitions:
///
/// ```text
/// None       -> Staging     (training success)
/// Staging    -> Production  (gate verdict: promote)
/// Staging    -> Archived    (gate verdict: reject, or staging TTL)
/// Production -> Archived    (another version promoted)
/// Archived   -> Production  (manual rollback)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ModelStage {
    Staging,
    Production,
    Archived,
    None,
}

impl ModelStage {
    /// Whether `self -> to` is a legal stage transition.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::None, Self::Staging)
                | (Self::Staging, Self::Production)
                | (Self::Staging, Self::Archived)
                | (Self::Production, Self::Archived)
                | (Self::Archived, Self::Production)
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Staging => "staging",
            Self::Production => "production",
            Self::Archived => "archived",
            Self::None => "none",
        }
    }
}

impl fmt::Display for ModelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a retraining orchestration was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TriggerReason {
    Scheduled,
    Manual,
    DriftAlert,
}

impl TriggerReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
            Self::DriftAlert => "drift_alert",
        }
    }
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "manual" => Ok(Self::Manual),
            "drift_alert" => Ok(Self::DriftAlert),
            other => Err(format!("unknown trigger reason: {other}")),
        }
    }
}

/// Outcome of one invocation of the retraining decision loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DecisionAction {
    Train,
    Skip,
    Promote,
    Reject,
}

impl DecisionAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Skip => "skip",
            Self::Promote => "promote",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which gate rejected a candidate, named by what the gate checks.
///
/// `ConcurrentPromotion` is not one of the six evaluation gates: it marks
/// an orchestration that lost the atomic promotion race after its gate
/// verdict had already passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum FailedGate {
    SampleValidity,
    LabelCoverage,
    PromotionCooldown,
    PerformanceGain,
    CalibrationHold,
    SegmentFairness,
    ConcurrentPromotion,
}

impl FailedGate {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SampleValidity => "sample_validity",
            Self::LabelCoverage => "label_coverage",
            Self::PromotionCooldown => "promotion_cooldown",
            Self::PerformanceGain => "performance_gain",
            Self::CalibrationHold => "calibration_hold",
            Self::SegmentFairness => "segment_fairness",
            Self::ConcurrentPromotion => "concurrent_promotion",
        }
    }
}

impl fmt::Display for FailedGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        assert!(ModelStage::None.can_transition_to(ModelStage::Staging));
        assert!(ModelStage::Staging.can_transition_to(ModelStage::Production));
        assert!(ModelStage::Staging.can_transition_to(ModelStage::Archived));
        assert!(ModelStage::Production.can_transition_to(ModelStage::Archived));
        assert!(ModelStage::Archived.can_transition_to(ModelStage::Production));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!ModelStage::Production.can_transition_to(ModelStage::Staging));
        assert!(!ModelStage::Archived.can_transition_to(ModelStage::Staging));
        assert!(!ModelStage::None.can_transition_to(ModelStage::Production));
        assert!(!ModelStage::Staging.can_transition_to(ModelStage::None));
    }

    #[test]
    fn test_trigger_reason_round_trip() {
        for reason in [
            TriggerReason::Scheduled,
            TriggerReason::Manual,
            TriggerReason::DriftAlert,
        ] {
            let parsed: TriggerReason = reason.as_str().parse().expect("parse");
            assert_eq!(parsed, reason);
        }
        assert!("nonsense".parse::<TriggerReason>().is_err());
    }

    #[test]
    fn test_gate_labels_are_snake_case() {
        assert_eq!(FailedGate::SampleValidity.as_str(), "sample_validity");
        assert_eq!(
            FailedGate::ConcurrentPromotion.as_str(),
            "concurrent_promotion"
        );
    }
}
