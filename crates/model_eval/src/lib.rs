//! Replay-based model evaluation and the promotion gate.
//!
//! Production and shadow are always compared on identical labeled rows;
//! the gate function is pure and does no I/O, so the orchestrator owns
//! every artifact write.

pub mod gate;
pub mod metrics;
pub mod segments;

pub use gate::{evaluate_gates, GateCheck, GateEvidence, GateOutcome, GateThresholds};
pub use metrics::{
    compare, evaluate, relative_f1_improvement_pct, ClassificationMetrics, ConfusionMatrix,
    ModelComparison,
};
pub use segments::{build_segment_specs, compare_segments, SegmentComparison, SegmentSpec};
