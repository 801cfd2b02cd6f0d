//! Drift and proxy-metric analytics for the monitoring engine.
//!
//! This crate is statistics only: it observes and reports, it never
//! decides. Whether drift warrants retraining is the orchestrator's call.

pub mod drift;
pub mod proxy;
pub mod stats;

pub use drift::{DriftConfig, DriftDetector, DriftSummary, FeatureDrift};
pub use proxy::{binary_entropy, ProxyAccumulator, ProxyMetrics};
pub use stats::WelfordStats;
