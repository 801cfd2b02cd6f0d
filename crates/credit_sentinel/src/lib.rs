//! Self-healing serving core for a binary credit-risk classifier.
//!
//! Keeps exactly one production model live per model name, monitors the
//! input distribution of served predictions against a frozen reference,
//! trains shadow candidates on drift or schedule, and promotes only
//! through a six-gate policy executed as one atomic registry
//! transaction.

pub mod commands;
pub mod monitoring;
pub mod orchestrator;
pub mod promoter;
pub mod scheduler;
pub mod signals;

pub use monitoring::{MonitoringEngine, TickOutcome};
pub use orchestrator::{OrchestrationOutcome, RetrainingOrchestrator};
pub use promoter::{ModelPromoter, ProductionModel};
pub use signals::{DriftAlert, ModelPromoted, Signals};
