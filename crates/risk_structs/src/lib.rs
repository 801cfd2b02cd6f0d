//! Shared domain types for the credit-risk serving core.
//!
//! Everything that more than one crate needs to agree on lives here: the
//! feature schema with its semantic type tags, the registry stage machine,
//! decision vocabulary, the error taxonomy and the retry policy for
//! transient storage failures.

pub mod error;
pub mod retry;
pub mod schema;
pub mod stage;

pub use error::CoreError;
pub use retry::{with_retry, RetryPolicy};
pub use schema::{FeatureColumn, FeatureRow, FeatureSchema, SemanticType};
pub use stage::{DecisionAction, FailedGate, ModelStage, TriggerReason};
