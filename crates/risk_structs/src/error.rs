//! Error taxonomy for the serving core.
//!
//! Every loop catches at its top frame and translates into this sum type;
//! no error escapes a tick or an orchestration into the scheduler. The
//! variants map one-to-one onto persisted decision/metric rows or fatal
//! operational log entries.

use thiserror::Error;
use uuid::Uuid;

use crate::stage::ModelStage;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Reference digest mismatch or corrupted on-disk state. Never
    /// retried; the affected run aborts and an operator must intervene.
    #[error("reference integrity violated: {0}")]
    Integrity(String),

    /// Too few samples or too low coverage. Not a failure: surfaces as a
    /// `skip` decision or a degenerate metrics row.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// Connection/I/O failure against the ledger or registry. Retried
    /// with bounded exponential backoff.
    #[error("transient storage failure: {0}")]
    TransientStorage(String),

    /// The training function raised or exceeded its deadline. Produces a
    /// `skip` decision; no partial model is registered.
    #[error("training failed: {0}")]
    TrainingFailure(String),

    /// A concurrent promotion won the registry commit race.
    #[error("registry conflict: {0}")]
    RegistryConflict(String),

    /// A mutation would leave the registry with zero or two production
    /// rows. Fatal; nothing is written.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("duplicate prediction {0}")]
    DuplicatePrediction(Uuid),

    #[error("label references unknown prediction {0}")]
    UnknownPrediction(Uuid),

    #[error("prediction {0} already labeled")]
    AlreadyLabeled(Uuid),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("unknown model version {model_name} v{version}")]
    UnknownVersion { model_name: String, version: i64 },

    #[error("illegal stage transition {from} -> {to}")]
    IllegalTransition { from: ModelStage, to: ModelStage },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Whether a retry with backoff is worthwhile.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStorage(_))
    }

    /// Process exit code for the operator CLI: 2 for failed
    /// preconditions, 3 for invariant violations, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InsufficientData(_)
            | Self::DuplicatePrediction(_)
            | Self::UnknownPrediction(_)
            | Self::AlreadyLabeled(_)
            | Self::AlreadyExists(_) => 2,
            Self::Integrity(_)
            | Self::RegistryConflict(_)
            | Self::InvariantViolation(_)
            | Self::UnknownVersion { .. }
            | Self::IllegalTransition { .. } => 3,
            _ => 1,
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::TransientStorage(err.to_string())
    }
}

/// True if the storage error is a unique-constraint violation.
///
/// Call sites decide what the violated constraint means (duplicate
/// prediction, existing label, lost promotion race) before falling back to
/// the blanket transient conversion.
#[must_use]
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}
