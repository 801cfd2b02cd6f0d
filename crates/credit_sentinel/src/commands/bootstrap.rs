//! Bootstrap-reference command: one-shot creation of the frozen
//! baseline from a CSV of feature rows.

use std::path::Path;

use chrono::Utc;
use config::Config;
use reference_baseline::{read_rows_csv, BaselineStore};
use risk_structs::{CoreError, FeatureSchema};
use tracing::info;

/// Runs the bootstrap-reference command.
///
/// # Errors
///
/// Fails with the already-exists precondition if a baseline is on disk,
/// or with an invariant violation for rows that do not match the schema.
pub fn run(config: &Config, rows_source: &Path) -> Result<(), CoreError> {
    let schema = FeatureSchema::credit_risk_default();
    let rows = read_rows_csv(rows_source, &schema)?;
    if rows.is_empty() {
        return Err(CoreError::InsufficientData(format!(
            "{} contains no rows",
            rows_source.display()
        )));
    }

    let store = BaselineStore::new(&config.baseline_dir);
    let baseline = store.bootstrap(schema, rows, Utc::now())?;

    info!(reference_id = %baseline.reference_id, "reference baseline bootstrapped");
    println!(
        "Reference baseline created: {} rows, digest {}",
        baseline.row_count, baseline.content_digest
    );
    Ok(())
}
