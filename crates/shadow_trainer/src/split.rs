//! Temporal train/replay split.
//!
//! No random splits: the replay set is always the most recent slice of
//! the labeled window, so evaluation never sees information from the
//! model's own training future.

use tracing::debug;

use crate::LabeledRow;

/// Splits labeled rows into `(training, replay)` with the most recent
/// `test_fraction` reserved as the replay set. Rows are sorted by
/// `(created_at, prediction_id)` first, so callers may pass them in any
/// order. Either side may come back empty; the orchestrator treats that
/// as an empty partition and skips.
#[must_use]
pub fn temporal_split(mut rows: Vec<LabeledRow>, test_fraction: f64) -> (Vec<LabeledRow>, Vec<LabeledRow>) {
    rows.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.prediction_id.cmp(&b.prediction_id))
    });

    let replay_count = (rows.len() as f64 * test_fraction.clamp(0.0, 1.0)) as usize;
    let train_count = rows.len() - replay_count;
    let replay = rows.split_off(train_count);

    debug!(
        train = rows.len(),
        replay = replay.len(),
        "temporal split"
    );
    (rows, replay)
}
