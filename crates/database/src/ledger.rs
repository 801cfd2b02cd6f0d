//! Prediction and label ledger.
//!
//! The ledger is append-only: the serving shell appends predictions, the
//! label source appends labels, and the core only reads. Reads are
//! ordered by `(created_at, prediction_id)` so windows replay
//! deterministically.

use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use risk_structs::error::is_unique_violation;
use risk_structs::CoreError;
use sqlx::types::Json;
use sqlx::SqlitePool;
use tracing::debug;

use crate::models::{
    CoverageStats, CreateLabel, CreatePrediction, LabelRecord, LabeledPrediction, PredictionRecord,
};

/// Repository for ledger operations.
pub struct PredictionLedger;

impl PredictionLedger {
    /// Appends one prediction.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::DuplicatePrediction`] if the id was already
    /// logged; the at-least-once serving contract treats that as a no-op
    /// at the call site.
    pub async fn append_prediction(
        pool: &SqlitePool,
        input: CreatePrediction,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO predictions (
                prediction_id, created_at, model_name, model_version,
                features, predicted_class, predicted_probability,
                request_source, response_time_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(input.prediction_id)
        .bind(input.created_at)
        .bind(&input.model_name)
        .bind(input.model_version)
        .bind(Json(&input.features))
        .bind(input.predicted_class)
        .bind(input.predicted_probability)
        .bind(&input.request_source)
        .bind(input.response_time_ms)
        .execute(pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(CoreError::DuplicatePrediction(input.prediction_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Appends one label for an existing prediction, deriving
    /// `days_delayed` from the prediction timestamp.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::UnknownPrediction`] if no prediction with
    /// that id exists, or [`CoreError::AlreadyLabeled`] if one label is
    /// already recorded.
    pub async fn append_label(
        pool: &SqlitePool,
        input: CreateLabel,
    ) -> Result<LabelRecord, CoreError> {
        let predicted_at: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT created_at FROM predictions WHERE prediction_id = ?")
                .bind(input.prediction_id)
                .fetch_optional(pool)
                .await?;

        let Some(predicted_at) = predicted_at else {
            return Err(CoreError::UnknownPrediction(input.prediction_id));
        };

        let days_delayed = (input.label_observed_at - predicted_at).num_days().max(0);

        let result = sqlx::query(
            r"
            INSERT INTO labels (
                prediction_id, true_class, label_observed_at,
                label_source, days_delayed
            ) VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(input.prediction_id)
        .bind(input.true_class)
        .bind(input.label_observed_at)
        .bind(&input.label_source)
        .bind(days_delayed)
        .execute(pool)
        .await;

        match result {
            Ok(_) => Ok(LabelRecord {
                prediction_id: input.prediction_id,
                true_class: input.true_class,
                label_observed_at: input.label_observed_at,
                label_source: input.label_source,
                days_delayed,
            }),
            Err(err) if is_unique_violation(&err) => {
                Err(CoreError::AlreadyLabeled(input.prediction_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Streams predictions in `[window_start, window_end]` ordered by
    /// `(created_at, prediction_id)`, without loading the window into
    /// memory.
    pub fn stream_predictions_since<'a>(
        pool: &'a SqlitePool,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> BoxStream<'a, Result<PredictionRecord, CoreError>> {
        sqlx::query_as::<_, PredictionRecord>(
            r"
            SELECT prediction_id, created_at, model_name, model_version,
                   features, predicted_class, predicted_probability,
                   request_source, response_time_ms
            FROM predictions
            WHERE created_at >= ? AND created_at <= ?
            ORDER BY created_at ASC, prediction_id ASC
            ",
        )
        .bind(window_start)
        .bind(window_end)
        .fetch(pool)
        .map(|row| row.map_err(CoreError::from))
        .boxed()
    }

    /// Inner join of predictions in the window with their labels, same
    /// ordering rule as [`Self::stream_predictions_since`].
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn join_labeled(
        pool: &SqlitePool,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<LabeledPrediction>, CoreError> {
        let rows = sqlx::query_as::<_, LabeledPrediction>(
            r"
            SELECT p.prediction_id, p.created_at, p.model_name, p.model_version,
                   p.features, p.predicted_class, p.predicted_probability,
                   p.request_source, p.response_time_ms,
                   l.true_class, l.label_observed_at, l.label_source, l.days_delayed
            FROM predictions p
            INNER JOIN labels l ON l.prediction_id = p.prediction_id
            WHERE p.created_at >= ? AND p.created_at <= ?
            ORDER BY p.created_at ASC, p.prediction_id ASC
            ",
        )
        .bind(window_start)
        .bind(window_end)
        .fetch_all(pool)
        .await?;

        debug!(rows = rows.len(), "joined labeled predictions");
        Ok(rows)
    }

    /// Prediction and label counts over the window, in one pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn coverage_stats(
        pool: &SqlitePool,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<CoverageStats, CoreError> {
        let (num_predictions, num_labeled): (i64, i64) = sqlx::query_as(
            r"
            SELECT COUNT(*), COUNT(l.prediction_id)
            FROM predictions p
            LEFT JOIN labels l ON l.prediction_id = p.prediction_id
            WHERE p.created_at >= ? AND p.created_at <= ?
            ",
        )
        .bind(window_start)
        .bind(window_end)
        .fetch_one(pool)
        .await?;

        let coverage_fraction = if num_predictions > 0 {
            num_labeled as f64 / num_predictions as f64
        } else {
            0.0
        };

        Ok(CoverageStats {
            num_predictions: num_predictions as u64,
            num_labeled: num_labeled as u64,
            coverage_fraction,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use futures_util::TryStreamExt;
    use uuid::Uuid;

    use super::*;
    use crate::{create_memory_pool, run_migrations};

    async fn test_pool() -> SqlitePool {
        let pool = create_memory_pool().await.expect("pool");
        run_migrations(&pool).await.expect("migrations");
        pool
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, minute, 0).unwrap()
    }

    fn prediction(created_at: DateTime<Utc>, class: i64, prob: f64) -> CreatePrediction {
        CreatePrediction {
            prediction_id: Uuid::new_v4(),
            created_at,
            model_name: "credit-risk-model".into(),
            model_version: 1,
            features: vec![Some(0.4), Some(45.0), Some(0.0)],
            predicted_class: class,
            predicted_probability: prob,
            request_source: "api".into(),
            response_time_ms: Some(12),
        }
    }

    #[tokio::test]
    async fn test_append_prediction_dedup() {
        let pool = test_pool().await;
        let input = prediction(at(9, 0), 1, 0.8);

        PredictionLedger::append_prediction(&pool, input.clone())
            .await
            .expect("first append");

        let err = PredictionLedger::append_prediction(&pool, input.clone())
            .await
            .expect_err("duplicate must fail");
        assert!(matches!(err, CoreError::DuplicatePrediction(id) if id == input.prediction_id));

        // The ledger is unchanged by the duplicate.
        let stats = PredictionLedger::coverage_stats(&pool, at(8, 0), at(10, 0))
            .await
            .expect("stats");
        assert_eq!(stats.num_predictions, 1);
    }

    #[tokio::test]
    async fn test_append_label_requires_prediction() {
        let pool = test_pool().await;

        let err = PredictionLedger::append_label(
            &pool,
            CreateLabel {
                prediction_id: Uuid::new_v4(),
                true_class: 1,
                label_observed_at: at(12, 0),
                label_source: "repayment-feed".into(),
            },
        )
        .await
        .expect_err("unknown prediction must fail");
        assert!(matches!(err, CoreError::UnknownPrediction(_)));
    }

    #[tokio::test]
    async fn test_one_label_per_prediction() {
        let pool = test_pool().await;
        let input = prediction(at(9, 0), 0, 0.2);
        let id = input.prediction_id;
        PredictionLedger::append_prediction(&pool, input)
            .await
            .expect("append");

        let label = CreateLabel {
            prediction_id: id,
            true_class: 0,
            label_observed_at: at(12, 0),
            label_source: "repayment-feed".into(),
        };
        PredictionLedger::append_label(&pool, label.clone())
            .await
            .expect("first label");

        let err = PredictionLedger::append_label(&pool, label)
            .await
            .expect_err("second label must fail");
        assert!(matches!(err, CoreError::AlreadyLabeled(dup) if dup == id));
    }

    #[tokio::test]
    async fn test_days_delayed_derivation() {
        let pool = test_pool().await;
        let input = prediction(at(9, 0), 1, 0.7);
        let id = input.prediction_id;
        PredictionLedger::append_prediction(&pool, input)
            .await
            .expect("append");

        let observed = Utc.with_ymd_and_hms(2024, 6, 11, 9, 0, 0).unwrap();
        let label = PredictionLedger::append_label(
            &pool,
            CreateLabel {
                prediction_id: id,
                true_class: 1,
                label_observed_at: observed,
                label_source: "repayment-feed".into(),
            },
        )
        .await
        .expect("label");
        assert_eq!(label.days_delayed, 10);
    }

    #[tokio::test]
    async fn test_stream_ordering_and_window() {
        let pool = test_pool().await;
        for (hour, minute) in [(11, 0), (9, 30), (10, 15), (14, 0)] {
            PredictionLedger::append_prediction(&pool, prediction(at(hour, minute), 0, 0.3))
                .await
                .expect("append");
        }

        let rows: Vec<PredictionRecord> =
            PredictionLedger::stream_predictions_since(&pool, at(9, 0), at(12, 0))
                .try_collect()
                .await
                .expect("stream");

        assert_eq!(rows.len(), 3, "14:00 row is outside the window");
        let times: Vec<_> = rows.iter().map(|r| r.created_at).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }

    #[tokio::test]
    async fn test_coverage_stats() {
        let pool = test_pool().await;
        let mut ids = Vec::new();
        for i in 0..10 {
            let input = prediction(at(9, i), 0, 0.4);
            ids.push(input.prediction_id);
            PredictionLedger::append_prediction(&pool, input)
                .await
                .expect("append");
        }
        for id in ids.iter().take(3) {
            PredictionLedger::append_label(
                &pool,
                CreateLabel {
                    prediction_id: *id,
                    true_class: 1,
                    label_observed_at: at(15, 0),
                    label_source: "repayment-feed".into(),
                },
            )
            .await
            .expect("label");
        }

        let stats = PredictionLedger::coverage_stats(&pool, at(8, 0), at(10, 0))
            .await
            .expect("stats");
        assert_eq!(stats.num_predictions, 10);
        assert_eq!(stats.num_labeled, 3);
        assert!((stats.coverage_fraction - 0.3).abs() < 1e-12);
        assert!((stats.coverage_pct() - 30.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_join_labeled_inner_join() {
        let pool = test_pool().await;
        let labeled = prediction(at(9, 0), 1, 0.9);
        let unlabeled = prediction(at(9, 5), 0, 0.1);
        let labeled_id = labeled.prediction_id;
        PredictionLedger::append_prediction(&pool, labeled)
            .await
            .expect("append");
        PredictionLedger::append_prediction(&pool, unlabeled)
            .await
            .expect("append");
        PredictionLedger::append_label(
            &pool,
            CreateLabel {
                prediction_id: labeled_id,
                true_class: 1,
                label_observed_at: at(16, 0),
                label_source: "repayment-feed".into(),
            },
        )
        .await
        .expect("label");

        let joined = PredictionLedger::join_labeled(&pool, at(8, 0), at(10, 0))
            .await
            .expect("join");
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].prediction.prediction_id, labeled_id);
        assert_eq!(joined[0].true_class, 1);
    }
}
