//! Repository for the monitoring-metrics table. Appended exclusively by
//! the monitoring engine, one row per attempted tick.

use chrono::{DateTime, Duration, Utc};
use risk_structs::CoreError;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::models::{CreateMonitoringMetric, MonitoringMetricRecord};

/// One point of the drift trend series.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DriftTrendPoint {
    pub run_at: DateTime<Utc>,
    pub feature_drift_ratio: f64,
    pub num_drifted_features: i64,
    pub dataset_drift_detected: bool,
}

pub struct MonitoringMetricsRepository;

impl MonitoringMetricsRepository {
    /// Inserts one monitoring run row and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails; `run_at` is unique so two
    /// rows can never share a tick timestamp.
    pub async fn insert(
        pool: &SqlitePool,
        input: CreateMonitoringMetric,
    ) -> Result<Uuid, CoreError> {
        let run_id = Uuid::new_v4();

        sqlx::query(
            r"
            INSERT INTO monitoring_metrics (
                run_id, run_at, lookback_hours, num_predictions,
                positive_rate, probability_mean, probability_std, entropy,
                dataset_drift_detected, feature_drift_ratio,
                num_drifted_features, num_evaluated_features,
                drift_artifact_ref, drift_artifact_format, reason
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(run_id)
        .bind(input.run_at)
        .bind(input.lookback_hours)
        .bind(input.num_predictions)
        .bind(input.positive_rate)
        .bind(input.probability_mean)
        .bind(input.probability_std)
        .bind(input.entropy)
        .bind(input.dataset_drift_detected)
        .bind(input.feature_drift_ratio)
        .bind(input.num_drifted_features)
        .bind(input.num_evaluated_features)
        .bind(input.drift_artifact_ref)
        .bind(input.drift_artifact_format)
        .bind(input.reason)
        .execute(pool)
        .await?;

        debug!(%run_id, "inserted monitoring metrics");
        Ok(run_id)
    }

    /// Most recent monitoring rows, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_recent(
        pool: &SqlitePool,
        limit: i64,
    ) -> Result<Vec<MonitoringMetricRecord>, CoreError> {
        let rows = sqlx::query_as::<_, MonitoringMetricRecord>(
            r"
            SELECT run_id, run_at, lookback_hours, num_predictions,
                   positive_rate, probability_mean, probability_std, entropy,
                   dataset_drift_detected, feature_drift_ratio,
                   num_drifted_features, num_evaluated_features,
                   drift_artifact_ref, drift_artifact_format, reason
            FROM monitoring_metrics
            ORDER BY run_at DESC
            LIMIT ?
            ",
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// Drift trend over the last `days` days, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_drift_trend(
        pool: &SqlitePool,
        now: DateTime<Utc>,
        days: i64,
    ) -> Result<Vec<DriftTrendPoint>, CoreError> {
        let cutoff = now - Duration::days(days);

        let rows = sqlx::query_as::<_, DriftTrendPoint>(
            r"
            SELECT run_at, feature_drift_ratio, num_drifted_features,
                   dataset_drift_detected
            FROM monitoring_metrics
            WHERE run_at > ?
            ORDER BY run_at ASC
            ",
        )
        .bind(cutoff)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{create_memory_pool, run_migrations};

    async fn test_pool() -> SqlitePool {
        let pool = create_memory_pool().await.expect("pool");
        run_migrations(&pool).await.expect("migrations");
        pool
    }

    fn run_at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
    }

    fn full_row(at: DateTime<Utc>, ratio: f64, drifted: i64) -> CreateMonitoringMetric {
        CreateMonitoringMetric {
            run_at: at,
            lookback_hours: 24,
            num_predictions: 5000,
            positive_rate: Some(0.07),
            probability_mean: Some(0.21),
            probability_std: Some(0.14),
            entropy: Some(0.39),
            dataset_drift_detected: ratio >= 0.30,
            feature_drift_ratio: ratio,
            num_drifted_features: drifted,
            num_evaluated_features: 10,
            drift_artifact_ref: Some("monitoring/artifacts/drift/run.json".into()),
            drift_artifact_format: Some("json".into()),
            reason: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let pool = test_pool().await;
        let at = run_at(1, 9);
        let run_id = MonitoringMetricsRepository::insert(&pool, full_row(at, 0.4, 4))
            .await
            .expect("insert");

        let rows = MonitoringMetricsRepository::get_recent(&pool, 10)
            .await
            .expect("recent");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].run_id, run_id);
        assert_eq!(rows[0].run_at, at);
        assert!(rows[0].dataset_drift_detected);
        assert_eq!(rows[0].drift_artifact_format.as_deref(), Some("json"));
    }

    #[tokio::test]
    async fn test_run_at_unique() {
        let pool = test_pool().await;
        let at = run_at(1, 9);
        MonitoringMetricsRepository::insert(&pool, full_row(at, 0.1, 1))
            .await
            .expect("first insert");
        let err = MonitoringMetricsRepository::insert(&pool, full_row(at, 0.2, 2))
            .await
            .expect_err("same run_at must fail");
        assert!(matches!(err, CoreError::TransientStorage(_)));
    }

    #[tokio::test]
    async fn test_drift_ratio_identity_on_stored_rows() {
        let pool = test_pool().await;
        for (day, drifted) in [(1_u32, 2_i64), (2, 4), (3, 0)] {
            let row = full_row(run_at(day, 9), drifted as f64 / 10.0, drifted);
            MonitoringMetricsRepository::insert(&pool, row)
                .await
                .expect("insert");
        }

        for row in MonitoringMetricsRepository::get_recent(&pool, 10)
            .await
            .expect("recent")
        {
            assert!(row.num_evaluated_features > 0);
            let expected = row.num_drifted_features as f64 / row.num_evaluated_features as f64;
            assert!((row.feature_drift_ratio - expected).abs() < 1e-12);
        }
    }

    #[tokio::test]
    async fn test_drift_trend_window() {
        let pool = test_pool().await;
        for day in 1..=10_u32 {
            MonitoringMetricsRepository::insert(&pool, full_row(run_at(day, 9), 0.1, 1))
                .await
                .expect("insert");
        }

        let now = run_at(10, 12);
        let trend = MonitoringMetricsRepository::get_drift_trend(&pool, now, 7)
            .await
            .expect("trend");
        assert_eq!(trend.len(), 7, "only the last 7 days are in the trend");
        assert!(trend.windows(2).all(|w| w[0].run_at < w[1].run_at));
    }
}
