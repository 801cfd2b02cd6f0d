//! Repository for the retraining-decisions table: the audit trail of
//! every invocation of the decision loop, whether or not training ran.

use chrono::{DateTime, Utc};
use risk_structs::{CoreError, DecisionAction};
use sqlx::types::Json;
use sqlx::{Row, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::models::{CreateDecision, RetrainingDecision};

pub struct DecisionsRepository;

impl DecisionsRepository {
    /// Inserts one decision row and returns its id. Rows are never
    /// mutated afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert(pool: &SqlitePool, input: CreateDecision) -> Result<Uuid, CoreError> {
        let decision_id = input.decision_id;

        sqlx::query(
            r"
            INSERT INTO retraining_decisions (
                decision_id, decided_at, trigger_reason, action,
                failed_gate, reason,
                feature_drift_ratio, num_drifted_features,
                dataset_drift_detected, drifted_features,
                labeled_samples, coverage_pct,
                shadow_model_version, production_model_version,
                f1_improvement_pct, brier_change, evaluation_artifact_ref
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(decision_id)
        .bind(input.decided_at)
        .bind(input.trigger_reason)
        .bind(input.action)
        .bind(input.failed_gate)
        .bind(&input.reason)
        .bind(input.feature_drift_ratio)
        .bind(input.num_drifted_features)
        .bind(input.dataset_drift_detected)
        .bind(input.drifted_features.map(Json))
        .bind(input.labeled_samples)
        .bind(input.coverage_pct)
        .bind(input.shadow_model_version)
        .bind(input.production_model_version)
        .bind(input.f1_improvement_pct)
        .bind(input.brier_change)
        .bind(input.evaluation_artifact_ref)
        .execute(pool)
        .await?;

        info!(
            %decision_id,
            action = %input.action,
            reason = %input.reason,
            "recorded retraining decision"
        );
        Ok(decision_id)
    }

    /// Decision history, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_history(
        pool: &SqlitePool,
        limit: i64,
    ) -> Result<Vec<RetrainingDecision>, CoreError> {
        let rows = sqlx::query_as::<_, RetrainingDecision>(
            r"
            SELECT decision_id, decided_at, trigger_reason, action,
                   failed_gate, reason,
                   feature_drift_ratio, num_drifted_features,
                   dataset_drift_detected, drifted_features,
                   labeled_samples, coverage_pct,
                   shadow_model_version, production_model_version,
                   f1_improvement_pct, brier_change, evaluation_artifact_ref
            FROM retraining_decisions
            ORDER BY decided_at DESC
            LIMIT ?
            ",
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// Count of decisions grouped by action.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_by_action(
        pool: &SqlitePool,
    ) -> Result<Vec<(DecisionAction, i64)>, CoreError> {
        let rows = sqlx::query(
            r"
            SELECT action, COUNT(*) AS count
            FROM retraining_decisions
            GROUP BY action
            ORDER BY action
            ",
        )
        .fetch_all(pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let action: DecisionAction = row.try_get("action")?;
                let count: i64 = row.try_get("count")?;
                Ok((action, count))
            })
            .collect()
    }

    /// Timestamp of the most recent `promote` decision, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn last_promotion(
        pool: &SqlitePool,
    ) -> Result<Option<DateTime<Utc>>, CoreError> {
        let at: Option<DateTime<Utc>> = sqlx::query_scalar(
            r"
            SELECT MAX(decided_at) FROM retraining_decisions
            WHERE action = 'promote'
            ",
        )
        .fetch_one(pool)
        .await?;

        Ok(at)
    }
}
