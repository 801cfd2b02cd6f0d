//! Model registry: governance rows for every trained version and the
//! single atomic promotion transaction.
//!
//! The registry is the only place the `stage` column is mutated, and the
//! promotion commit is the system's linearization point. The
//! one-production invariant is enforced by a partial unique index; the
//! transaction additionally checks the production version it observed
//! against the version the caller's evidence was computed for, so a lost
//! race surfaces as a conflict instead of silently archiving the winner.

use chrono::{DateTime, Duration, Utc};
use risk_structs::error::is_unique_violation;
use risk_structs::{CoreError, ModelStage};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{CreateModelVersion, ModelVersion};

/// Result of an atomic promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromotionOutcome {
    pub promoted_version: i64,
    pub archived_version: Option<i64>,
}

pub struct ModelRegistry;

impl ModelRegistry {
    /// Next version number for a model name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn next_version(pool: &SqlitePool, model_name: &str) -> Result<i64, CoreError> {
        let max_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM model_versions WHERE model_name = ?")
                .bind(model_name)
                .fetch_one(pool)
                .await?;

        Ok(max_version.unwrap_or(0) + 1)
    }

    /// Registers a freshly trained version in `staging`.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails (duplicate version included).
    pub async fn insert_staging(
        pool: &SqlitePool,
        input: CreateModelVersion,
    ) -> Result<ModelVersion, CoreError> {
        sqlx::query(
            r"
            INSERT INTO model_versions (
                model_name, version, stage, trained_at,
                training_run_reference, checkpoint_path, trigger_reason,
                f1_score, brier_score, num_training_samples,
                feature_drift_ratio_at_training
            ) VALUES (?, ?, 'staging', ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&input.model_name)
        .bind(input.version)
        .bind(input.trained_at)
        .bind(&input.training_run_reference)
        .bind(&input.checkpoint_path)
        .bind(input.trigger_reason)
        .bind(input.f1_score)
        .bind(input.brier_score)
        .bind(input.num_training_samples)
        .bind(input.feature_drift_ratio_at_training)
        .execute(pool)
        .await?;

        info!(
            model_name = %input.model_name,
            version = input.version,
            "registered shadow version in staging"
        );

        Self::get(pool, &input.model_name, input.version)
            .await?
            .ok_or_else(|| {
                CoreError::InvariantViolation("inserted staging row not readable".into())
            })
    }

    /// Fetches one version row.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get(
        pool: &SqlitePool,
        model_name: &str,
        version: i64,
    ) -> Result<Option<ModelVersion>, CoreError> {
        let row = sqlx::query_as::<_, ModelVersion>(
            r"
            SELECT model_name, version, stage, trained_at, promoted_at,
                   archived_at, training_run_reference, checkpoint_path,
                   trigger_reason, f1_score, brier_score,
                   num_training_samples, feature_drift_ratio_at_training,
                   decision_id
            FROM model_versions
            WHERE model_name = ? AND version = ?
            ",
        )
        .bind(model_name)
        .bind(version)
        .fetch_optional(pool)
        .await?;

        Ok(row)
    }

    /// The unique production row for a model name, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_production(
        pool: &SqlitePool,
        model_name: &str,
    ) -> Result<Option<ModelVersion>, CoreError> {
        let row = sqlx::query_as::<_, ModelVersion>(
            r"
            SELECT model_name, version, stage, trained_at, promoted_at,
                   archived_at, training_run_reference, checkpoint_path,
                   trigger_reason, f1_score, brier_score,
                   num_training_samples, feature_drift_ratio_at_training,
                   decision_id
            FROM model_versions
            WHERE model_name = ? AND stage = 'production'
            ",
        )
        .bind(model_name)
        .fetch_optional(pool)
        .await?;

        Ok(row)
    }

    /// Most recent `promoted_at` across all versions of a model name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn last_promoted_at(
        pool: &SqlitePool,
        model_name: &str,
    ) -> Result<Option<DateTime<Utc>>, CoreError> {
        let at: Option<DateTime<Utc>> = sqlx::query_scalar(
            r"
            SELECT MAX(promoted_at) FROM model_versions
            WHERE model_name = ? AND promoted_at IS NOT NULL
            ",
        )
        .bind(model_name)
        .fetch_one(pool)
        .await?;

        Ok(at)
    }

    /// Atomically archives the current production row (if any) and
    /// activates `version` as production.
    ///
    /// `expected_production` is the version the caller's evidence was
    /// computed against; if another orchestration promoted in between,
    /// the transaction observes a different production version and fails
    /// with [`CoreError::RegistryConflict`]. `allowed_from` restricts the
    /// stage the activated row may currently be in (`staging` for the
    /// automatic path, `archived` for manual rollback).
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownVersion`] if the row does not exist,
    /// [`CoreError::IllegalTransition`] for a row outside `allowed_from`,
    /// [`CoreError::RegistryConflict`] on a lost race,
    /// [`CoreError::InvariantViolation`] if the commit would corrupt the
    /// one-production invariant.
    pub async fn activate(
        pool: &SqlitePool,
        model_name: &str,
        version: i64,
        expected_production: Option<i64>,
        decision_id: Option<Uuid>,
        allowed_from: &[ModelStage],
        now: DateTime<Utc>,
    ) -> Result<PromotionOutcome, CoreError> {
        let mut tx = pool.begin().await?;

        let current: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM model_versions WHERE model_name = ? AND stage = 'production'",
        )
        .bind(model_name)
        .fetch_optional(&mut *tx)
        .await?;

        if current != expected_production {
            warn!(
                model_name,
                observed = ?current,
                expected = ?expected_production,
                "promotion race lost"
            );
            return Err(CoreError::RegistryConflict(format!(
                "production is v{current:?}, evidence was computed against v{expected_production:?}"
            )));
        }

        let stage: Option<ModelStage> = sqlx::query_scalar(
            "SELECT stage FROM model_versions WHERE model_name = ? AND version = ?",
        )
        .bind(model_name)
        .bind(version)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(stage) = stage else {
            return Err(CoreError::UnknownVersion {
                model_name: model_name.to_string(),
                version,
            });
        };

        if !allowed_from.contains(&stage) || !stage.can_transition_to(ModelStage::Production) {
            return Err(CoreError::IllegalTransition {
                from: stage,
                to: ModelStage::Production,
            });
        }

        if let Some(old) = current {
            sqlx::query(
                r"
                UPDATE model_versions
                SET stage = 'archived', archived_at = ?
                WHERE model_name = ? AND version = ? AND stage = 'production'
                ",
            )
            .bind(now)
            .bind(model_name)
            .bind(old)
            .execute(&mut *tx)
            .await?;
        }

        let updated = sqlx::query(
            r"
            UPDATE model_versions
            SET stage = 'production', promoted_at = ?, decision_id = ?
            WHERE model_name = ? AND version = ?
            ",
        )
        .bind(now)
        .bind(decision_id)
        .bind(model_name)
        .bind(version)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                CoreError::RegistryConflict("concurrent promotion won the commit".into())
            } else {
                err.into()
            }
        })?;

        if updated.rows_affected() != 1 {
            return Err(CoreError::InvariantViolation(format!(
                "promotion updated {} rows for {model_name} v{version}",
                updated.rows_affected()
            )));
        }

        tx.commit().await.map_err(|err| {
            if is_unique_violation(&err) {
                CoreError::RegistryConflict("concurrent promotion won the commit".into())
            } else {
                CoreError::from(err)
            }
        })?;

        info!(model_name, version, archived = ?current, "promotion committed");
        Ok(PromotionOutcome {
            promoted_version: version,
            archived_version: current,
        })
    }

    /// Archives one version (reject path, or production displaced
    /// outside the promotion transaction).
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownVersion`] if the row does not exist,
    /// [`CoreError::IllegalTransition`] if archiving is not legal from
    /// the row's current stage.
    pub async fn archive(
        pool: &SqlitePool,
        model_name: &str,
        version: i64,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let stage: Option<ModelStage> = sqlx::query_scalar(
            "SELECT stage FROM model_versions WHERE model_name = ? AND version = ?",
        )
        .bind(model_name)
        .bind(version)
        .fetch_optional(pool)
        .await?;

        let Some(stage) = stage else {
            return Err(CoreError::UnknownVersion {
                model_name: model_name.to_string(),
                version,
            });
        };

        if !stage.can_transition_to(ModelStage::Archived) {
            return Err(CoreError::IllegalTransition {
                from: stage,
                to: ModelStage::Archived,
            });
        }

        sqlx::query(
            r"
            UPDATE model_versions
            SET stage = 'archived', archived_at = ?
            WHERE model_name = ? AND version = ?
            ",
        )
        .bind(now)
        .bind(model_name)
        .bind(version)
        .execute(pool)
        .await?;

        info!(model_name, version, "version archived");
        Ok(())
    }

    /// Archives staging rows older than the TTL. Returns how many rows
    /// were archived.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn archive_stale_staging(
        pool: &SqlitePool,
        model_name: &str,
        now: DateTime<Utc>,
        staging_ttl: Duration,
    ) -> Result<u64, CoreError> {
        let cutoff = now - staging_ttl;

        let result = sqlx::query(
            r"
            UPDATE model_versions
            SET stage = 'archived', archived_at = ?
            WHERE model_name = ? AND stage = 'staging' AND trained_at < ?
            ",
        )
        .bind(now)
        .bind(model_name)
        .bind(cutoff)
        .execute(pool)
        .await?;

        let archived = result.rows_affected();
        if archived > 0 {
            info!(model_name, archived, "stale staging versions archived");
        }
        Ok(archived)
    }

    /// All versions of a model name, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn timeline(
        pool: &SqlitePool,
        model_name: &str,
    ) -> Result<Vec<ModelVersion>, CoreError> {
        let rows = sqlx::query_as::<_, ModelVersion>(
            r"
            SELECT model_name, version, stage, trained_at, promoted_at,
                   archived_at, training_run_reference, checkpoint_path,
                   trigger_reason, f1_score, brier_score,
                   num_training_samples, feature_drift_ratio_at_training,
                   decision_id
            FROM model_versions
            WHERE model_name = ?
            ORDER BY version DESC
            ",
        )
        .bind(model_name)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// Count of production rows for a model name. The partial unique
    /// index keeps this at zero or one; the count is used by tests and
    /// invariant checks.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn production_count(pool: &SqlitePool, model_name: &str) -> Result<i64, CoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM model_versions WHERE model_name = ? AND stage = 'production'",
        )
        .bind(model_name)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }
}
