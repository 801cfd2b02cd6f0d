//! Verdict application and registry mutation.
//!
//! The promoter is the only code path that changes registry stages: it
//! executes the atomic promotion under a deadline, handles manual
//! rollback, and serves the production-model lookup used by the serving
//! shell.

use std::fs;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use config::Config;
use database::{CreateDecision, DecisionsRepository, ModelRegistry, PromotionOutcome};
use risk_structs::{CoreError, DecisionAction, ModelStage, TriggerReason};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::signals::{ModelPromoted, Signals};

/// The production model as served to the shell: callers may cache the
/// blob but must re-fetch on TTL or on a promotion signal.
#[derive(Debug, Clone)]
pub struct ProductionModel {
    pub version: i64,
    pub trained_at: DateTime<Utc>,
    pub blob: Vec<u8>,
}

pub struct ModelPromoter {
    pool: SqlitePool,
    config: Arc<Config>,
    signals: Arc<Signals>,
}

impl ModelPromoter {
    #[must_use]
    pub fn new(pool: SqlitePool, config: Arc<Config>, signals: Arc<Signals>) -> Self {
        Self {
            pool,
            config,
            signals,
        }
    }

    /// Promotes a staging shadow under the transaction deadline, then
    /// publishes the promotion signal.
    ///
    /// # Errors
    ///
    /// Propagates [`CoreError::RegistryConflict`] from a lost race; the
    /// caller records the reject decision and does not retry.
    pub async fn promote_shadow(
        &self,
        model_name: &str,
        shadow_version: i64,
        expected_production: Option<i64>,
        decision_id: Uuid,
    ) -> Result<PromotionOutcome, CoreError> {
        let deadline = std::time::Duration::from_secs(self.config.promotion_deadline_s);
        let outcome = tokio::time::timeout(
            deadline,
            ModelRegistry::activate(
                &self.pool,
                model_name,
                shadow_version,
                expected_production,
                Some(decision_id),
                &[ModelStage::Staging],
                Utc::now(),
            ),
        )
        .await
        .map_err(|_| {
            warn!(model_name, shadow_version, "promotion commit deadline exceeded");
            CoreError::TransientStorage("promotion commit deadline exceeded".into())
        })??;

        self.signals.publish_promotion(ModelPromoted {
            model_name: model_name.to_string(),
            version: shadow_version,
        });
        Ok(outcome)
    }

    /// Manual rollback: restores an archived version to production under
    /// the same registry transaction shape and records the decision.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownVersion`] for a version that was never
    /// registered; [`CoreError::IllegalTransition`] when the target is
    /// not archived.
    pub async fn rollback(
        &self,
        model_name: &str,
        version: i64,
    ) -> Result<PromotionOutcome, CoreError> {
        let target = ModelRegistry::get(&self.pool, model_name, version)
            .await?
            .ok_or_else(|| CoreError::UnknownVersion {
                model_name: model_name.to_string(),
                version,
            })?;
        if target.stage != ModelStage::Archived {
            return Err(CoreError::IllegalTransition {
                from: target.stage,
                to: ModelStage::Production,
            });
        }

        let current = ModelRegistry::get_production(&self.pool, model_name).await?;
        let decision_id = Uuid::new_v4();

        let outcome = ModelRegistry::activate(
            &self.pool,
            model_name,
            version,
            current.as_ref().map(|p| p.version),
            Some(decision_id),
            &[ModelStage::Archived],
            Utc::now(),
        )
        .await?;

        DecisionsRepository::insert(
            &self.pool,
            CreateDecision {
                decision_id,
                decided_at: Utc::now(),
                trigger_reason: TriggerReason::Manual,
                action: DecisionAction::Promote,
                failed_gate: None,
                reason: "rollback".into(),
                feature_drift_ratio: None,
                num_drifted_features: None,
                dataset_drift_detected: None,
                drifted_features: None,
                labeled_samples: 0,
                coverage_pct: 0.0,
                shadow_model_version: Some(version),
                production_model_version: current.as_ref().map(|p| p.version),
                f1_improvement_pct: None,
                brier_change: None,
                evaluation_artifact_ref: None,
            },
        )
        .await?;

        info!(model_name, version, "rollback complete");
        self.signals.publish_promotion(ModelPromoted {
            model_name: model_name.to_string(),
            version,
        });
        Ok(outcome)
    }

    /// Reads the unique production row and its model blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry read or the blob read fails.
    pub async fn get_production(
        &self,
        model_name: &str,
    ) -> Result<Option<ProductionModel>, CoreError> {
        let Some(row) = ModelRegistry::get_production(&self.pool, model_name).await? else {
            return Ok(None);
        };

        let blob = fs::read(&row.checkpoint_path)?;
        Ok(Some(ProductionModel {
            version: row.version,
            trained_at: row.trained_at,
            blob,
        }))
    }
}
