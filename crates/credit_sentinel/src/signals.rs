//! In-process event fan-out.
//!
//! Delivery is at-least-once from the consumer's point of view (a lagged
//! receiver may observe a replayed alert after reconnecting), so
//! consumers deduplicate on `run_id`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Published when a monitoring run declares dataset drift.
#[derive(Debug, Clone, Serialize)]
pub struct DriftAlert {
    pub run_id: Uuid,
    pub run_at: DateTime<Utc>,
    pub feature_drift_ratio: f64,
    pub drifted_features: Vec<String>,
}

/// Published after a successful promotion commit so model caches can
/// re-fetch before their TTL.
#[derive(Debug, Clone, Serialize)]
pub struct ModelPromoted {
    pub model_name: String,
    pub version: i64,
}

/// Broadcast channels shared by the workers.
pub struct Signals {
    drift: broadcast::Sender<DriftAlert>,
    promoted: broadcast::Sender<ModelPromoted>,
}

impl Signals {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (drift, _) = broadcast::channel(capacity);
        let (promoted, _) = broadcast::channel(capacity);
        Self { drift, promoted }
    }

    pub fn publish_drift(&self, alert: DriftAlert) {
        debug!(run_id = %alert.run_id, ratio = alert.feature_drift_ratio, "publishing drift alert");
        // No receiver is fine; the alert is also durable in the metrics row.
        let _ = self.drift.send(alert);
    }

    pub fn publish_promotion(&self, event: ModelPromoted) {
        debug!(model_name = %event.model_name, version = event.version, "publishing promotion");
        let _ = self.promoted.send(event);
    }

    #[must_use]
    pub fn subscribe_drift(&self) -> broadcast::Receiver<DriftAlert> {
        self.drift.subscribe()
    }

    #[must_use]
    pub fn subscribe_promotions(&self) -> broadcast::Receiver<ModelPromoted> {
        self.promoted.subscribe()
    }
}

impl Default for Signals {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drift_alert_round_trip() {
        let signals = Signals::new(8);
        let mut rx = signals.subscribe_drift();

        signals.publish_drift(DriftAlert {
            run_id: Uuid::new_v4(),
            run_at: Utc::now(),
            feature_drift_ratio: 0.4,
            drifted_features: vec!["MonthlyIncome".into()],
        });

        let alert = rx.recv().await.expect("alert delivered");
        assert!((alert.feature_drift_ratio - 0.4).abs() < 1e-12);
        assert_eq!(alert.drifted_features, vec!["MonthlyIncome"]);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let signals = Signals::new(8);
        signals.publish_promotion(ModelPromoted {
            model_name: "credit-risk-model".into(),
            version: 3,
        });
    }
}
