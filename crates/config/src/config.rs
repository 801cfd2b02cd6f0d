use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;

/// System configuration, loaded from environment variables with
/// system-level defaults for every tunable.
///
/// Unlike most knobs, `SENTINEL_DATABASE_URL` has a default pointing at a
/// local SQLite file so a fresh checkout works without any setup.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL.
    pub database_url: String,
    /// Model family governed by this deployment.
    pub model_name: String,
    /// Directory holding the frozen reference baseline.
    pub baseline_dir: PathBuf,
    /// Root directory for drift and evaluation artifacts.
    pub artifact_dir: PathBuf,
    /// Directory holding model blobs.
    pub model_dir: PathBuf,

    /// Seconds between monitoring ticks.
    pub monitoring_interval_s: u64,
    /// Monitoring lookback window in hours.
    pub monitoring_lookback_h: i64,
    /// Minimum predictions in the window before drift tests run.
    pub min_samples_for_monitoring: u64,
    /// Significance threshold for per-feature drift tests.
    pub drift_p_threshold: f64,
    /// Minimum effect size for a drift verdict.
    pub drift_effect_size_floor: f64,
    /// Fraction of drifted features above which dataset drift is declared.
    pub dataset_drift_threshold: f64,

    /// Minimum labeled replay rows for a promotion decision.
    pub min_samples_for_decision: u64,
    /// Minimum label coverage percentage for a promotion decision.
    pub min_coverage_pct: f64,
    /// Minimum days between two promotions of the same model name.
    pub promotion_cooldown_days: i64,
    /// Minimum relative F1 improvement (percent) to promote.
    pub min_f1_improvement_pct: f64,
    /// Maximum tolerated Brier score increase.
    pub max_brier_degradation: f64,
    /// Maximum tolerated per-segment relative F1 drop (percent).
    pub min_segment_f1_drop: f64,
    /// Minimum rows for a segment to be evaluable.
    pub segment_min: u64,

    /// Labeling window for training, in hours.
    pub training_window_h: i64,
    /// Fraction of the labeled window reserved as the replay set.
    pub test_fraction: f64,
    /// Deadline for one training run, in seconds.
    pub training_timeout_s: u64,
    /// Seed handed to the training function.
    pub training_seed: u64,
    /// Age after which a staging version is archived by the janitor.
    pub staging_ttl_s: i64,
    /// Seconds between wall-clock retraining triggers.
    pub retraining_interval_s: u64,
    /// Deadline for the atomic promotion transaction, in seconds.
    pub promotion_deadline_s: u64,

    /// Feature names fairness segments are derived from.
    pub segment_features: Vec<String>,
    /// Percentile buckets per segment feature.
    pub segment_buckets: usize,
    /// Decisions shown by the status command.
    pub status_history_limit: i64,
}

impl Config {
    /// System-level defaults, before any environment overrides.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            database_url: "sqlite://sentinel.db".into(),
            model_name: "credit-risk-model".into(),
            baseline_dir: PathBuf::from("monitoring/reference"),
            artifact_dir: PathBuf::from("monitoring/artifacts"),
            model_dir: PathBuf::from("models"),
            monitoring_interval_s: 300,
            monitoring_lookback_h: 24,
            min_samples_for_monitoring: 200,
            drift_p_threshold: 0.05,
            drift_effect_size_floor: 0.1,
            dataset_drift_threshold: 0.30,
            min_samples_for_decision: 200,
            min_coverage_pct: 30.0,
            promotion_cooldown_days: 7,
            min_f1_improvement_pct: 2.0,
            max_brier_degradation: 0.01,
            min_segment_f1_drop: 1.0,
            segment_min: 50,
            training_window_h: 168,
            test_fraction: 0.2,
            training_timeout_s: 3600,
            training_seed: 42,
            staging_ttl_s: 604_800,
            retraining_interval_s: 86_400,
            promotion_deadline_s: 30,
            segment_features: vec!["age".into(), "MonthlyIncome".into()],
            segment_buckets: 3,
            status_history_limit: 10,
        }
    }

    /// Loads configuration from the environment (and `.env` if present).
    ///
    /// # Errors
    ///
    /// Returns an error if a set variable fails to parse.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::with_defaults();

        Ok(Self {
            database_url: env_string("SENTINEL_DATABASE_URL", defaults.database_url),
            model_name: env_string("SENTINEL_MODEL_NAME", defaults.model_name),
            baseline_dir: env_path("SENTINEL_BASELINE_DIR", defaults.baseline_dir),
            artifact_dir: env_path("SENTINEL_ARTIFACT_DIR", defaults.artifact_dir),
            model_dir: env_path("SENTINEL_MODEL_DIR", defaults.model_dir),
            monitoring_interval_s: env_parse(
                "SENTINEL_MONITORING_INTERVAL_S",
                defaults.monitoring_interval_s,
            )?,
            monitoring_lookback_h: env_parse(
                "SENTINEL_MONITORING_LOOKBACK_H",
                defaults.monitoring_lookback_h,
            )?,
            min_samples_for_monitoring: env_parse(
                "SENTINEL_MIN_SAMPLES_FOR_MONITORING",
                defaults.min_samples_for_monitoring,
            )?,
            drift_p_threshold: env_parse("SENTINEL_DRIFT_P_THRESHOLD", defaults.drift_p_threshold)?,
            drift_effect_size_floor: env_parse(
                "SENTINEL_DRIFT_EFFECT_SIZE_FLOOR",
                defaults.drift_effect_size_floor,
            )?,
            dataset_drift_threshold: env_parse(
                "SENTINEL_DATASET_DRIFT_THRESHOLD",
                defaults.dataset_drift_threshold,
            )?,
            min_samples_for_decision: env_parse(
                "SENTINEL_MIN_SAMPLES_FOR_DECISION",
                defaults.min_samples_for_decision,
            )?,
            min_coverage_pct: env_parse("SENTINEL_MIN_COVERAGE_PCT", defaults.min_coverage_pct)?,
            promotion_cooldown_days: env_parse(
                "SENTINEL_PROMOTION_COOLDOWN_DAYS",
                defaults.promotion_cooldown_days,
            )?,
            min_f1_improvement_pct: env_parse(
                "SENTINEL_MIN_F1_IMPROVEMENT_PCT",
                defaults.min_f1_improvement_pct,
            )?,
            max_brier_degradation: env_parse(
                "SENTINEL_MAX_BRIER_DEGRADATION",
                defaults.max_brier_degradation,
            )?,
            min_segment_f1_drop: env_parse(
                "SENTINEL_MIN_SEGMENT_F1_DROP",
                defaults.min_segment_f1_drop,
            )?,
            segment_min: env_parse("SENTINEL_SEGMENT_MIN", defaults.segment_min)?,
            training_window_h: env_parse("SENTINEL_TRAINING_WINDOW_H", defaults.training_window_h)?,
            test_fraction: env_parse("SENTINEL_TEST_FRACTION", defaults.test_fraction)?,
            training_timeout_s: env_parse(
                "SENTINEL_TRAINING_TIMEOUT_S",
                defaults.training_timeout_s,
            )?,
            training_seed: env_parse("SENTINEL_TRAINING_SEED", defaults.training_seed)?,
            staging_ttl_s: env_parse("SENTINEL_STAGING_TTL_S", defaults.staging_ttl_s)?,
            retraining_interval_s: env_parse(
                "SENTINEL_RETRAINING_INTERVAL_S",
                defaults.retraining_interval_s,
            )?,
            promotion_deadline_s: env_parse(
                "SENTINEL_PROMOTION_DEADLINE_S",
                defaults.promotion_deadline_s,
            )?,
            segment_features: env_list("SENTINEL_SEGMENT_FEATURES", defaults.segment_features),
            segment_buckets: env_parse("SENTINEL_SEGMENT_BUCKETS", defaults.segment_buckets)?,
            status_history_limit: env_parse(
                "SENTINEL_STATUS_HISTORY_LIMIT",
                defaults.status_history_limit,
            )?,
        })
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map_or(default, PathBuf::from)
}

fn env_list(key: &str, default: Vec<String>) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default,
    }
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_system_defaults() {
        let config = Config::with_defaults();
        assert_eq!(config.monitoring_interval_s, 300);
        assert_eq!(config.monitoring_lookback_h, 24);
        assert_eq!(config.min_samples_for_monitoring, 200);
        assert!((config.drift_p_threshold - 0.05).abs() < f64::EPSILON);
        assert!((config.dataset_drift_threshold - 0.30).abs() < f64::EPSILON);
        assert_eq!(config.promotion_cooldown_days, 7);
        assert!((config.min_f1_improvement_pct - 2.0).abs() < f64::EPSILON);
        assert!((config.max_brier_degradation - 0.01).abs() < f64::EPSILON);
        assert_eq!(config.segment_min, 50);
        assert_eq!(config.training_window_h, 168);
        assert!((config.test_fraction - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.staging_ttl_s, 604_800);
    }

    #[test]
    fn test_segment_surface_defaults() {
        let config = Config::with_defaults();
        assert_eq!(config.segment_features, vec!["age", "MonthlyIncome"]);
        assert_eq!(config.segment_buckets, 3);
    }
}
