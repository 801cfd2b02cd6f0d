//! Status command: current production version and recent decisions.

use config::Config;
use database::{DecisionsRepository, ModelRegistry};
use risk_structs::CoreError;
use sqlx::SqlitePool;

/// Runs the status command.
///
/// # Errors
///
/// Returns an error if the registry or decision queries fail.
pub async fn run(pool: &SqlitePool, config: &Config) -> Result<(), CoreError> {
    match ModelRegistry::get_production(pool, &config.model_name).await? {
        Some(production) => {
            println!(
                "Production: {} v{} (trained {}, promoted {})",
                production.model_name,
                production.version,
                production.trained_at.format("%Y-%m-%d %H:%M:%S"),
                production
                    .promoted_at
                    .map_or_else(|| "-".into(), |at| at.format("%Y-%m-%d %H:%M:%S").to_string()),
            );
            if let (Some(f1), Some(brier)) = (production.f1_score, production.brier_score) {
                println!("  f1 {f1:.4}, brier {brier:.4}");
            }
        }
        None => println!("Production: none ({})", config.model_name),
    }

    let history = DecisionsRepository::get_history(pool, config.status_history_limit).await?;
    println!("\nLast {} decisions:", history.len());
    for decision in &history {
        let gate = decision
            .failed_gate
            .map_or_else(String::new, |g| format!(" [{g}]"));
        println!(
            "  {} {:>8} ({}){gate} {}",
            decision.decided_at.format("%Y-%m-%d %H:%M:%S"),
            decision.action.to_string(),
            decision.trigger_reason,
            decision.reason,
        );
    }

    let counts = DecisionsRepository::count_by_action(pool).await?;
    if !counts.is_empty() {
        let summary: Vec<String> = counts
            .iter()
            .map(|(action, count)| format!("{action}={count}"))
            .collect();
        println!("\nTotals: {}", summary.join(", "));
    }

    Ok(())
}
