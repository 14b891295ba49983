use anyhow::{Context, Result};
use energy_ingest::{config::AppConfig, observability, Orchestrator, RunMode, RunState};
use std::{env, sync::Arc};
use time::OffsetDateTime;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Point ENERGY_INGEST_CONFIG at a backfill-specific file if needed.
    let cfg = Arc::new(AppConfig::load()?);

    let days = match env::args().nth(1) {
        Some(arg) => arg
            .parse::<u32>()
            .with_context(|| format!("usage: backfill [days]; '{arg}' is not a day count"))?,
        None => cfg.pipeline.historical_days,
    };

    let orchestrator = Orchestrator::from_config(cfg)?;
    let summary = orchestrator
        .run(RunMode::Historical { days }, OffsetDateTime::now_utc())
        .await;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    if summary.state == RunState::Partial {
        tracing::warn!(run_id = %summary.run_id, "backfill finished partial; see quality report");
    }
    Ok(())
}
