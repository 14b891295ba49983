use anyhow::{bail, Result};
use energy_ingest::{config::AppConfig, metrics_server, observability, Orchestrator, RunMode};
use std::{env, sync::Arc, time::Duration};
use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let once = match env::args().nth(1).as_deref() {
        None => false,
        Some("--once") => true,
        Some(other) => bail!("unknown argument {other}; usage: energy-ingest [--once]"),
    };

    let cfg = Arc::new(AppConfig::load()?);

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let orchestrator = Orchestrator::from_config(cfg.clone())?;

    if once {
        let summary = orchestrator.run(RunMode::Daily, OffsetDateTime::now_utc()).await;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    // First tick fires immediately.
    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.schedule.interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(interval_secs = cfg.schedule.interval_secs, "daily schedule started");

    loop {
        ticker.tick().await;
        let summary = orchestrator.run(RunMode::Daily, OffsetDateTime::now_utc()).await;
        tracing::info!(
            run_id = %summary.run_id,
            state = summary.state.as_str(),
            merged = summary.merged_rows,
            "scheduled run complete"
        );
    }
}
