//! One pipeline run: fetch, validate, merge, report.

use std::{fmt, path::PathBuf, sync::Arc};

use energy_domain::{DateWindow, EnergyReading, EnergyRecord, MergedRecord, WeatherRecord};
use serde::Serialize;
use time::{Date, OffsetDateTime, UtcOffset};
use tracing::Instrument;

use crate::{
    config::AppConfig,
    merge::{self, MergeOptions},
    retry::{Pacer, RetryOutcome, RetryPolicy},
    sinks::{self, ArtifactStore, SinkError},
    sources::{self, EiaEnergySource, NoaaWeatherSource, RetryingSource, Source},
    transform,
    validate::{self, Check, FetchFailure, QualityReport, QualityThresholds},
};

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("failed to persist artifact: {0}")]
    Persist(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<SinkError> for PipelineError {
    fn from(e: SinkError) -> Self {
        Self::Persist(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Backward window of `days` ending today.
    Historical { days: u32 },
    /// Today only; merged rows are also folded into the rolling dataset.
    Daily,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Historical { .. } => "historical",
            Self::Daily => "daily",
        }
    }

    pub fn window(&self, today: Date) -> DateWindow {
        match self {
            Self::Historical { days } => DateWindow::ending(today, *days),
            Self::Daily => DateWindow::single(today),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Fetching,
    Validating,
    Merging,
    Reporting,
    Done,
    Partial,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetching => "FETCHING",
            Self::Validating => "VALIDATING",
            Self::Merging => "MERGING",
            Self::Reporting => "REPORTING",
            Self::Done => "DONE",
            Self::Partial => "PARTIAL",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub mode: String,
    pub state: RunState,
    pub weather_records: usize,
    pub energy_records: usize,
    pub merged_rows: usize,
    pub failed_fetches: usize,
    pub artifacts: Vec<PathBuf>,
}

/// Tracks the stage a run is in and whether any stage came up short.
struct Progress {
    state: RunState,
    partial: bool,
}

impl Progress {
    fn enter(&mut self, next: RunState) {
        self.state = next;
        tracing::debug!(state = next.as_str(), "entering stage");
    }

    fn short(&mut self, reason: &str) {
        if !self.partial {
            tracing::warn!(stage = self.state.as_str(), reason, "run will finish partial");
        }
        self.partial = true;
    }

    fn finish(self) -> RunState {
        if self.partial {
            RunState::Partial
        } else {
            RunState::Done
        }
    }
}

pub struct Orchestrator<W, E> {
    cfg: Arc<AppConfig>,
    weather: RetryingSource<W>,
    energy: RetryingSource<E>,
    store: ArtifactStore,
    thresholds: QualityThresholds,
    merge_opts: MergeOptions,
}

impl Orchestrator<NoaaWeatherSource, EiaEnergySource> {
    /// Wires the NOAA and EIA clients from configuration.
    pub fn from_config(cfg: Arc<AppConfig>) -> Result<Self, PipelineError> {
        let client = sources::http_client(&cfg.http).map_err(|e| PipelineError::Config(e.to_string()))?;
        let weather = NoaaWeatherSource::new(client.clone(), cfg.weather.clone());
        let energy = EiaEnergySource::new(client, cfg.energy.clone());
        Self::new(cfg, weather, energy)
    }
}

impl<W, E> Orchestrator<W, E>
where
    W: Source<WeatherRecord>,
    E: Source<EnergyReading>,
{
    pub fn new(cfg: Arc<AppConfig>, weather: W, energy: E) -> Result<Self, PipelineError> {
        let merge_opts = MergeOptions::from_config(&cfg.quality).map_err(|e| PipelineError::Config(e.to_string()))?;
        let policy = RetryPolicy::from(&cfg.retry);
        let pacer = Arc::new(Pacer::new(cfg.http.pacing()));
        tracing::debug!(
            max_attempts = policy.max_attempts,
            max_wait = ?policy.max_total_wait(),
            pacing = ?pacer.spacing(),
            "retry budget per fetch"
        );

        Ok(Self {
            weather: RetryingSource::new(weather, policy.clone(), pacer.clone()),
            energy: RetryingSource::new(energy, policy, pacer),
            store: ArtifactStore::new(&cfg.output_dir),
            thresholds: QualityThresholds::from(&cfg.quality),
            merge_opts,
            cfg,
        })
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Runs every stage once. Never fails: source, merge and persistence
    /// problems end the run as [`RunState::Partial`] with whatever artifacts
    /// could still be written.
    pub async fn run(&self, mode: RunMode, now: OffsetDateTime) -> RunSummary {
        let run_id = sinks::run_id(now);
        let span = tracing::info_span!("run", run_id = %run_id, mode = mode.as_str());
        let summary = self.run_inner(mode, now, run_id).instrument(span).await;

        metrics::counter!(
            "pipeline_runs_total",
            "mode" => mode.as_str(),
            "state" => summary.state.as_str()
        )
        .increment(1);
        summary
    }

    async fn run_inner(&self, mode: RunMode, now: OffsetDateTime, run_id: String) -> RunSummary {
        let today = now.to_offset(UtcOffset::UTC).date();
        let window = mode.window(today);
        let mut progress = Progress {
            state: RunState::Fetching,
            partial: false,
        };
        let mut artifacts = Vec::new();
        let mut failures = Vec::new();

        tracing::info!(
            start = %window.start,
            end = %window.end,
            cities = self.cfg.cities.len(),
            "starting run"
        );

        // FETCHING
        let mut raw_weather: Vec<WeatherRecord> = Vec::new();
        let mut raw_energy: Vec<EnergyReading> = Vec::new();
        for city in &self.cfg.cities {
            let outcome = self.weather.fetch::<WeatherRecord>(city, &window).await;
            collect_outcome(outcome, &city.name, "weather", &mut raw_weather, &mut failures);

            let outcome = self.energy.fetch::<EnergyReading>(city, &window).await;
            collect_outcome(outcome, &city.name, "energy", &mut raw_energy, &mut failures);
        }
        self.persist(&mut progress, &mut artifacts, |s| s.write_raw("weather", &run_id, &raw_weather));
        self.persist(&mut progress, &mut artifacts, |s| s.write_raw("energy", &run_id, &raw_energy));
        if raw_weather.is_empty() || raw_energy.is_empty() {
            progress.short("a source returned no records for any city");
        }

        // VALIDATING
        progress.enter(RunState::Validating);
        let weather = transform::dedup_weather(raw_weather);
        let energy: Vec<EnergyRecord> = transform::aggregate_daily(&raw_energy);
        let weather_section = validate::validate(&weather, "weather", &self.thresholds, now);
        let energy_section = validate::validate(&energy, "energy", &self.thresholds, now);

        // MERGING
        progress.enter(RunState::Merging);
        let (rows, merge_check): (Vec<MergedRecord>, _) =
            match merge::merge(&weather, &energy, &self.cfg.cities, &self.merge_opts) {
                Ok(out) => {
                    if out.rows.is_empty() {
                        progress.short("every joined row was missing a required field");
                    }
                    (out.rows, Check::Ok(out.summary))
                }
                Err(e) => {
                    tracing::error!(stage = "MERGING", error = %e, "merge failed");
                    progress.short("merge produced no rows");
                    (Vec::new(), Check::failed(e.to_string()))
                }
            };

        // REPORTING
        progress.enter(RunState::Reporting);
        let report = QualityReport {
            run_id: run_id.clone(),
            mode: mode.as_str().to_string(),
            window,
            weather: weather_section,
            energy: energy_section,
            merge: merge_check,
            failed_fetches: failures,
        };
        let failed_fetches = report.failed_fetches.len();
        self.persist(&mut progress, &mut artifacts, |s| s.write_report(&run_id, &report));
        if !rows.is_empty() {
            self.persist(&mut progress, &mut artifacts, |s| s.write_merged(&run_id, &rows));
            if mode == RunMode::Daily {
                let rolling = self.store.root().join(sinks::ROLLING_FILE);
                self.persist(&mut progress, &mut artifacts, |s| s.upsert_rolling(&rows).map(|_| rolling));
            }
        }

        let state = progress.finish();
        let summary = RunSummary {
            run_id,
            mode: mode.as_str().to_string(),
            state,
            weather_records: weather.len(),
            energy_records: energy.len(),
            merged_rows: rows.len(),
            failed_fetches,
            artifacts,
        };
        tracing::info!(
            state = state.as_str(),
            weather = summary.weather_records,
            energy = summary.energy_records,
            merged = summary.merged_rows,
            failed_fetches,
            findings = report.has_findings(),
            "run finished"
        );
        summary
    }

    fn persist<F>(&self, progress: &mut Progress, artifacts: &mut Vec<PathBuf>, write: F)
    where
        F: FnOnce(&ArtifactStore) -> Result<PathBuf, SinkError>,
    {
        match write(&self.store).map_err(PipelineError::from) {
            Ok(path) => artifacts.push(path),
            Err(e) => {
                tracing::error!(error = %e, "artifact write failed");
                progress.short("artifact write failed");
            }
        }
    }
}

/// Appends a successful fetch, or records why the city contributes nothing.
fn collect_outcome<T>(
    outcome: RetryOutcome<Vec<T>>,
    city: &str,
    source: &str,
    into: &mut Vec<T>,
    failures: &mut Vec<FetchFailure>,
) {
    match outcome {
        RetryOutcome::Success { value, .. } => into.extend(value),
        RetryOutcome::Exhausted { last_error: error, .. } | RetryOutcome::Aborted { error, .. } => {
            failures.push(FetchFailure {
                city: city.to_string(),
                source: source.to_string(),
                error: error.to_string(),
            });
        }
    }
}
