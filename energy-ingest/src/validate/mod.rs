//! Per-source data-quality checks.
//!
//! Three independent checks run over each raw (pre-merge) table: missing
//! values, threshold outliers and freshness. A failing check is recorded as an
//! `{"error": ...}` entry in its own slot and never stops the other two.
//!
//! # Clock injection
//! Freshness takes `now` from the caller so tests and reruns are deterministic.

pub mod report;

pub use report::{FetchFailure, QualityReport};

use std::collections::BTreeMap;

use energy_domain::{EnergyRecord, WeatherRecord};
use serde::Serialize;
use time::{Date, OffsetDateTime};

use crate::config::QualityConfig;

pub const COL_TEMP_HIGH: &str = "temp_high_c";
pub const COL_TEMP_LOW: &str = "temp_low_c";
pub const COL_ENERGY: &str = "energy_consumption_mwh";

pub const OUTLIER_TEMPERATURE: &str = "temperature";
pub const OUTLIER_ENERGY: &str = "energy_consumption";

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, PartialEq)]
pub struct QualityThresholds {
    pub temp_min_c: f64,
    pub temp_max_c: f64,
    pub energy_min_mwh: f64,
    pub staleness_days: i64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self::from(&QualityConfig::default())
    }
}

impl From<&QualityConfig> for QualityThresholds {
    fn from(cfg: &QualityConfig) -> Self {
        Self {
            temp_min_c: cfg.temp_min_c,
            temp_max_c: cfg.temp_max_c,
            energy_min_mwh: cfg.energy_min_mwh,
            staleness_days: cfg.staleness_days,
        }
    }
}

/// Result of one check: the value, or an explicit error entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Check<T> {
    Ok(T),
    Failed { error: String },
}

impl<T> Check<T> {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed { error: msg.into() }
    }

    pub fn ok(&self) -> Option<&T> {
        match self {
            Self::Ok(v) => Some(v),
            Self::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Freshness {
    #[serde(with = "energy_domain::iso_date")]
    pub latest_date_found: Date,
    pub days_since_latest: i64,
    pub is_stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualitySection {
    pub source: String,
    pub record_count: usize,
    pub missing_values: Check<BTreeMap<String, u64>>,
    pub outliers: Check<BTreeMap<String, u64>>,
    pub freshness: Check<Freshness>,
}

/// A row type the validator can inspect.
pub trait Observation {
    fn tracked_columns() -> &'static [&'static str];

    /// `None` (or a non-finite value) counts as missing.
    fn column(&self, name: &str) -> Option<f64>;

    fn observed_on(&self) -> Option<Date>;

    /// Outlier categories this row breaches.
    fn outlier_categories() -> &'static [&'static str];

    fn breaches(&self, category: &str, t: &QualityThresholds) -> bool;
}

impl Observation for WeatherRecord {
    fn tracked_columns() -> &'static [&'static str] {
        &[COL_TEMP_HIGH, COL_TEMP_LOW]
    }

    fn column(&self, name: &str) -> Option<f64> {
        match name {
            COL_TEMP_HIGH => Some(self.temp_high_c),
            COL_TEMP_LOW => Some(self.temp_low_c),
            _ => None,
        }
    }

    fn observed_on(&self) -> Option<Date> {
        Some(self.date)
    }

    fn outlier_categories() -> &'static [&'static str] {
        &[OUTLIER_TEMPERATURE]
    }

    fn breaches(&self, category: &str, t: &QualityThresholds) -> bool {
        let outside = |v: f64| v < t.temp_min_c || v > t.temp_max_c;
        category == OUTLIER_TEMPERATURE && (outside(self.temp_high_c) || outside(self.temp_low_c))
    }
}

impl Observation for EnergyRecord {
    fn tracked_columns() -> &'static [&'static str] {
        &[COL_ENERGY]
    }

    fn column(&self, name: &str) -> Option<f64> {
        (name == COL_ENERGY).then_some(self.consumption_mwh)
    }

    fn observed_on(&self) -> Option<Date> {
        Some(self.date)
    }

    fn outlier_categories() -> &'static [&'static str] {
        &[OUTLIER_ENERGY]
    }

    fn breaches(&self, category: &str, t: &QualityThresholds) -> bool {
        category == OUTLIER_ENERGY && self.consumption_mwh < t.energy_min_mwh
    }
}

pub fn check_missing<R: Observation>(records: &[R]) -> Check<BTreeMap<String, u64>> {
    if records.is_empty() {
        return Check::failed("table is empty");
    }
    let counts = R::tracked_columns()
        .iter()
        .map(|col| {
            let missing = records
                .iter()
                .filter(|r| !r.column(col).is_some_and(f64::is_finite))
                .count() as u64;
            (col.to_string(), missing)
        })
        .collect();
    Check::Ok(counts)
}

pub fn check_outliers<R: Observation>(records: &[R], thresholds: &QualityThresholds) -> Check<BTreeMap<String, u64>> {
    if records.is_empty() {
        return Check::failed("table is empty");
    }
    let counts = R::outlier_categories()
        .iter()
        .map(|cat| {
            let n = records.iter().filter(|r| r.breaches(cat, thresholds)).count() as u64;
            (cat.to_string(), n)
        })
        .collect();
    Check::Ok(counts)
}

/// Whole days elapsed from the start (00:00 UTC) of `latest` to `now`, floored.
pub fn days_since(latest: Date, now: OffsetDateTime) -> i64 {
    let start = latest.midnight().assume_utc();
    (now - start).whole_seconds().div_euclid(SECONDS_PER_DAY)
}

pub fn check_freshness<R: Observation>(records: &[R], staleness_days: i64, now: OffsetDateTime) -> Check<Freshness> {
    if records.is_empty() {
        return Check::failed("table is empty");
    }
    let Some(latest) = records.iter().filter_map(R::observed_on).max() else {
        return Check::failed("no parsable date column");
    };
    let days = days_since(latest, now);
    Check::Ok(Freshness {
        latest_date_found: latest,
        days_since_latest: days,
        // Strictly greater than: a source exactly at the threshold is still fresh.
        is_stale: days > staleness_days,
    })
}

/// Runs all three checks over one source's table.
pub fn validate<R: Observation>(
    records: &[R],
    source: &str,
    thresholds: &QualityThresholds,
    now: OffsetDateTime,
) -> QualitySection {
    let section = QualitySection {
        source: source.to_string(),
        record_count: records.len(),
        missing_values: check_missing(records),
        outliers: check_outliers(records, thresholds),
        freshness: check_freshness(records, thresholds.staleness_days, now),
    };

    if let Some(outliers) = section.outliers.ok() {
        let total: u64 = outliers.values().sum();
        metrics::counter!("quality_outliers_total", "source" => source.to_string()).increment(total);
        if total > 0 {
            tracing::warn!(source, outliers = total, "outliers flagged (kept in dataset)");
        }
    }
    match &section.freshness {
        Check::Ok(f) if f.is_stale => tracing::warn!(
            source,
            days_since_latest = f.days_since_latest,
            latest = %f.latest_date_found,
            "source data is stale"
        ),
        Check::Ok(_) => {}
        Check::Failed { error } => tracing::warn!(source, error = %error, "freshness check failed"),
    }
    if let Check::Failed { error } = &section.missing_values {
        tracing::warn!(source, error = %error, "missing-value check failed");
    }

    section
}
