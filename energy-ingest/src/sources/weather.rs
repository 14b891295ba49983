//! NOAA Climate Data Online client.
//!
//! The `data` endpoint returns one row per (date, datatype); TMAX and TMIN for
//! the same day arrive as separate rows and are folded into a single
//! [`WeatherRecord`] here.

use std::collections::BTreeMap;

use energy_domain::{iso_date, CityProfile, DateWindow, WeatherRecord};
use serde::Deserialize;
use time::Date;

use super::{get_json, Page, Source};
use crate::{config::WeatherSourceConfig, retry::FetchError};

pub const DATATYPE_MAX: &str = "TMAX";
pub const DATATYPE_MIN: &str = "TMIN";

#[derive(Debug, Deserialize)]
pub struct NoaaResponse {
    #[serde(default)]
    pub metadata: Option<NoaaMetadata>,
    #[serde(default)]
    pub results: Vec<NoaaReading>,
}

#[derive(Debug, Deserialize)]
pub struct NoaaMetadata {
    pub resultset: NoaaResultSet,
}

#[derive(Debug, Deserialize)]
pub struct NoaaResultSet {
    pub count: u64,
}

/// One flat reading, e.g. `{"date": "2024-01-01T00:00:00", "datatype": "TMAX", "value": 5.6}`.
#[derive(Debug, Clone, Deserialize)]
pub struct NoaaReading {
    pub date: String,
    pub datatype: String,
    pub value: Option<f64>,
}

/// Native API value to degrees Celsius.
pub fn native_to_celsius(value: f64, scale: f64) -> f64 {
    value * scale
}

/// Folds flat readings into one record per date.
///
/// Days missing either bound are dropped, never defaulted. Later duplicates of
/// the same (date, datatype) replace earlier ones. Output is sorted by date.
pub fn reshape_daily(city: &str, readings: &[NoaaReading], scale: f64) -> Vec<WeatherRecord> {
    let mut days: BTreeMap<Date, (Option<f64>, Option<f64>)> = BTreeMap::new();

    for r in readings {
        let day = r.date.split('T').next().unwrap_or_default();
        let Some(date) = iso_date::parse(day) else {
            tracing::debug!(date = %r.date, "skipping reading with unparsable date");
            continue;
        };
        let Some(value) = r.value.filter(|v| v.is_finite()) else {
            continue;
        };
        let slot = days.entry(date).or_default();
        match r.datatype.as_str() {
            DATATYPE_MAX => slot.0 = Some(native_to_celsius(value, scale)),
            DATATYPE_MIN => slot.1 = Some(native_to_celsius(value, scale)),
            _ => {}
        }
    }

    let total_days = days.len();
    let records: Vec<WeatherRecord> = days
        .into_iter()
        .filter_map(|(date, bounds)| match bounds {
            (Some(high), Some(low)) => Some(WeatherRecord {
                city: city.to_string(),
                date,
                temp_high_c: high,
                temp_low_c: low,
            }),
            _ => None,
        })
        .collect();

    let incomplete = total_days - records.len();
    if incomplete > 0 {
        tracing::debug!(city, incomplete, "dropped days missing TMAX or TMIN");
    }
    records
}

pub struct NoaaWeatherSource {
    client: reqwest::Client,
    cfg: WeatherSourceConfig,
}

impl NoaaWeatherSource {
    pub fn new(client: reqwest::Client, cfg: WeatherSourceConfig) -> Self {
        Self { client, cfg }
    }

    /// `offset` counts rows already received; NOAA's own offset is 1-based.
    pub fn query_params(&self, city: &CityProfile, window: &DateWindow, offset: usize) -> Vec<(&'static str, String)> {
        vec![
            ("datasetid", self.cfg.dataset_id.clone()),
            ("stationid", city.noaa_station_id.clone()),
            ("startdate", iso_date::format(window.start)),
            ("enddate", iso_date::format(window.end)),
            ("datatypeid", format!("{DATATYPE_MAX},{DATATYPE_MIN}")),
            ("units", self.cfg.units.clone()),
            ("sortfield", "date".to_string()),
            ("limit", self.cfg.page_limit.to_string()),
            ("offset", (offset + 1).to_string()),
        ]
    }
}

impl NoaaResponse {
    pub fn into_page(self) -> Page<NoaaReading> {
        Page {
            fetched: self.results.len(),
            total: self.metadata.map(|m| m.resultset.count as usize),
            rows: self.results,
        }
    }
}

#[async_trait::async_trait]
impl Source<WeatherRecord> for NoaaWeatherSource {
    type Row = NoaaReading;

    fn name(&self) -> &'static str {
        "weather"
    }

    async fn fetch_page(
        &self,
        city: &CityProfile,
        window: &DateWindow,
        offset: usize,
    ) -> Result<Page<NoaaReading>, FetchError> {
        let req = self
            .client
            .get(&self.cfg.base_url)
            .header("token", &self.cfg.token)
            .query(&self.query_params(city, window, offset));

        let body: NoaaResponse = get_json(req).await?;
        Ok(body.into_page())
    }

    fn assemble(&self, city: &CityProfile, rows: Vec<NoaaReading>) -> Vec<WeatherRecord> {
        reshape_daily(&city.name, &rows, self.cfg.value_scale)
    }
}
