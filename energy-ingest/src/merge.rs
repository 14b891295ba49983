//! Inner join of the weather and energy tables on (city, date).

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    str::FromStr,
};

use energy_domain::{CityProfile, EnergyRecord, MergedRecord, WeatherRecord};
use serde::Serialize;
use time::Date;

use crate::config::QualityConfig;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("merge input is empty (weather rows: {weather}, energy rows: {energy})")]
    NoInput { weather: usize, energy: usize },
    #[error("inner join produced no rows from {weather} weather and {energy} energy rows; city/date keys do not line up")]
    EmptyJoin { weather: usize, energy: usize },
    #[error("unknown required field '{0}'")]
    UnknownField(String),
}

/// Columns that may be required to be present on every merged row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequiredField {
    TempHigh,
    TempLow,
    TempAvg,
    Energy,
    EnergyRegion,
    StationId,
    Latitude,
    Longitude,
}

impl RequiredField {
    pub fn column(&self) -> &'static str {
        match self {
            Self::TempHigh => "temp_high_c",
            Self::TempLow => "temp_low_c",
            Self::TempAvg => "temp_avg_c",
            Self::Energy => "energy_consumption_mwh",
            Self::EnergyRegion => "energy_region",
            Self::StationId => "station_id",
            Self::Latitude => "latitude",
            Self::Longitude => "longitude",
        }
    }

    pub fn is_present(&self, row: &MergedRecord) -> bool {
        match self {
            Self::TempHigh => row.temp_high_c.is_finite(),
            Self::TempLow => row.temp_low_c.is_finite(),
            Self::TempAvg => row.temp_avg_c.is_finite(),
            Self::Energy => row.energy_consumption_mwh.is_finite(),
            Self::EnergyRegion => row.energy_region.as_deref().is_some_and(|r| !r.is_empty()),
            Self::StationId => row.station_id.as_deref().is_some_and(|s| !s.is_empty()),
            Self::Latitude => row.latitude.is_some_and(f64::is_finite),
            Self::Longitude => row.longitude.is_some_and(f64::is_finite),
        }
    }
}

impl FromStr for RequiredField {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const ALL: [RequiredField; 8] = [
            RequiredField::TempHigh,
            RequiredField::TempLow,
            RequiredField::TempAvg,
            RequiredField::Energy,
            RequiredField::EnergyRegion,
            RequiredField::StationId,
            RequiredField::Latitude,
            RequiredField::Longitude,
        ];
        ALL.into_iter()
            .find(|f| f.column() == s.trim())
            .ok_or_else(|| MergeError::UnknownField(s.to_string()))
    }
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOptions {
    pub required_fields: Vec<RequiredField>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            required_fields: vec![RequiredField::TempHigh, RequiredField::TempLow, RequiredField::Energy],
        }
    }
}

impl MergeOptions {
    pub fn from_config(cfg: &QualityConfig) -> Result<Self, MergeError> {
        let required_fields = cfg
            .required_fields
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { required_fields })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeSummary {
    pub weather_rows: usize,
    pub energy_rows: usize,
    pub joined_rows: usize,
    pub dropped_incomplete: usize,
    pub merged_rows: usize,
    /// blake3 over the canonical row encoding; equal inputs give equal digests.
    pub fingerprint: String,
}

#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub rows: Vec<MergedRecord>,
    pub summary: MergeSummary,
}

/// Joins weather and daily energy on exact (city, date).
///
/// - Keys present on only one side are excluded.
/// - City metadata is joined by name; unknown cities keep the row with empty metadata.
/// - `temp_avg_c` is derived here.
/// - Rows missing any required field are dropped after the joins.
/// - Output is sorted by (city, date).
///
/// A join with zero rows is an error: it means the sources disagree on keys,
/// not that data is merely sparse.
pub fn merge(
    weather: &[WeatherRecord],
    energy: &[EnergyRecord],
    cities: &[CityProfile],
    opts: &MergeOptions,
) -> Result<MergeOutput, MergeError> {
    if weather.is_empty() || energy.is_empty() {
        return Err(MergeError::NoInput {
            weather: weather.len(),
            energy: energy.len(),
        });
    }

    let weather_by_key: BTreeMap<(&str, Date), &WeatherRecord> = weather.iter().map(|w| (w.key(), w)).collect();
    let energy_by_key: HashMap<(&str, Date), &EnergyRecord> = energy.iter().map(|e| (e.key(), e)).collect();
    let meta: HashMap<&str, &CityProfile> = cities.iter().map(|c| (c.name.as_str(), c)).collect();

    tracing::info!(
        weather = weather_by_key.len(),
        energy = energy_by_key.len(),
        "pre-merge record counts"
    );

    let joined: Vec<MergedRecord> = weather_by_key
        .iter()
        .filter_map(|(key, w)| {
            let e = energy_by_key.get(key)?;
            let city = meta.get(w.city.as_str());
            Some(MergedRecord {
                city: w.city.clone(),
                date: w.date,
                temp_high_c: w.temp_high_c,
                temp_low_c: w.temp_low_c,
                temp_avg_c: w.temp_avg_c(),
                energy_consumption_mwh: e.consumption_mwh,
                energy_region: city.map(|c| c.eia_region.clone()),
                station_id: city.map(|c| c.noaa_station_id.clone()),
                latitude: city.map(|c| c.latitude),
                longitude: city.map(|c| c.longitude),
            })
        })
        .collect();

    if joined.is_empty() {
        metrics::counter!("merge_empty_total").increment(1);
        let err = MergeError::EmptyJoin {
            weather: weather.len(),
            energy: energy.len(),
        };
        tracing::error!(error = %err, "merge produced no rows");
        return Err(err);
    }

    let joined_rows = joined.len();
    let rows: Vec<MergedRecord> = joined
        .into_iter()
        .filter(|row| opts.required_fields.iter().all(|f| f.is_present(row)))
        .collect();
    let dropped_incomplete = joined_rows - rows.len();
    if dropped_incomplete > 0 {
        tracing::warn!(dropped_incomplete, "dropped merged rows missing required fields");
    }
    tracing::info!(merged = rows.len(), "post-merge record count");

    let summary = MergeSummary {
        weather_rows: weather.len(),
        energy_rows: energy.len(),
        joined_rows,
        dropped_incomplete,
        merged_rows: rows.len(),
        fingerprint: fingerprint(&rows),
    };
    Ok(MergeOutput { rows, summary })
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    let len = s.len() as u32;
    hasher.update(&len.to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_opt_str(hasher: &mut blake3::Hasher, s: Option<&str>) {
    match s {
        Some(v) => {
            hasher.update(&[1]);
            hash_str(hasher, v);
        }
        None => {
            hasher.update(&[0]);
        }
    }
}

fn hash_f64(hasher: &mut blake3::Hasher, v: f64) {
    hasher.update(&v.to_bits().to_le_bytes());
}

fn hash_opt_f64(hasher: &mut blake3::Hasher, v: Option<f64>) {
    match v {
        Some(x) => {
            hasher.update(&[1]);
            hash_f64(hasher, x);
        }
        None => {
            hasher.update(&[0]);
        }
    }
}

/// Order-sensitive digest of the merged table.
pub fn fingerprint(rows: &[MergedRecord]) -> String {
    let mut h = blake3::Hasher::new();
    h.update(&(rows.len() as u64).to_le_bytes());
    for r in rows {
        hash_str(&mut h, &r.city);
        h.update(&r.date.to_julian_day().to_le_bytes());
        hash_f64(&mut h, r.temp_high_c);
        hash_f64(&mut h, r.temp_low_c);
        hash_f64(&mut h, r.temp_avg_c);
        hash_f64(&mut h, r.energy_consumption_mwh);
        hash_opt_str(&mut h, r.energy_region.as_deref());
        hash_opt_str(&mut h, r.station_id.as_deref());
        hash_opt_f64(&mut h, r.latitude);
        hash_opt_f64(&mut h, r.longitude);
    }
    h.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy_domain::EnergyRoute;
    use time::macros::date;

    fn w(city: &str, date: Date, high: f64, low: f64) -> WeatherRecord {
        WeatherRecord {
            city: city.to_string(),
            date,
            temp_high_c: high,
            temp_low_c: low,
        }
    }

    fn e(city: &str, date: Date, mwh: f64) -> EnergyRecord {
        EnergyRecord {
            city: city.to_string(),
            region: "R".to_string(),
            date,
            consumption_mwh: mwh,
        }
    }

    fn profile(name: &str) -> CityProfile {
        CityProfile {
            name: name.to_string(),
            noaa_station_id: format!("GHCND:{name}"),
            eia_region: format!("{name}-R"),
            latitude: 40.0,
            longitude: -90.0,
            energy_route: EnergyRoute::Hourly,
        }
    }

    fn sample() -> (Vec<WeatherRecord>, Vec<EnergyRecord>) {
        let weather = vec![
            w("Boston", date!(2024 - 01 - 02), 3.0, -4.0),
            w("Austin", date!(2024 - 01 - 01), 18.0, 6.0),
            w("Boston", date!(2024 - 01 - 01), 2.0, -5.0),
            w("Austin", date!(2024 - 01 - 03), 20.0, 8.0),
        ];
        let energy = vec![
            e("Boston", date!(2024 - 01 - 01), 900.0),
            e("Austin", date!(2024 - 01 - 01), 700.0),
            e("Boston", date!(2024 - 01 - 02), 950.0),
            e("Austin", date!(2024 - 01 - 02), 710.0),
        ];
        (weather, energy)
    }

    #[test]
    fn inner_join_keeps_only_shared_keys_sorted() {
        let (weather, energy) = sample();
        let out = merge(&weather, &energy, &[profile("Austin"), profile("Boston")], &MergeOptions::default()).unwrap();
        let keys: Vec<(&str, Date)> = out.rows.iter().map(|r| r.key()).collect();
        assert_eq!(
            keys,
            vec![
                ("Austin", date!(2024 - 01 - 01)),
                ("Boston", date!(2024 - 01 - 01)),
                ("Boston", date!(2024 - 01 - 02)),
            ]
        );
        assert_eq!(out.summary.joined_rows, 3);
        assert_eq!(out.summary.merged_rows, 3);
        assert_eq!(out.rows[0].energy_region.as_deref(), Some("Austin-R"));
    }

    #[test]
    fn temp_avg_is_mean_of_high_and_low() {
        let (weather, energy) = sample();
        let out = merge(&weather, &energy, &[], &MergeOptions::default()).unwrap();
        for row in &out.rows {
            assert_eq!(row.temp_avg_c, (row.temp_high_c + row.temp_low_c) / 2.0);
        }
    }

    #[test]
    fn unknown_city_keeps_row_with_empty_metadata() {
        let (weather, energy) = sample();
        let out = merge(&weather, &energy, &[profile("Austin")], &MergeOptions::default()).unwrap();
        let boston: Vec<&MergedRecord> = out.rows.iter().filter(|r| r.city == "Boston").collect();
        assert_eq!(boston.len(), 2);
        assert!(boston.iter().all(|r| r.energy_region.is_none() && r.latitude.is_none()));
    }

    #[test]
    fn rows_missing_required_metadata_are_dropped() {
        let (weather, energy) = sample();
        let opts = MergeOptions {
            required_fields: vec![RequiredField::Energy, RequiredField::Latitude],
        };
        let out = merge(&weather, &energy, &[profile("Austin")], &opts).unwrap();
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.summary.dropped_incomplete, 2);
    }

    #[test]
    fn shuffled_inputs_give_identical_output() {
        let (weather, energy) = sample();
        let cities = [profile("Austin"), profile("Boston")];
        let base = merge(&weather, &energy, &cities, &MergeOptions::default()).unwrap();

        let mut w2 = weather.clone();
        w2.reverse();
        let mut e2 = energy.clone();
        e2.rotate_left(1);
        let shuffled = merge(&w2, &e2, &cities, &MergeOptions::default()).unwrap();

        assert_eq!(base.rows, shuffled.rows);
        assert_eq!(base.summary.fingerprint, shuffled.summary.fingerprint);
    }

    #[test]
    fn disjoint_keys_are_an_empty_join_error() {
        let weather = vec![w("Austin", date!(2024 - 01 - 01), 18.0, 6.0)];
        let energy = vec![e("Austin", date!(2024 - 02 - 01), 700.0)];
        let err = merge(&weather, &energy, &[], &MergeOptions::default()).unwrap_err();
        assert_eq!(err, MergeError::EmptyJoin { weather: 1, energy: 1 });
    }

    #[test]
    fn empty_side_is_no_input() {
        let weather = vec![w("Austin", date!(2024 - 01 - 01), 18.0, 6.0)];
        let err = merge(&weather, &[], &[], &MergeOptions::default()).unwrap_err();
        assert_eq!(err, MergeError::NoInput { weather: 1, energy: 0 });
    }

    #[test]
    fn negative_energy_flows_through() {
        let weather = vec![w("Austin", date!(2024 - 01 - 01), 18.0, 6.0)];
        let energy = vec![e("Austin", date!(2024 - 01 - 01), -42.0)];
        let out = merge(&weather, &energy, &[], &MergeOptions::default()).unwrap();
        assert_eq!(out.rows[0].energy_consumption_mwh, -42.0);
    }

    #[test]
    fn required_fields_parse_from_column_names() {
        let opts = MergeOptions::from_config(&QualityConfig::default()).unwrap();
        assert_eq!(opts, MergeOptions::default());
        assert_eq!("latitude".parse::<RequiredField>().unwrap(), RequiredField::Latitude);
        assert!(matches!("humidity".parse::<RequiredField>(), Err(MergeError::UnknownField(_))));
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let (weather, energy) = sample();
        let out = merge(&weather, &energy, &[], &MergeOptions::default()).unwrap();
        let mut altered = out.rows.clone();
        altered[0].energy_consumption_mwh += 1.0;
        assert_ne!(fingerprint(&out.rows), fingerprint(&altered));
        assert_eq!(fingerprint(&out.rows), out.summary.fingerprint);
    }
}
