use std::collections::BTreeMap;

use energy_domain::{EnergyReading, EnergyRecord, WeatherRecord};
use time::Date;

/// Collapse sub-daily energy readings into one total per (city, date).
///
/// Rules:
/// - Same-day values are summed; this is the only place hourly data is collapsed.
/// - Negative readings are summed as-is.
/// - Region comes from the first reading seen for the key.
/// - Output is sorted by (city, date).
pub fn aggregate_daily(readings: &[EnergyReading]) -> Vec<EnergyRecord> {
    let mut totals: BTreeMap<(String, Date), EnergyRecord> = BTreeMap::new();

    for r in readings {
        totals
            .entry((r.city.clone(), r.date))
            .and_modify(|rec| rec.consumption_mwh += r.value_mwh)
            .or_insert_with(|| EnergyRecord {
                city: r.city.clone(),
                region: r.region.clone(),
                date: r.date,
                consumption_mwh: r.value_mwh,
            });
    }

    totals.into_values().collect()
}

/// One weather record per (city, date), later records winning, sorted by key.
pub fn dedup_weather(records: Vec<WeatherRecord>) -> Vec<WeatherRecord> {
    let mut by_key: BTreeMap<(String, Date), WeatherRecord> = BTreeMap::new();
    let before = records.len();
    for rec in records {
        by_key.insert((rec.city.clone(), rec.date), rec);
    }
    if by_key.len() < before {
        tracing::warn!(
            duplicates = before - by_key.len(),
            "collapsed duplicate weather records"
        );
    }
    by_key.into_values().collect()
}
