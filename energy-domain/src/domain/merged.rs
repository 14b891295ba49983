use serde::{Deserialize, Serialize};
use time::Date;

/// One row of the merged dataset: weather and energy for the same (city, date),
/// plus whatever city metadata could be joined in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub city: String,
    #[serde(with = "crate::domain::iso_date")]
    pub date: Date,
    pub temp_high_c: f64,
    pub temp_low_c: f64,
    pub temp_avg_c: f64,
    pub energy_consumption_mwh: f64,
    pub energy_region: Option<String>,
    pub station_id: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl MergedRecord {
    pub fn key(&self) -> (&str, Date) {
        (self.city.as_str(), self.date)
    }
}
