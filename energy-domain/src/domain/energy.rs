use serde::{Deserialize, Serialize};
use time::Date;

/// A single value as published by the energy API.
///
/// Hourly endpoints carry `hour`; monthly endpoints report the first day of the
/// month with no hour. Several readings may share a date until they are
/// collapsed into an [`EnergyRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyReading {
    pub city: String,
    pub region: String,
    #[serde(with = "crate::domain::iso_date")]
    pub date: Date,
    pub hour: Option<u8>,
    pub value_mwh: f64,
}

/// Daily consumption total for one city. Negative values (net flow) are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyRecord {
    pub city: String,
    pub region: String,
    #[serde(with = "crate::domain::iso_date")]
    pub date: Date,
    pub consumption_mwh: f64,
}

impl EnergyRecord {
    pub fn key(&self) -> (&str, Date) {
        (self.city.as_str(), self.date)
    }
}
