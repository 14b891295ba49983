pub mod city;
pub mod energy;
pub mod merged;
pub mod weather;
pub mod window;

pub use city::{CityProfile, EnergyRoute};
pub use energy::{EnergyReading, EnergyRecord};
pub use merged::MergedRecord;
pub use weather::WeatherRecord;
pub use window::{DateWindow, WindowError};

/// Serde adapter writing `time::Date` as `YYYY-MM-DD` in every artifact.
pub mod iso_date {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::{format_description::BorrowedFormatItem, macros::format_description, Date};

    pub const FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        let text = date.format(FORMAT).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let text = String::deserialize(deserializer)?;
        Date::parse(text.trim(), FORMAT).map_err(serde::de::Error::custom)
    }

    pub fn parse(text: &str) -> Option<Date> {
        Date::parse(text.trim(), FORMAT).ok()
    }

    pub fn format(date: Date) -> String {
        // The format has no fallible components for in-range dates.
        date.format(FORMAT).unwrap_or_default()
    }
}
