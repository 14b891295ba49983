use serde::{Deserialize, Serialize};
use time::Date;

/// Daily high/low observation for one city, in degrees Celsius.
///
/// Only complete days exist as a `WeatherRecord`; partial days are dropped
/// while reshaping the API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub city: String,
    #[serde(with = "crate::domain::iso_date")]
    pub date: Date,
    pub temp_high_c: f64,
    pub temp_low_c: f64,
}

impl WeatherRecord {
    pub fn key(&self) -> (&str, Date) {
        (self.city.as_str(), self.date)
    }

    /// Mean of high and low. Halving an `f64` is exact, so no rounding is applied.
    pub fn temp_avg_c(&self) -> f64 {
        (self.temp_high_c + self.temp_low_c) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn temp_avg_is_exact_mean() {
        let rec = WeatherRecord {
            city: "Phoenix".to_string(),
            date: date!(2024 - 07 - 01),
            temp_high_c: 43.3,
            temp_low_c: 29.4,
        };
        assert_eq!(rec.temp_avg_c(), (43.3 + 29.4) / 2.0);
    }

    #[test]
    fn serializes_date_as_iso() {
        let rec = WeatherRecord {
            city: "Chicago".to_string(),
            date: date!(2024 - 01 - 05),
            temp_high_c: -1.5,
            temp_low_c: -9.0,
        };
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"date\":\"2024-01-05\""));
        let back: WeatherRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }
}
