use serde::{Deserialize, Serialize};

/// Endpoint shape used to pull a city's consumption from the energy API.
///
/// Most balancing-authority regions publish hourly demand; a few cities are
/// only covered by state-level monthly retail sales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyRoute {
    #[default]
    Hourly,
    Monthly,
}

impl EnergyRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Monthly => "monthly",
        }
    }
}

/// A monitored location and its source-specific keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityProfile {
    pub name: String,
    pub noaa_station_id: String,
    /// EIA series/respondent id for hourly cities, state id for monthly ones.
    pub eia_region: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub energy_route: EnergyRoute,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_route_defaults_to_hourly_when_omitted() {
        let json = r#"{
            "name": "Seattle",
            "noaa_station_id": "GHCND:USW00024233",
            "eia_region": "SCL",
            "latitude": 47.61,
            "longitude": -122.33
        }"#;
        let city: CityProfile = serde_json::from_str(json).unwrap();
        assert_eq!(city.energy_route, EnergyRoute::Hourly);
    }

    #[test]
    fn energy_route_parses_snake_case() {
        let route: EnergyRoute = serde_json::from_str("\"monthly\"").unwrap();
        assert_eq!(route, EnergyRoute::Monthly);
        assert_eq!(route.as_str(), "monthly");
    }
}
