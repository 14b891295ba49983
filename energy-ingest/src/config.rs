use energy_domain::CityProfile;
use serde::Deserialize;
use std::{collections::HashSet, fs, path::PathBuf, time::Duration};

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Minimum spacing between consecutive API requests.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            pacing_ms: default_pacing_ms(),
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherSourceConfig {
    #[serde(default = "default_noaa_url")]
    pub base_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_dataset_id")]
    pub dataset_id: String,
    #[serde(default = "default_units")]
    pub units: String,
    /// Multiplier from the API's native value to degrees Celsius
    /// (1.0 for `units = "metric"`, 0.1 for raw GHCN tenths).
    #[serde(default = "default_value_scale")]
    pub value_scale: f64,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnergySourceConfig {
    #[serde(default = "default_eia_hourly_url")]
    pub hourly_url: String,
    #[serde(default = "default_eia_monthly_url")]
    pub monthly_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Sector used by the monthly retail-sales route.
    #[serde(default = "default_monthly_sector")]
    pub monthly_sector: String,
    /// Rows per request; EIA v2 serves at most 5000.
    #[serde(default = "default_eia_page_length")]
    pub page_length: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_temp_min_c")]
    pub temp_min_c: f64,
    #[serde(default = "default_temp_max_c")]
    pub temp_max_c: f64,
    #[serde(default)]
    pub energy_min_mwh: f64,
    #[serde(default = "default_staleness_days")]
    pub staleness_days: i64,
    #[serde(default = "default_required_fields")]
    pub required_fields: Vec<String>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            temp_min_c: default_temp_min_c(),
            temp_max_c: default_temp_max_c(),
            energy_min_mwh: 0.0,
            staleness_days: default_staleness_days(),
            required_fields: default_required_fields(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_historical_days")]
    pub historical_days: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            historical_days: default_historical_days(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub weather: WeatherSourceConfig,
    pub energy: EnergySourceConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    pub metrics: Option<MetricsConfig>,
    pub cities: Vec<CityProfile>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("ENERGY_INGEST_CONFIG").unwrap_or_else(|_| "energy-ingest.toml".to_string());
        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read config {path}: {e}"))?;
        let mut cfg = Self::from_toml(&contents)?;

        // Credentials may come from the environment instead of the file.
        if let Ok(token) = env::var("NOAA_TOKEN") {
            cfg.weather.token = token;
        }
        if let Ok(key) = env::var("EIA_API_KEY") {
            cfg.energy.api_key = key;
        }

        Ok(cfg)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cities.is_empty() {
            anyhow::bail!("config lists no cities");
        }
        let mut seen = HashSet::new();
        for city in &self.cities {
            if !seen.insert(city.name.as_str()) {
                anyhow::bail!("duplicate city name '{}'", city.name);
            }
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.backoff_factor < 1.0 {
            anyhow::bail!("retry.backoff_factor must be >= 1.0");
        }
        if self.quality.temp_min_c >= self.quality.temp_max_c {
            anyhow::bail!("quality.temp_min_c must be below quality.temp_max_c");
        }
        Ok(())
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_pacing_ms() -> u64 {
    200
}

fn default_noaa_url() -> String {
    "https://www.ncei.noaa.gov/cdo-web/api/v2/data".to_string()
}

fn default_dataset_id() -> String {
    "GHCND".to_string()
}

fn default_units() -> String {
    "metric".to_string()
}

fn default_value_scale() -> f64 {
    1.0
}

fn default_page_limit() -> u32 {
    1000
}

fn default_eia_hourly_url() -> String {
    "https://api.eia.gov/v2/electricity/rto/region-data/data/".to_string()
}

fn default_eia_monthly_url() -> String {
    "https://api.eia.gov/v2/electricity/retail-sales/data/".to_string()
}

fn default_monthly_sector() -> String {
    "ALL".to_string()
}

fn default_eia_page_length() -> u32 {
    5_000
}

fn default_temp_min_c() -> f64 {
    -45.0
}

fn default_temp_max_c() -> f64 {
    55.0
}

fn default_staleness_days() -> i64 {
    3
}

fn default_required_fields() -> Vec<String> {
    vec![
        "temp_high_c".to_string(),
        "temp_low_c".to_string(),
        "energy_consumption_mwh".to_string(),
    ]
}

fn default_historical_days() -> u32 {
    90
}

fn default_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy_domain::EnergyRoute;

    const MINIMAL: &str = r#"
        [weather]
        token = "noaa-token"

        [energy]
        api_key = "eia-key"

        [[cities]]
        name = "New York"
        noaa_station_id = "GHCND:USW00094728"
        eia_region = "NYIS"
        latitude = 40.71
        longitude = -74.01

        [[cities]]
        name = "Phoenix"
        noaa_station_id = "GHCND:USW00023183"
        eia_region = "AZ"
        latitude = 33.45
        longitude = -112.07
        energy_route = "monthly"
    "#;

    #[test]
    fn minimal_config_gets_documented_defaults() {
        let cfg = AppConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.initial_delay_ms, 1_000);
        assert_eq!(cfg.retry.backoff_factor, 2.0);
        assert_eq!(cfg.http.pacing(), Duration::from_millis(200));
        assert_eq!(cfg.quality.temp_min_c, -45.0);
        assert_eq!(cfg.quality.temp_max_c, 55.0);
        assert_eq!(cfg.quality.staleness_days, 3);
        assert_eq!(cfg.pipeline.historical_days, 90);
        assert_eq!(cfg.weather.dataset_id, "GHCND");
        assert!(cfg.metrics.is_none());
        assert_eq!(cfg.cities[1].energy_route, EnergyRoute::Monthly);
    }

    #[test]
    fn duplicate_city_names_are_rejected() {
        let doubled = format!(
            "{MINIMAL}\n[[cities]]\nname = \"Phoenix\"\nnoaa_station_id = \"x\"\neia_region = \"AZ\"\nlatitude = 0.0\nlongitude = 0.0\n"
        );
        let err = AppConfig::from_toml(&doubled).unwrap_err();
        assert!(err.to_string().contains("duplicate city"));
    }

    #[test]
    fn inverted_temperature_thresholds_are_rejected() {
        let cfg = format!("{MINIMAL}\n[quality]\ntemp_min_c = 10.0\ntemp_max_c = 5.0\n");
        assert!(AppConfig::from_toml(&cfg).is_err());
    }

    #[test]
    fn example_config_parses() {
        let cfg = AppConfig::from_toml(include_str!("../energy-ingest.example.toml")).unwrap();
        assert_eq!(cfg.cities.len(), 5);
        assert!(cfg.metrics.is_none());
        let seattle = cfg.cities.iter().find(|c| c.name == "Seattle").unwrap();
        assert_eq!(seattle.energy_route, energy_domain::EnergyRoute::Monthly);
    }
}
