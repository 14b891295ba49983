//! EIA v2 client.
//!
//! Cities are routed to an endpoint shape by [`EnergyRoute`]: hourly demand by
//! balancing authority for most, monthly retail sales by state for the rest.
//! Each shape owns its URL, parameters and row parser; the fetch path only
//! looks the shape up.

use std::{collections::HashMap, sync::Arc};

use energy_domain::{iso_date, CityProfile, DateWindow, EnergyReading, EnergyRoute};
use serde::Deserialize;
use serde_json::{Map, Value};
use time::{Date, Month};

use super::{get_json, Page, Source};
use crate::{config::EnergySourceConfig, retry::FetchError};

/// Retail sales are published in million kWh.
const GWH_TO_MWH: f64 = 1_000.0;

#[derive(Debug, Deserialize)]
pub struct EiaEnvelope {
    pub response: Option<EiaBody>,
}

#[derive(Debug, Deserialize)]
pub struct EiaBody {
    /// Rows matching the whole query; sent as a string by some routes.
    #[serde(default)]
    pub total: Option<Value>,
    #[serde(default)]
    pub data: Vec<Map<String, Value>>,
}

fn value_as_count(v: &Value) -> Option<usize> {
    match v {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Request/response shape of one EIA route.
pub trait EnergyEndpoint: Send + Sync {
    fn url<'a>(&self, cfg: &'a EnergySourceConfig) -> &'a str;

    fn params(&self, city: &CityProfile, window: &DateWindow, cfg: &EnergySourceConfig) -> Vec<(String, String)>;

    /// Turns one row into a reading. Rows without a usable value or period
    /// yield `None` and are excluded, never defaulted to zero.
    fn parse_row(&self, city: &CityProfile, row: &Map<String, Value>) -> Option<EnergyReading>;
}

/// Hourly demand (`type = D`) for a balancing-authority respondent.
pub struct HourlyDemandEndpoint;

impl EnergyEndpoint for HourlyDemandEndpoint {
    fn url<'a>(&self, cfg: &'a EnergySourceConfig) -> &'a str {
        &cfg.hourly_url
    }

    fn params(&self, city: &CityProfile, window: &DateWindow, cfg: &EnergySourceConfig) -> Vec<(String, String)> {
        vec![
            ("api_key".into(), cfg.api_key.clone()),
            ("frequency".into(), "hourly".into()),
            ("data[0]".into(), "value".into()),
            ("facets[respondent][]".into(), city.eia_region.clone()),
            ("facets[type][]".into(), "D".into()),
            ("start".into(), format!("{}T00", iso_date::format(window.start))),
            ("end".into(), format!("{}T23", iso_date::format(window.end))),
            ("sort[0][column]".into(), "period".into()),
            ("sort[0][direction]".into(), "asc".into()),
        ]
    }

    fn parse_row(&self, city: &CityProfile, row: &Map<String, Value>) -> Option<EnergyReading> {
        let (date, hour) = parse_period(row.get("period")?.as_str()?)?;
        let value_mwh = row.get("value").and_then(value_as_f64)?;
        let region = row
            .get("respondent")
            .and_then(Value::as_str)
            .unwrap_or(city.eia_region.as_str())
            .to_string();
        Some(EnergyReading {
            city: city.name.clone(),
            region,
            date,
            hour,
            value_mwh,
        })
    }
}

/// Monthly retail electricity sales for a state; the month maps to its first day.
pub struct MonthlyRetailEndpoint;

impl EnergyEndpoint for MonthlyRetailEndpoint {
    fn url<'a>(&self, cfg: &'a EnergySourceConfig) -> &'a str {
        &cfg.monthly_url
    }

    fn params(&self, city: &CityProfile, window: &DateWindow, cfg: &EnergySourceConfig) -> Vec<(String, String)> {
        vec![
            ("api_key".into(), cfg.api_key.clone()),
            ("frequency".into(), "monthly".into()),
            ("data[0]".into(), "sales".into()),
            ("facets[stateid][]".into(), city.eia_region.clone()),
            ("facets[sectorid][]".into(), cfg.monthly_sector.clone()),
            ("start".into(), month_of(window.start)),
            ("end".into(), month_of(window.end)),
            ("sort[0][column]".into(), "period".into()),
            ("sort[0][direction]".into(), "asc".into()),
        ]
    }

    fn parse_row(&self, city: &CityProfile, row: &Map<String, Value>) -> Option<EnergyReading> {
        let (date, _) = parse_period(row.get("period")?.as_str()?)?;
        let sales = row.get("sales").and_then(value_as_f64)?;
        let region = row
            .get("stateid")
            .and_then(Value::as_str)
            .unwrap_or(city.eia_region.as_str())
            .to_string();
        Some(EnergyReading {
            city: city.name.clone(),
            region,
            date,
            hour: None,
            value_mwh: sales * GWH_TO_MWH,
        })
    }
}

fn month_of(date: Date) -> String {
    format!("{:04}-{:02}", date.year(), u8::from(date.month()))
}

/// Accepts `YYYY-MM-DDTHH`, `YYYY-MM-DD` and `YYYY-MM`.
pub fn parse_period(period: &str) -> Option<(Date, Option<u8>)> {
    let period = period.trim();
    if let Some((day, hour)) = period.split_once('T') {
        let date = iso_date::parse(day)?;
        let hour: u8 = hour.get(..2).unwrap_or(hour).parse().ok()?;
        return (hour < 24).then_some((date, Some(hour)));
    }
    if let Some(date) = iso_date::parse(period) {
        return Some((date, None));
    }
    let (year, month) = period.split_once('-')?;
    let month = Month::try_from(month.parse::<u8>().ok()?).ok()?;
    let date = Date::from_calendar_date(year.parse().ok()?, month, 1).ok()?;
    Some((date, None))
}

/// EIA sends numbers either as JSON numbers or as numeric strings.
fn value_as_f64(v: &Value) -> Option<f64> {
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

pub struct EiaEnergySource {
    client: reqwest::Client,
    cfg: EnergySourceConfig,
    endpoints: HashMap<EnergyRoute, Arc<dyn EnergyEndpoint>>,
}

impl EiaEnergySource {
    /// Source with the hourly and monthly routes registered.
    pub fn new(client: reqwest::Client, cfg: EnergySourceConfig) -> Self {
        Self::with_endpoints(client, cfg, HashMap::new())
            .register(EnergyRoute::Hourly, Arc::new(HourlyDemandEndpoint))
            .register(EnergyRoute::Monthly, Arc::new(MonthlyRetailEndpoint))
    }

    pub fn with_endpoints(
        client: reqwest::Client,
        cfg: EnergySourceConfig,
        endpoints: HashMap<EnergyRoute, Arc<dyn EnergyEndpoint>>,
    ) -> Self {
        Self { client, cfg, endpoints }
    }

    pub fn register(mut self, route: EnergyRoute, endpoint: Arc<dyn EnergyEndpoint>) -> Self {
        self.endpoints.insert(route, endpoint);
        self
    }

    pub fn endpoint_for(&self, city: &CityProfile) -> Result<&dyn EnergyEndpoint, FetchError> {
        self.endpoints
            .get(&city.energy_route)
            .map(|e| e.as_ref())
            .ok_or_else(|| FetchError::NoRoute(city.energy_route.as_str().to_string()))
    }

    pub fn parse_body(&self, city: &CityProfile, body: EiaEnvelope) -> Result<Page<EnergyReading>, FetchError> {
        let endpoint = self.endpoint_for(city)?;
        let body = body
            .response
            .ok_or_else(|| FetchError::Malformed("missing 'response' object".to_string()))?;

        let fetched = body.data.len();
        let rows: Vec<EnergyReading> = body
            .data
            .iter()
            .filter_map(|row| endpoint.parse_row(city, row))
            .collect();
        if rows.len() < fetched {
            tracing::debug!(
                excluded = fetched - rows.len(),
                "excluded energy rows without a value or period"
            );
        }
        Ok(Page {
            rows,
            fetched,
            total: body.total.as_ref().and_then(value_as_count),
        })
    }

    pub fn query_params(
        &self,
        city: &CityProfile,
        window: &DateWindow,
        offset: usize,
    ) -> Result<Vec<(String, String)>, FetchError> {
        let mut params = self.endpoint_for(city)?.params(city, window, &self.cfg);
        params.push(("offset".into(), offset.to_string()));
        params.push(("length".into(), self.cfg.page_length.to_string()));
        Ok(params)
    }
}

#[async_trait::async_trait]
impl Source<EnergyReading> for EiaEnergySource {
    type Row = EnergyReading;

    fn name(&self) -> &'static str {
        "energy"
    }

    async fn fetch_page(
        &self,
        city: &CityProfile,
        window: &DateWindow,
        offset: usize,
    ) -> Result<Page<EnergyReading>, FetchError> {
        let endpoint = self.endpoint_for(city)?;
        let req = self
            .client
            .get(endpoint.url(&self.cfg))
            .query(&self.query_params(city, window, offset)?);

        let body: EiaEnvelope = get_json(req).await?;
        self.parse_body(city, body)
    }

    fn assemble(&self, _city: &CityProfile, rows: Vec<EnergyReading>) -> Vec<EnergyReading> {
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn cfg() -> EnergySourceConfig {
        toml::from_str("api_key = \"k\"").unwrap()
    }

    fn city(route: EnergyRoute, region: &str) -> CityProfile {
        CityProfile {
            name: "Phoenix".to_string(),
            noaa_station_id: "GHCND:USW00023183".to_string(),
            eia_region: region.to_string(),
            latitude: 33.45,
            longitude: -112.07,
            energy_route: route,
        }
    }

    fn body(json: &str) -> EiaEnvelope {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_period_granularities() {
        assert_eq!(parse_period("2024-01-05T13"), Some((date!(2024 - 01 - 05), Some(13))));
        assert_eq!(parse_period("2024-01-05"), Some((date!(2024 - 01 - 05), None)));
        assert_eq!(parse_period("2024-02"), Some((date!(2024 - 02 - 01), None)));
        assert_eq!(parse_period("2024-13"), None);
        assert_eq!(parse_period("2024-01-05T25"), None);
        assert_eq!(parse_period("garbage"), None);
    }

    #[test]
    fn hourly_rows_without_value_are_excluded() {
        let src = EiaEnergySource::new(reqwest::Client::new(), cfg());
        let body = body(
            r#"{"response": {"data": [
                {"period": "2024-01-05T00", "respondent": "AZPS", "value": 3100},
                {"period": "2024-01-05T01", "respondent": "AZPS", "value": null},
                {"period": "2024-01-05T02", "respondent": "AZPS", "value": "-12.5"},
                {"period": "2024-01-05T03", "respondent": "AZPS"}
            ]}}"#,
        );
        let out = src.parse_body(&city(EnergyRoute::Hourly, "AZPS"), body).unwrap().rows;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].value_mwh, 3100.0);
        assert_eq!(out[0].hour, Some(0));
        // Net flow stays negative.
        assert_eq!(out[1].value_mwh, -12.5);
        assert_eq!(out[1].region, "AZPS");
    }

    #[test]
    fn monthly_route_reads_sales_in_mwh() {
        let src = EiaEnergySource::new(reqwest::Client::new(), cfg());
        let body = body(
            r#"{"response": {"data": [
                {"period": "2024-01", "stateid": "AZ", "sectorid": "ALL", "sales": "6321.5"}
            ]}}"#,
        );
        let out = src.parse_body(&city(EnergyRoute::Monthly, "AZ"), body).unwrap().rows;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].date, date!(2024 - 01 - 01));
        assert_eq!(out[0].hour, None);
        assert_eq!(out[0].value_mwh, 6_321_500.0);
    }

    #[test]
    fn missing_response_object_is_malformed() {
        let src = EiaEnergySource::new(reqwest::Client::new(), cfg());
        let err = src
            .parse_body(&city(EnergyRoute::Hourly, "AZPS"), body(r#"{"error": "invalid api_key"}"#))
            .unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[test]
    fn route_selects_parameter_shape_per_city() {
        let src = EiaEnergySource::new(reqwest::Client::new(), cfg());
        let window = DateWindow::new(date!(2024 - 01 - 15), date!(2024 - 03 - 02)).unwrap();

        let hourly_city = city(EnergyRoute::Hourly, "AZPS");
        let hourly = src.endpoint_for(&hourly_city).unwrap().params(&hourly_city, &window, &src.cfg);
        assert!(hourly.contains(&("facets[respondent][]".to_string(), "AZPS".to_string())));
        assert!(hourly.contains(&("start".to_string(), "2024-01-15T00".to_string())));

        let monthly_city = city(EnergyRoute::Monthly, "AZ");
        let monthly = src.endpoint_for(&monthly_city).unwrap().params(&monthly_city, &window, &src.cfg);
        assert!(monthly.contains(&("frequency".to_string(), "monthly".to_string())));
        assert!(monthly.contains(&("facets[stateid][]".to_string(), "AZ".to_string())));
        assert!(monthly.contains(&("start".to_string(), "2024-01".to_string())));
        assert!(monthly.contains(&("end".to_string(), "2024-03".to_string())));
    }

    #[test]
    fn unregistered_route_is_a_fatal_error() {
        let src = EiaEnergySource::with_endpoints(reqwest::Client::new(), cfg(), HashMap::new());
        let err = src.endpoint_for(&city(EnergyRoute::Monthly, "AZ")).err().unwrap();
        assert_eq!(err, FetchError::NoRoute("monthly".to_string()));
    }

    #[test]
    fn total_is_read_from_numbers_and_strings() {
        let src = EiaEnergySource::new(reqwest::Client::new(), cfg());
        let hourly = city(EnergyRoute::Hourly, "AZPS");
        let page = src
            .parse_body(&hourly, body(r#"{"response": {"total": "9600", "data": [{"period": "2024-01-05T00"}]}}"#))
            .unwrap();
        assert_eq!(page.total, Some(9600));
        // Excluded rows still advance the offset.
        assert_eq!(page.fetched, 1);
        assert!(page.rows.is_empty());

        let page = src.parse_body(&hourly, body(r#"{"response": {"total": 12, "data": []}}"#)).unwrap();
        assert_eq!(page.total, Some(12));
    }

    #[tokio::test]
    async fn hourly_demand_pages_until_total() {
        use crate::{
            config::HttpConfig,
            retry::{Pacer, RetryPolicy},
            sources::{http_client, serve_mock, RetryingSource},
        };
        use axum::{extract::Query, routing::get, Json, Router};
        use serde_json::json;
        use std::{
            sync::atomic::{AtomicU32, Ordering},
            time::Duration,
        };

        // Three days of hourly demand, served 30 rows at a time.
        let rows: Arc<Vec<Value>> = Arc::new(
            (5..=7)
                .flat_map(|d| {
                    (0..24).map(move |h| {
                        json!({"period": format!("2024-01-0{d}T{h:02}"), "respondent": "AZPS", "value": 100 + h})
                    })
                })
                .collect(),
        );
        let requests = Arc::new(AtomicU32::new(0));
        let counter = requests.clone();
        let served = rows.clone();
        let app = Router::new().route(
            "/hourly",
            get(move |Query(q): Query<HashMap<String, String>>| {
                let counter = counter.clone();
                let served = served.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let offset: usize = q["offset"].parse().unwrap();
                    let length: usize = q["length"].parse().unwrap();
                    let page: Vec<Value> = served.iter().skip(offset).take(length).cloned().collect();
                    Json(json!({"response": {"total": served.len().to_string(), "data": page}}))
                }
            }),
        );
        let addr = serve_mock(app).await;

        let cfg: EnergySourceConfig =
            toml::from_str(&format!("api_key = \"k\"\nhourly_url = \"http://{addr}/hourly\"\npage_length = 30")).unwrap();
        let client = http_client(&HttpConfig::default()).unwrap();
        let src = RetryingSource::new(
            EiaEnergySource::new(client, cfg),
            RetryPolicy::default(),
            Arc::new(Pacer::new(Duration::ZERO)),
        );
        let window = DateWindow::new(date!(2024 - 01 - 05), date!(2024 - 01 - 07)).unwrap();

        let readings = src
            .fetch::<EnergyReading>(&city(EnergyRoute::Hourly, "AZPS"), &window)
            .await
            .into_option()
            .unwrap();

        assert_eq!(requests.load(Ordering::SeqCst), 3);
        assert_eq!(readings.len(), 72);
        assert_eq!(readings.last().map(|r| (r.date, r.hour)), Some((date!(2024 - 01 - 07), Some(23))));
    }
}
