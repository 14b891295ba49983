pub mod energy;
pub mod weather;

pub use energy::{EiaEnergySource, EnergyEndpoint, HourlyDemandEndpoint, MonthlyRetailEndpoint};
pub use weather::NoaaWeatherSource;

use std::sync::Arc;

use energy_domain::{CityProfile, DateWindow};
use serde::de::DeserializeOwned;
use tracing::Instrument;

use crate::{
    config::HttpConfig,
    retry::{FetchError, Pacer, RetryOutcome, RetryPolicy},
};

/// One response page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<R> {
    pub rows: Vec<R>,
    /// Raw rows the server returned on this page, before any row was excluded.
    /// The next page starts this many rows further on.
    pub fetched: usize,
    /// Total rows the server reports for the whole query, if it reports one.
    pub total: Option<usize>,
}

impl<R> Page<R> {
    /// A page that is the whole answer.
    pub fn complete(rows: Vec<R>) -> Self {
        Self {
            fetched: rows.len(),
            rows,
            total: None,
        }
    }

    fn has_more(&self, offset: usize) -> bool {
        self.fetched > 0 && self.total.is_some_and(|total| offset < total)
    }
}

/// One remote data source, queried per city.
///
/// `fetch_page` performs exactly one request starting `offset` rows into the
/// result set; paging, retry and pacing are layered on by [`RetryingSource`].
/// Rows from every page are handed to `assemble` together, so records that
/// straddle a page boundary are built from both halves.
#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    type Row: Send;

    fn name(&self) -> &'static str;

    async fn fetch_page(
        &self,
        city: &CityProfile,
        window: &DateWindow,
        offset: usize,
    ) -> Result<Page<Self::Row>, FetchError>;

    fn assemble(&self, city: &CityProfile, rows: Vec<Self::Row>) -> Vec<T>;
}

/// Composes a [`Source`] with a retry policy and the shared request pacer.
pub struct RetryingSource<S> {
    inner: S,
    policy: RetryPolicy,
    pacer: Arc<Pacer>,
}

impl<S> RetryingSource<S> {
    pub fn new(inner: S, policy: RetryPolicy, pacer: Arc<Pacer>) -> Self {
        Self { inner, policy, pacer }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fetches every page for `city` over `window`.
    ///
    /// Each page waits on the pacer and runs its own retry sequence. A page
    /// that still fails degrades the whole fetch; rows from earlier pages are
    /// discarded rather than reported as a complete window. `attempts` counts
    /// requests across all pages.
    pub async fn fetch<T>(&self, city: &CityProfile, window: &DateWindow) -> RetryOutcome<Vec<T>>
    where
        S: Source<T>,
    {
        let source = self.inner.name();
        let span = tracing::info_span!("fetch", city = %city.name, source);

        async move {
            let mut rows: Vec<<S as Source<T>>::Row> = Vec::new();
            let mut offset = 0usize;
            let mut attempts = 0u32;
            let mut pages = 0u32;

            let outcome = loop {
                match self.fetch_page_with_retry::<T>(city, window, offset).await {
                    RetryOutcome::Success { value: page, attempts: n } => {
                        attempts += n;
                        pages += 1;
                        offset += page.fetched;
                        let more = page.has_more(offset);
                        if let Some(total) = page.total.filter(|t| offset < *t && !more) {
                            tracing::warn!(offset, total, "source returned an empty page before its reported total");
                        }
                        rows.extend(page.rows);
                        if more {
                            tracing::debug!(pages, offset, total = ?page.total, "fetching next page");
                            continue;
                        }
                        break RetryOutcome::Success {
                            value: self.inner.assemble(city, rows),
                            attempts,
                        };
                    }
                    RetryOutcome::Exhausted { attempts: n, last_error } => {
                        break RetryOutcome::Exhausted {
                            attempts: attempts + n,
                            last_error,
                        };
                    }
                    RetryOutcome::Aborted { attempts: n, error } => {
                        break RetryOutcome::Aborted {
                            attempts: attempts + n,
                            error,
                        };
                    }
                }
            };

            match &outcome {
                RetryOutcome::Success { value, attempts } => {
                    metrics::counter!("records_fetched_total", "source" => source)
                        .increment(value.len() as u64);
                    if value.is_empty() {
                        tracing::warn!(attempts, pages, "source returned no records");
                    } else {
                        tracing::info!(records = value.len(), attempts, pages, "fetched records");
                    }
                }
                _ => {
                    if pages > 0 {
                        tracing::error!(pages, offset, "page fetch failed, discarding earlier pages");
                    }
                    metrics::counter!("fetch_failures_total", "source" => source).increment(1);
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn fetch_page_with_retry<T>(
        &self,
        city: &CityProfile,
        window: &DateWindow,
        offset: usize,
    ) -> RetryOutcome<Page<<S as Source<T>>::Row>>
    where
        S: Source<T>,
    {
        let source = self.inner.name();
        let inner = &self.inner;
        let pacer = self.pacer.as_ref();

        self.policy
            .execute(|| async move {
                pacer.wait().await;
                metrics::counter!("fetch_attempts_total", "source" => source).increment(1);
                let res = inner.fetch_page(city, window, offset).await;
                if matches!(res, Err(FetchError::RateLimited)) {
                    metrics::counter!("fetch_rate_limited_total", "source" => source).increment(1);
                }
                res
            })
            .await
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = e.status() {
            FetchError::from_status(status.as_u16())
        } else if e.is_decode() || e.is_builder() {
            FetchError::Malformed(e.to_string())
        } else {
            FetchError::Connect(e.to_string())
        }
    }
}

/// Shared client for both APIs. Every request carries the configured timeout.
pub fn http_client(cfg: &HttpConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(cfg.request_timeout())
        .user_agent(concat!("energy-ingest/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Sends a request and decodes a JSON body, mapping every failure onto the
/// retry taxonomy.
pub(crate) async fn get_json<T: DeserializeOwned>(req: reqwest::RequestBuilder) -> Result<T, FetchError> {
    let response = req.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::from_status(status.as_u16()));
    }
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| FetchError::Malformed(e.to_string()))
}

/// Binds `app` to an ephemeral local port for client tests.
#[cfg(test)]
pub(crate) async fn serve_mock(app: axum::Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy_domain::EnergyRoute;
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };
    use time::macros::date;

    struct Flaky {
        calls: AtomicU32,
        fail_first: u32,
        error: FetchError,
    }

    #[async_trait::async_trait]
    impl Source<u32> for Flaky {
        type Row = u32;

        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn fetch_page(&self, _: &CityProfile, _: &DateWindow, _: usize) -> Result<Page<u32>, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                Err(self.error.clone())
            } else {
                Ok(Page::complete(vec![n]))
            }
        }

        fn assemble(&self, _: &CityProfile, rows: Vec<u32>) -> Vec<u32> {
            rows
        }
    }

    /// Serves `0..total` in pages of `page_size`, failing every request that
    /// starts at `fail_at`. Assembly sums adjacent pairs, so rows from two
    /// pages must meet before they are combined.
    struct Paged {
        total: usize,
        page_size: usize,
        fail_at: Option<usize>,
        short_at: Option<usize>,
        requests: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Source<u64> for Paged {
        type Row = u64;

        fn name(&self) -> &'static str {
            "paged"
        }

        async fn fetch_page(&self, _: &CityProfile, _: &DateWindow, offset: usize) -> Result<Page<u64>, FetchError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(offset) {
                return Err(FetchError::Server(503));
            }
            let end = if self.short_at == Some(offset) {
                offset
            } else {
                (offset + self.page_size).min(self.total)
            };
            let rows: Vec<u64> = (offset..end).map(|v| v as u64).collect();
            Ok(Page {
                fetched: rows.len(),
                rows,
                total: Some(self.total),
            })
        }

        fn assemble(&self, _: &CityProfile, rows: Vec<u64>) -> Vec<u64> {
            rows.chunks(2).map(|pair| pair.iter().sum()).collect()
        }
    }

    fn city() -> CityProfile {
        CityProfile {
            name: "Denver".to_string(),
            noaa_station_id: "GHCND:USW00003017".to_string(),
            eia_region: "PSCO".to_string(),
            latitude: 39.74,
            longitude: -104.99,
            energy_route: EnergyRoute::Hourly,
        }
    }

    fn wrap<S>(inner: S) -> RetryingSource<S> {
        RetryingSource::new(inner, RetryPolicy::default(), Arc::new(Pacer::new(Duration::from_millis(200))))
    }

    fn retrying(fail_first: u32, error: FetchError) -> RetryingSource<Flaky> {
        wrap(Flaky {
            calls: AtomicU32::new(0),
            fail_first,
            error,
        })
    }

    fn paged(total: usize, page_size: usize) -> Paged {
        Paged {
            total,
            page_size,
            fail_at: None,
            short_at: None,
            requests: AtomicU32::new(0),
        }
    }

    fn window() -> DateWindow {
        DateWindow::single(date!(2025 - 01 - 10))
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_source_recovers_from_transient_failures() {
        let src = retrying(2, FetchError::Timeout);
        let outcome = src.fetch(&city(), &window()).await;
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(outcome.into_option(), Some(vec![3]));
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_source_degrades_to_empty_on_auth_failure() {
        let src = retrying(10, FetchError::Unauthorized(401));
        let outcome = src.fetch(&city(), &window()).await;
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(src.inner().calls.load(Ordering::SeqCst), 1);
        assert!(outcome.into_value_or_default().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn follows_pages_until_reported_total() {
        let src = wrap(paged(7, 3));
        let started = tokio::time::Instant::now();

        let outcome = src.fetch(&city(), &window()).await;

        assert_eq!(src.inner().requests.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.attempts(), 3);
        // 0+1, 2+3 (across the first page boundary), 4+5, 6.
        assert_eq!(outcome.into_option(), Some(vec![1, 5, 9, 6]));
        // Every page waits on the pacer.
        assert_eq!(started.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn later_page_failure_degrades_whole_fetch() {
        let src = wrap(Paged {
            fail_at: Some(3),
            ..paged(7, 3)
        });

        let outcome = src.fetch(&city(), &window()).await;

        assert!(matches!(
            outcome,
            RetryOutcome::Exhausted {
                attempts: 6,
                last_error: FetchError::Server(503)
            }
        ));
        assert!(outcome.into_value_or_default().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_page_before_total_stops_paging() {
        let src = wrap(Paged {
            short_at: Some(3),
            ..paged(7, 3)
        });

        let outcome = src.fetch(&city(), &window()).await;

        assert_eq!(src.inner().requests.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.into_option(), Some(vec![1, 2]));
    }
}
