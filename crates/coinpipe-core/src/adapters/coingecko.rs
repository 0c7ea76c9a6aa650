use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use time::Duration;

use crate::fetcher::{execute_with_retry, FetchError, PriceSource};
use crate::http_client::{HttpClient, HttpRequest, ReqwestHttpClient};
use crate::retry::RetryConfig;
use crate::throttling::RequestThrottle;
use crate::{AssetId, PriceRecord, TimeWindow, UtcDateTime};

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";
pub const API_KEY_ENV: &str = "COINGECKO_API_KEY";
const API_KEY_HEADER: &str = "x-cg-demo-api-key";
const SOURCE_ID: &str = "coingecko";

/// `[fetch]` table of the pipeline configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchSettings {
    pub base_url: String,
    /// Longest window requested in one call. 90 days keeps hourly granularity.
    pub page_span_days: u32,
    pub request_timeout_ms: u64,
    /// Zero disables client-side throttling.
    pub quota_per_minute: u32,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            base_url: String::from(DEFAULT_BASE_URL),
            page_span_days: 90,
            request_timeout_ms: 10_000,
            quota_per_minute: 10,
        }
    }
}

/// CoinGecko `market_chart/range` source.
#[derive(Clone)]
pub struct CoinGeckoSource {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    vs_currency: String,
    page_span: Duration,
    request_timeout_ms: u64,
    api_key: Option<String>,
    retry: RetryConfig,
    throttle: RequestThrottle,
}

impl CoinGeckoSource {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        settings: &FetchSettings,
        vs_currency: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            http_client,
            base_url: settings.base_url.trim_end_matches('/').to_owned(),
            vs_currency: vs_currency.into().to_ascii_lowercase(),
            page_span: Duration::days(i64::from(settings.page_span_days)),
            request_timeout_ms: settings.request_timeout_ms,
            api_key: None,
            retry,
            throttle: RequestThrottle::per_minute(settings.quota_per_minute),
        }
    }

    /// Source over the real network, reading the demo key from `COINGECKO_API_KEY`.
    pub fn from_env(settings: &FetchSettings, vs_currency: &str, retry: RetryConfig) -> Self {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty());
        Self::new(
            Arc::new(ReqwestHttpClient::new()),
            settings,
            vs_currency,
            retry,
        )
        .with_api_key(api_key)
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    fn page_request(&self, asset_id: &AssetId, page: &TimeWindow) -> HttpRequest {
        let url = format!(
            "{}/coins/{}/market_chart/range",
            self.base_url,
            urlencoding::encode(asset_id.as_str())
        );
        let mut request = HttpRequest::get(url)
            .with_query("vs_currency", &self.vs_currency)
            .with_query("from", page.start().unix_seconds().to_string())
            .with_query("to", page.end().unix_seconds().to_string())
            .with_timeout_ms(self.request_timeout_ms);
        if let Some(key) = &self.api_key {
            request = request.with_header(API_KEY_HEADER, key.as_str());
        }
        request
    }

    async fn fetch_window(
        &self,
        asset_id: &AssetId,
        window: TimeWindow,
    ) -> Result<Vec<PriceRecord>, FetchError> {
        let started = Instant::now();
        let pages = window.pages(self.page_span);
        let mut seen = HashSet::new();
        let mut records = Vec::new();

        for (index, page) in pages.iter().enumerate() {
            let request = self.page_request(asset_id, page);
            let response = execute_with_retry(
                self.http_client.as_ref(),
                &request,
                &self.retry,
                &self.throttle,
                asset_id,
            )
            .await?;

            let points = parse_market_chart(asset_id, &response.body)?;
            let received = points.len();
            for point in points {
                if !seen.insert(point.ts_ms) {
                    continue;
                }
                let timestamp = UtcDateTime::from_unix_millis(point.ts_ms)
                    .map_err(|error| FetchError::malformed(asset_id, error.to_string()))?;
                records.push(
                    PriceRecord::new(
                        asset_id.clone(),
                        timestamp,
                        point.price,
                        point.volume,
                        self.id(),
                    )
                    .with_market_cap(point.market_cap),
                );
            }

            tracing::debug!(
                asset_id = %asset_id,
                page = index + 1,
                pages = pages.len(),
                received,
                "fetched page"
            );
        }

        tracing::info!(
            asset_id = %asset_id,
            records = records.len(),
            pages = pages.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "fetch complete"
        );
        Ok(records)
    }
}

impl PriceSource for CoinGeckoSource {
    fn id(&self) -> &'static str {
        SOURCE_ID
    }

    fn fetch<'a>(
        &'a self,
        asset_id: &'a AssetId,
        window: TimeWindow,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PriceRecord>, FetchError>> + Send + 'a>> {
        Box::pin(self.fetch_window(asset_id, window))
    }
}

#[derive(Debug, Deserialize)]
struct MarketChartPayload {
    prices: Vec<[f64; 2]>,
    #[serde(default)]
    market_caps: Vec<[f64; 2]>,
    total_volumes: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ChartPoint {
    ts_ms: i64,
    price: f64,
    volume: f64,
    market_cap: Option<f64>,
}

/// Parse a `market_chart/range` body into points in upstream order.
///
/// Every price needs a volume at the same timestamp; market caps are joined
/// when present.
fn parse_market_chart(asset_id: &AssetId, body: &str) -> Result<Vec<ChartPoint>, FetchError> {
    let payload: MarketChartPayload = serde_json::from_str(body)
        .map_err(|error| FetchError::malformed(asset_id, format!("invalid payload: {error}")))?;

    let volumes = series_by_millis(asset_id, &payload.total_volumes)?;
    let market_caps = series_by_millis(asset_id, &payload.market_caps)?;

    payload
        .prices
        .iter()
        .map(|[ts, price]| {
            let ts_ms = epoch_millis(asset_id, *ts)?;
            let volume = volumes.get(&ts_ms).copied().ok_or_else(|| {
                FetchError::malformed(asset_id, format!("no volume reported for timestamp {ts_ms}"))
            })?;
            Ok(ChartPoint {
                ts_ms,
                price: *price,
                volume,
                market_cap: market_caps.get(&ts_ms).copied(),
            })
        })
        .collect()
}

/// First value per timestamp.
fn series_by_millis(
    asset_id: &AssetId,
    series: &[[f64; 2]],
) -> Result<HashMap<i64, f64>, FetchError> {
    let mut values = HashMap::with_capacity(series.len());
    for [ts, value] in series {
        values.entry(epoch_millis(asset_id, *ts)?).or_insert(*value);
    }
    Ok(values)
}

fn epoch_millis(asset_id: &AssetId, value: f64) -> Result<i64, FetchError> {
    // Beyond 2^53 an f64 no longer holds every integer millisecond.
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if !value.is_finite() || value.fract() != 0.0 || value.abs() > MAX_EXACT {
        return Err(FetchError::malformed(
            asset_id,
            format!("timestamp {value} is not an integer epoch millisecond"),
        ));
    }
    Ok(value as i64)
}
