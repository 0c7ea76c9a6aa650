//! Behavior-driven tests for end-to-end pipeline runs.
//!
//! A fixture source stands in for the upstream API; storage is a real DuckDB
//! file in a temporary directory.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use coinpipe_core::{
    Analytics, AssetId, ChartError, ChartSink, DuckDbPriceStore, FetchError, Pipeline,
    PipelineError, PriceRecord, PriceSource, PriceStore, SeriesPoint, SvgChartSink, TimeWindow,
    UtcDateTime, ValidationConfig,
};
use coinpipe_warehouse::{
    PriceRow, QueryGuardrails, SummarySnapshot, Warehouse, WarehouseConfig, WarehouseError,
};
use tempfile::{tempdir, TempDir};

const WINDOW_START_MS: i64 = 1_704_067_200_000; // 2024-01-01T00:00:00Z
const HOUR_MS: i64 = 3_600_000;

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Default)]
struct FixtureSource {
    responses: HashMap<String, Result<Vec<PriceRecord>, FetchError>>,
}

impl FixtureSource {
    fn with(mut self, asset: &str, response: Result<Vec<PriceRecord>, FetchError>) -> Self {
        self.responses.insert(asset.to_string(), response);
        self
    }
}

impl PriceSource for FixtureSource {
    fn id(&self) -> &'static str {
        "fixture"
    }

    fn fetch<'a>(
        &'a self,
        asset_id: &'a AssetId,
        _window: TimeWindow,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PriceRecord>, FetchError>> + Send + 'a>> {
        let response = self
            .responses
            .get(asset_id.as_str())
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()));
        Box::pin(async move { response })
    }
}

/// Delegates to DuckDB but refuses every chunk after the first `allowed`.
struct FailingStore {
    inner: DuckDbPriceStore,
    allowed: usize,
    calls: AtomicUsize,
}

impl PriceStore for FailingStore {
    fn upsert_chunk(
        &self,
        run_id: &str,
        rows: &[PriceRow],
        latency_ms: u64,
    ) -> Result<usize, WarehouseError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.allowed {
            return Err(WarehouseError::QueryRejected(String::from(
                "simulated storage outage",
            )));
        }
        self.inner.upsert_chunk(run_id, rows, latency_ms)
    }

    fn scan(&self, asset_id: &AssetId, window: &TimeWindow) -> Result<Vec<PriceRow>, WarehouseError> {
        self.inner.scan(asset_id, window)
    }

    fn record_summary(
        &self,
        run_id: &str,
        snapshot: &SummarySnapshot,
    ) -> Result<(), WarehouseError> {
        self.inner.record_summary(run_id, snapshot)
    }
}

/// Chart sink whose output device is always gone.
struct BrokenChartSink;

impl ChartSink for BrokenChartSink {
    fn render(&self, _label: &str, _series: &[SeriesPoint]) -> Result<PathBuf, ChartError> {
        Err(ChartError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "chart directory is read-only",
        )))
    }
}

fn asset(id: &str) -> AssetId {
    AssetId::parse(id).expect("valid asset id")
}

fn window() -> TimeWindow {
    TimeWindow::new(
        UtcDateTime::from_unix_millis(WINDOW_START_MS).expect("start"),
        UtcDateTime::from_unix_millis(WINDOW_START_MS + 24 * HOUR_MS).expect("end"),
    )
    .expect("window")
}

fn hourly(id: &str, prices: &[f64]) -> Vec<PriceRecord> {
    prices
        .iter()
        .enumerate()
        .map(|(hour, price)| {
            PriceRecord::new(
                asset(id),
                UtcDateTime::from_unix_millis(WINDOW_START_MS + hour as i64 * HOUR_MS)
                    .expect("timestamp"),
                *price,
                1_000.0,
                "fixture",
            )
        })
        .collect()
}

fn open_store(temp: &TempDir) -> DuckDbPriceStore {
    let warehouse = Warehouse::open(WarehouseConfig::at_path(temp.path().join("prices.duckdb")))
        .expect("warehouse open");
    DuckDbPriceStore::new(warehouse, QueryGuardrails::default())
}

fn stored_prices(store: &DuckDbPriceStore, id: &str) -> Vec<(i64, f64)> {
    store
        .scan(&asset(id), &window())
        .expect("scan")
        .into_iter()
        .map(|row| (row.ts_ms, row.price))
        .collect()
}

// =============================================================================
// Pipeline: Idempotence
// =============================================================================

#[tokio::test]
async fn when_the_same_window_is_run_twice_the_store_is_unchanged() {
    // Given: A source that returns the same ten hourly prices every time
    let temp = tempdir().expect("tempdir");
    let store = open_store(&temp);
    let prices = [100.0, 101.0, 99.5, 100.2, 100.8, 99.9, 100.4, 100.1, 99.7, 100.3];
    let source = Arc::new(FixtureSource::default().with("bitcoin", Ok(hourly("bitcoin", &prices))));

    // When: The pipeline runs twice over the same asset and window
    let first = Pipeline::new(source.clone(), Arc::new(store.clone()), ValidationConfig::default())
        .run_asset(&asset("bitcoin"), window())
        .await
        .expect("first run");
    let after_first = stored_prices(&store, "bitcoin");
    let second = Pipeline::new(source, Arc::new(store.clone()), ValidationConfig::default())
        .run_asset(&asset("bitcoin"), window())
        .await
        .expect("second run");
    let after_second = stored_prices(&store, "bitcoin");

    // Then: Row count and values are identical and the summary agrees
    assert_eq!(after_first.len(), 10);
    assert_eq!(after_first, after_second);
    assert_eq!(first.summary, second.summary);
    let ingests = store.warehouse().ingest_history("bitcoin").expect("ingest log");
    assert_eq!(ingests.len(), 2, "each run logs its committed chunk");
}

// =============================================================================
// Pipeline: Validation Outcomes
// =============================================================================

#[tokio::test]
async fn when_a_spike_follows_five_steady_prices_it_is_not_stored() {
    // Given: Five prices at 100 followed by one at 1000
    let temp = tempdir().expect("tempdir");
    let store = open_store(&temp);
    let source = Arc::new(FixtureSource::default().with(
        "bitcoin",
        Ok(hourly("bitcoin", &[100.0, 100.0, 100.0, 100.0, 100.0, 1_000.0])),
    ));

    // When: The pipeline runs
    let report = Pipeline::new(source, Arc::new(store.clone()), ValidationConfig::default())
        .run_asset(&asset("bitcoin"), window())
        .await
        .expect("run");

    // Then: The spike is counted as an outlier and never reaches storage
    let validation = report.validation.expect("validation summary");
    assert_eq!(validation.outliers, 1);
    assert_eq!(stored_prices(&store, "bitcoin").len(), 5);
    assert_eq!(report.summary.expect("summary").max, 100.0);
}

#[tokio::test]
async fn when_a_spike_follows_only_four_prices_it_is_kept() {
    // Given: Four prices at 100 followed by one at 1000
    let temp = tempdir().expect("tempdir");
    let store = open_store(&temp);
    let source = Arc::new(FixtureSource::default().with(
        "bitcoin",
        Ok(hourly("bitcoin", &[100.0, 100.0, 100.0, 100.0, 1_000.0])),
    ));

    // When: The pipeline runs
    let report = Pipeline::new(source, Arc::new(store.clone()), ValidationConfig::default())
        .run_asset(&asset("bitcoin"), window())
        .await
        .expect("run");

    // Then: There is not enough history to judge it, so all five are stored
    assert_eq!(report.validation.expect("validation").outliers, 0);
    assert_eq!(stored_prices(&store, "bitcoin").len(), 5);
}

#[tokio::test]
async fn when_a_negative_price_arrives_it_is_rejected_as_malformed() {
    // Given: A batch containing a price of -5
    let temp = tempdir().expect("tempdir");
    let store = open_store(&temp);
    let source = Arc::new(
        FixtureSource::default().with("bitcoin", Ok(hourly("bitcoin", &[100.0, -5.0, 101.0]))),
    );

    // When: The pipeline runs
    let report = Pipeline::new(source, Arc::new(store.clone()), ValidationConfig::default())
        .run_asset(&asset("bitcoin"), window())
        .await
        .expect("run");

    // Then: Only the two positive prices are stored
    assert_eq!(report.validation.expect("validation").malformed, 1);
    let prices: Vec<f64> = stored_prices(&store, "bitcoin")
        .into_iter()
        .map(|(_, price)| price)
        .collect();
    assert_eq!(prices, vec![100.0, 101.0]);
}

#[tokio::test]
async fn when_a_rejected_value_reappears_the_stored_row_is_untouched() {
    // Given: A stored valid history
    let temp = tempdir().expect("tempdir");
    let store = open_store(&temp);
    let steady = [100.0, 100.0, 100.0, 100.0, 100.0, 100.0];
    let first = Arc::new(FixtureSource::default().with("bitcoin", Ok(hourly("bitcoin", &steady))));
    Pipeline::new(first, Arc::new(store.clone()), ValidationConfig::default())
        .run_asset(&asset("bitcoin"), window())
        .await
        .expect("first run");

    // When: A later fetch reports an outlier for an already stored timestamp
    let mut revised = steady;
    revised[5] = 5_000.0;
    let second =
        Arc::new(FixtureSource::default().with("bitcoin", Ok(hourly("bitcoin", &revised))));
    Pipeline::new(second, Arc::new(store.clone()), ValidationConfig::default())
        .run_asset(&asset("bitcoin"), window())
        .await
        .expect("second run");

    // Then: The stored value keeps its earlier valid price
    let stored = stored_prices(&store, "bitcoin");
    assert_eq!(stored.len(), 6);
    assert!(stored.iter().all(|(_, price)| *price == 100.0));
}

// =============================================================================
// Pipeline: Failure Handling
// =============================================================================

#[tokio::test]
async fn when_storage_fails_mid_load_committed_chunks_survive() {
    // Given: Ten valid records, one row per chunk, and a store that fails after six chunks
    let temp = tempdir().expect("tempdir");
    let inner = open_store(&temp);
    let store = Arc::new(FailingStore {
        inner: inner.clone(),
        allowed: 6,
        calls: AtomicUsize::new(0),
    });
    let prices = [100.0, 100.5, 99.5, 100.2, 99.8, 100.1, 100.3, 99.9, 100.0, 100.4];
    let source = Arc::new(FixtureSource::default().with("bitcoin", Ok(hourly("bitcoin", &prices))));

    // When: The pipeline runs
    let err = Pipeline::new(source, store.clone(), ValidationConfig::default())
        .with_chunk_size(1)
        .run_asset(&asset("bitcoin"), window())
        .await
        .expect_err("load must be interrupted");

    // Then: The error reports exactly what was and was not committed
    assert!(matches!(
        err,
        PipelineError::StorageUnavailable {
            committed: 6,
            not_committed: 4,
            ..
        }
    ));
    assert_eq!(err.exit_code(), 5);

    // And: Analytics sees the six committed records
    let summary = Analytics::new(store.as_ref())
        .summarize(&asset("bitcoin"), &window())
        .expect("summary");
    assert_eq!(summary.sample_count, 6);
}

#[tokio::test]
async fn when_one_asset_fails_later_assets_still_run() {
    // Given: An unreachable first asset and a healthy second one
    let temp = tempdir().expect("tempdir");
    let store = open_store(&temp);
    let source = Arc::new(
        FixtureSource::default()
            .with(
                "bitcoin",
                Err(FetchError::SourceUnavailable {
                    asset_id: asset("bitcoin"),
                    attempts: 5,
                    cause: String::from("upstream returned HTTP 503"),
                }),
            )
            .with("ethereum", Ok(hourly("ethereum", &[2_000.0, 2_010.0, 1_995.0]))),
    );

    // When: Both assets are run
    let report = Pipeline::new(source, Arc::new(store.clone()), ValidationConfig::default())
        .run(&[asset("bitcoin"), asset("ethereum")], window())
        .await;

    // Then: The second asset is stored and the run exits with the fetch failure code
    assert_eq!(report.assets.len(), 2);
    let failure = report.assets[0].error.as_ref().expect("bitcoin failed");
    assert_eq!(failure.exit_code, 3);
    assert!(failure.message.contains("bitcoin"));
    assert!(failure.message.contains("fetch"));
    assert!(report.assets[1].error.is_none());
    assert_eq!(stored_prices(&store, "ethereum").len(), 3);
    assert_eq!(report.exit_code, 3);
}

#[tokio::test]
async fn when_every_asset_lacks_data_the_run_reports_insufficient_data() {
    // Given: Sources that return a single point per asset
    let temp = tempdir().expect("tempdir");
    let store = open_store(&temp);
    let source = Arc::new(
        FixtureSource::default()
            .with("bitcoin", Ok(hourly("bitcoin", &[100.0])))
            .with("ethereum", Ok(hourly("ethereum", &[2_000.0]))),
    );

    // When: Both assets are run
    let report = Pipeline::new(source, Arc::new(store), ValidationConfig::default())
        .run(&[asset("bitcoin"), asset("ethereum")], window())
        .await;

    // Then: Both records are loaded but the run exits with code 6
    assert!(report
        .assets
        .iter()
        .all(|entry| entry.load.map(|load| load.committed) == Some(1)));
    assert_eq!(report.exit_code, 6);
}

#[tokio::test]
async fn when_only_some_assets_lack_data_the_run_succeeds() {
    // Given: One asset with history and one with a single point
    let temp = tempdir().expect("tempdir");
    let store = open_store(&temp);
    let source = Arc::new(
        FixtureSource::default()
            .with("bitcoin", Ok(hourly("bitcoin", &[100.0, 101.0])))
            .with("ethereum", Ok(hourly("ethereum", &[2_000.0]))),
    );

    // When: Both assets are run
    let report = Pipeline::new(source, Arc::new(store), ValidationConfig::default())
        .run(&[asset("bitcoin"), asset("ethereum")], window())
        .await;

    // Then: The run succeeds and the short asset carries its failure
    assert_eq!(report.exit_code, 0);
    assert_eq!(
        report.assets[1].error.as_ref().map(|failure| failure.kind),
        Some("insufficient_data")
    );
}

#[tokio::test]
async fn when_the_upstream_payload_is_malformed_nothing_is_stored() {
    // Given: A source that reports a malformed response
    let temp = tempdir().expect("tempdir");
    let store = open_store(&temp);
    let source = Arc::new(FixtureSource::default().with(
        "bitcoin",
        Err(FetchError::MalformedResponse {
            asset_id: asset("bitcoin"),
            cause: String::from("invalid payload"),
        }),
    ));

    // When: The pipeline runs
    let err = Pipeline::new(source, Arc::new(store.clone()), ValidationConfig::default())
        .run_asset(&asset("bitcoin"), window())
        .await
        .expect_err("malformed");

    // Then: The failure maps to exit code 4 and storage is empty
    assert_eq!(err.exit_code(), 4);
    assert!(stored_prices(&store, "bitcoin").is_empty());
}

// =============================================================================
// Pipeline: Analytics and Chart
// =============================================================================

#[tokio::test]
async fn when_a_run_completes_the_report_carries_summary_trend_and_chart() {
    // Given: Four stored prices and an SVG chart sink
    let temp = tempdir().expect("tempdir");
    let store = open_store(&temp);
    let source = Arc::new(
        FixtureSource::default().with("bitcoin", Ok(hourly("bitcoin", &[100.0, 102.0, 98.0, 101.0]))),
    );
    let charts = temp.path().join("charts");

    // When: The pipeline runs with charting enabled
    let report = Pipeline::new(source, Arc::new(store.clone()), ValidationConfig::default())
        .with_chart_sink(Arc::new(SvgChartSink::new(&charts)))
        .with_run_id("run-chart")
        .run_asset(&asset("bitcoin"), window())
        .await
        .expect("run");

    // Then: Statistics match the stored data
    let summary = report.summary.expect("summary");
    assert!((summary.mean - 100.25).abs() < 1e-6);
    assert!((summary.stddev - 1.707_825_127_659_933).abs() < 1e-6);
    assert_eq!(summary.window_start, window().start());

    // And: The trend and the chart are present
    let trend = report.trend.expect("trend");
    assert_eq!(trend.change, 1.0);
    let chart = report.chart.expect("chart path");
    assert!(chart.starts_with(&charts));
    assert!(chart.exists());

    // And: The summary snapshot was appended to the audit history
    assert_eq!(store.warehouse().summary_count("bitcoin").expect("count"), 1);
}

#[tokio::test]
async fn when_the_chart_cannot_be_written_the_run_still_succeeds() {
    // Given: Four valid prices and a chart sink that always fails
    let temp = tempdir().expect("tempdir");
    let store = open_store(&temp);
    let source = Arc::new(
        FixtureSource::default().with("bitcoin", Ok(hourly("bitcoin", &[100.0, 102.0, 98.0, 101.0]))),
    );

    // When: The pipeline runs
    let report = Pipeline::new(source, Arc::new(store.clone()), ValidationConfig::default())
        .with_chart_sink(Arc::new(BrokenChartSink))
        .with_run_id("run-broken-chart")
        .run(&[asset("bitcoin")], window())
        .await;

    // Then: The run exits cleanly and the asset carries no error
    assert_eq!(report.exit_code, 0);
    let asset_report = &report.assets[0];
    assert!(asset_report.error.is_none());
    assert!(asset_report.chart.is_none());
    assert!(asset_report.summary.is_some());

    // And: The chart failure is surfaced as a warning
    assert!(asset_report
        .warnings
        .iter()
        .any(|warning| warning.starts_with("chart skipped") && warning.contains("read-only")));

    // And: Every record was still stored
    assert_eq!(stored_prices(&store, "bitcoin").len(), 4);
}
