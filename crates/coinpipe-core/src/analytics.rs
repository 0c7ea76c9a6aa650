//! Read-side statistics over stored prices.

use coinpipe_warehouse::{PriceRow, SummarySnapshot, WarehouseError};
use serde::Serialize;
use thiserror::Error;

use crate::store::PriceStore;
use crate::{AssetId, SeriesPoint, TimeWindow, UtcDateTime};

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("insufficient data for '{asset_id}': {found} stored record(s), need at least 2")]
    InsufficientData { asset_id: AssetId, found: usize },
    #[error(transparent)]
    Storage(#[from] WarehouseError),
    #[error("stored row for '{asset_id}' has an unrepresentable timestamp {ts_ms}")]
    CorruptRow { asset_id: String, ts_ms: i64 },
}

/// Aggregates over one asset and window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSummary {
    pub asset_id: AssetId,
    pub window_start: UtcDateTime,
    pub window_end: UtcDateTime,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Sample standard deviation (divisor `n - 1`).
    pub stddev: f64,
    pub sample_count: usize,
    /// Coefficient of variation, `stddev / mean`; absent unless the mean is positive.
    pub volatility: Option<f64>,
}

impl AnalyticsSummary {
    fn snapshot(&self) -> SummarySnapshot {
        SummarySnapshot {
            asset_id: self.asset_id.to_string(),
            window_start_ms: self.window_start.unix_millis(),
            window_end_ms: self.window_end.unix_millis(),
            mean: self.mean,
            min: self.min,
            max: self.max,
            stddev: self.stddev,
            volatility: self.volatility,
            sample_count: self.sample_count,
        }
    }
}

/// First-to-last movement across a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Trend {
    pub first: SeriesPoint,
    pub last: SeriesPoint,
    pub change: f64,
    pub change_pct: Option<f64>,
}

impl Trend {
    fn from_series(series: &[SeriesPoint]) -> Option<Self> {
        if series.len() < 2 {
            return None;
        }
        let first = *series.first()?;
        let last = *series.last()?;
        let change = last.price - first.price;
        let change_pct = (first.price != 0.0).then(|| change / first.price * 100.0);
        Some(Self {
            first,
            last,
            change,
            change_pct,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PriceStats {
    mean: f64,
    min: f64,
    max: f64,
    stddev: f64,
}

fn price_stats(prices: &[f64]) -> Option<PriceStats> {
    if prices.len() < 2 {
        return None;
    }
    let n = prices.len() as f64;
    let mean = prices.iter().sum::<f64>() / n;
    let (min, max) = prices
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), price| {
            (min.min(*price), max.max(*price))
        });
    let squares: f64 = prices.iter().map(|price| (price - mean).powi(2)).sum();
    Some(PriceStats {
        mean,
        min,
        max,
        stddev: (squares / (n - 1.0)).sqrt(),
    })
}

/// Analytics engine. Reads only.
pub struct Analytics<'a> {
    store: &'a dyn PriceStore,
}

impl<'a> Analytics<'a> {
    pub fn new(store: &'a dyn PriceStore) -> Self {
        Self { store }
    }

    pub fn summarize(
        &self,
        asset_id: &AssetId,
        window: &TimeWindow,
    ) -> Result<AnalyticsSummary, AnalyticsError> {
        let rows = self.store.scan(asset_id, window)?;
        let prices: Vec<f64> = rows.iter().map(|row| row.price).collect();
        let stats = price_stats(&prices).ok_or_else(|| AnalyticsError::InsufficientData {
            asset_id: asset_id.clone(),
            found: prices.len(),
        })?;

        let volatility = (stats.mean > 0.0).then(|| stats.stddev / stats.mean);
        Ok(AnalyticsSummary {
            asset_id: asset_id.clone(),
            window_start: window.start(),
            window_end: window.end(),
            mean: stats.mean,
            min: stats.min,
            max: stats.max,
            stddev: stats.stddev,
            sample_count: prices.len(),
            volatility,
        })
    }

    /// Stored `(timestamp, price)` pairs, oldest first.
    pub fn price_series(
        &self,
        asset_id: &AssetId,
        window: &TimeWindow,
    ) -> Result<Vec<SeriesPoint>, AnalyticsError> {
        self.store
            .scan(asset_id, window)?
            .iter()
            .map(series_point)
            .collect()
    }

    pub fn trend(
        &self,
        asset_id: &AssetId,
        window: &TimeWindow,
    ) -> Result<Option<Trend>, AnalyticsError> {
        let series = self.price_series(asset_id, window)?;
        Ok(Trend::from_series(&series))
    }

    /// Append `summary` to the audit history.
    pub fn record_summary(
        &self,
        summary: &AnalyticsSummary,
        run_id: &str,
    ) -> Result<(), AnalyticsError> {
        self.store.record_summary(run_id, &summary.snapshot())?;
        Ok(())
    }
}

fn series_point(row: &PriceRow) -> Result<SeriesPoint, AnalyticsError> {
    let timestamp =
        UtcDateTime::from_unix_millis(row.ts_ms).map_err(|_| AnalyticsError::CorruptRow {
            asset_id: row.asset_id.clone(),
            ts_ms: row.ts_ms,
        })?;
    Ok(SeriesPoint {
        timestamp,
        price: row.price,
    })
}
