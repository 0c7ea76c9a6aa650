//! # Coinpipe Warehouse
//!
//! DuckDB-backed storage for the coinpipe price pipeline.
//!
//! ## Overview
//!
//! The warehouse owns the durable record set. It exposes exactly what the
//! pipeline needs from a relational store:
//!
//! - **Upsert by key**: rows are keyed by `(asset_id, ts)`; re-writing a key
//!   replaces price, volume, market cap and source instead of adding a row
//! - **Range scan**: ordered reads of one asset over a closed time window
//! - **Audit tables**: per-chunk ingest log and summary snapshots
//!
//! Every write batch runs inside a single transaction and is rolled back if
//! it outlives the configured timeout. All values are bound as query
//! parameters.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use coinpipe_warehouse::{PriceRow, QueryGuardrails, Warehouse, WarehouseConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open(WarehouseConfig::at_path("prices.duckdb"))?;
//!
//!     let rows = vec![PriceRow {
//!         asset_id: "bitcoin".to_string(),
//!         ts_ms: 1_704_067_200_000,
//!         price: 42_000.0,
//!         volume: 1.5e10,
//!         market_cap: Some(8.2e11),
//!         source: "coingecko".to_string(),
//!     }];
//!     warehouse.upsert_prices("run-0001", &rows, 12, QueryGuardrails::default())?;
//!
//!     let stored = warehouse.scan_prices(
//!         "bitcoin",
//!         1_704_000_000_000,
//!         1_705_000_000_000,
//!         QueryGuardrails::default(),
//!     )?;
//!     println!("{} rows", stored.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `price_history` | One row per `(asset_id, ts)` |
//! | `ingest_log` | One row per committed chunk and asset |
//! | `summary_history` | Append-only analytics snapshots |
//! | `schema_migrations` | Applied migration versions |

pub mod connection;
pub mod migrations;

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ::duckdb::ToSql;
use thiserror::Error;

pub use connection::{ConnectionManager, StoreConnection};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error while preparing the store location.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Request was rejected before touching the store.
    #[error("query rejected: {0}")]
    QueryRejected(String),

    /// Query execution exceeded its time budget.
    #[error("query timed out after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },
}

/// Location of the store file.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::at_path(resolve_coinpipe_home().join("coinpipe.duckdb"))
    }
}

impl WarehouseConfig {
    /// Use an explicit database file; missing parent directories are created on open.
    pub fn at_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }
}

/// Limits applied to scans and write batches.
#[derive(Debug, Clone, Copy)]
pub struct QueryGuardrails {
    /// Maximum number of rows a scan may return.
    pub max_rows: usize,
    /// Budget for one scan or one write transaction, in milliseconds.
    pub query_timeout_ms: u64,
}

impl Default for QueryGuardrails {
    fn default() -> Self {
        Self {
            max_rows: 100_000,
            query_timeout_ms: 5_000,
        }
    }
}

impl QueryGuardrails {
    fn timeout(self) -> Duration {
        Duration::from_millis(self.query_timeout_ms.max(1))
    }

    fn validate(self) -> Result<(), WarehouseError> {
        if self.max_rows == 0 {
            return Err(WarehouseError::QueryRejected(String::from(
                "max_rows must be greater than zero",
            )));
        }
        if self.query_timeout_ms == 0 {
            return Err(WarehouseError::QueryRejected(String::from(
                "query_timeout_ms must be greater than zero",
            )));
        }
        Ok(())
    }
}

/// One stored price observation.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRow {
    pub asset_id: String,
    /// Milliseconds since the Unix epoch, UTC.
    pub ts_ms: i64,
    pub price: f64,
    pub volume: f64,
    pub market_cap: Option<f64>,
    pub source: String,
}

/// Analytics snapshot appended to `summary_history`.
#[derive(Debug, Clone, PartialEq)]
pub struct SummarySnapshot {
    pub asset_id: String,
    pub window_start_ms: i64,
    pub window_end_ms: i64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
    pub volatility: Option<f64>,
    pub sample_count: usize,
}

/// One `ingest_log` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestLogEntry {
    pub run_id: String,
    pub asset_id: String,
    pub source: String,
    pub row_count: i64,
    pub status: String,
}

/// The price store.
#[derive(Clone)]
pub struct Warehouse {
    manager: ConnectionManager,
}

impl Warehouse {
    /// Open the store at the default location (`$COINPIPE_HOME/coinpipe.duckdb`).
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open (and migrate) the store described by `config`.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = ConnectionManager::open(config.db_path)?;
        let warehouse = Self { manager };
        warehouse.initialize()?;
        tracing::debug!(path = %warehouse.db_path().display(), "price store opened");
        Ok(warehouse)
    }

    /// Apply pending schema migrations.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    /// Upsert a batch of rows inside one transaction.
    ///
    /// Rows sharing an `(asset_id, ts)` key with a stored row replace its
    /// price, volume, market cap and source. One `ingest_log` row is written
    /// per asset in the batch. Either the whole batch commits or none of it
    /// does; a batch that runs past `guardrails.query_timeout_ms` is rolled
    /// back with [`WarehouseError::QueryTimeout`].
    ///
    /// Returns the number of rows written.
    pub fn upsert_prices(
        &self,
        run_id: &str,
        rows: &[PriceRow],
        latency_ms: u64,
        guardrails: QueryGuardrails,
    ) -> Result<usize, WarehouseError> {
        guardrails.validate()?;
        if rows.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let timeout = guardrails.timeout();
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            let mut per_asset: BTreeMap<(&str, &str), i64> = BTreeMap::new();
            for row in rows {
                ensure_timeout(started, timeout)?;
                let params: [&dyn ToSql; 6] = [
                    &row.asset_id,
                    &row.ts_ms,
                    &row.price,
                    &row.volume,
                    &row.market_cap,
                    &row.source,
                ];
                connection.execute(
                    "INSERT INTO price_history \
                     (asset_id, ts, price, volume, market_cap, source, updated_at) \
                     VALUES (?, epoch_ms(CAST(? AS BIGINT)), ?, ?, ?, ?, CURRENT_TIMESTAMP) \
                     ON CONFLICT (asset_id, ts) DO UPDATE SET \
                     price = excluded.price, \
                     volume = excluded.volume, \
                     market_cap = excluded.market_cap, \
                     source = excluded.source, \
                     updated_at = CURRENT_TIMESTAMP",
                    params.as_slice(),
                )?;
                *per_asset
                    .entry((row.asset_id.as_str(), row.source.as_str()))
                    .or_default() += 1;
            }

            let latency_ms = i64::try_from(latency_ms).unwrap_or(i64::MAX);
            for ((asset_id, source), row_count) in per_asset {
                let params: [&dyn ToSql; 5] =
                    [&run_id, &asset_id, &source, &row_count, &latency_ms];
                connection.execute(
                    "INSERT INTO ingest_log \
                     (run_id, asset_id, source, row_count, status, latency_ms, logged_at) \
                     VALUES (?, ?, ?, ?, 'committed', ?, CURRENT_TIMESTAMP)",
                    params.as_slice(),
                )?;
            }

            ensure_timeout(started, timeout)?;
            Ok(rows.len())
        })();

        finalize_transaction(&connection, result)
    }

    /// Ordered rows for one asset with `start_ms <= ts <= end_ms`.
    pub fn scan_prices(
        &self,
        asset_id: &str,
        start_ms: i64,
        end_ms: i64,
        guardrails: QueryGuardrails,
    ) -> Result<Vec<PriceRow>, WarehouseError> {
        guardrails.validate()?;
        if start_ms > end_ms {
            return Err(WarehouseError::QueryRejected(format!(
                "window start {start_ms} is after window end {end_ms}"
            )));
        }

        let started = Instant::now();
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(
            "SELECT asset_id, epoch_ms(ts), price, volume, market_cap, source \
             FROM price_history \
             WHERE asset_id = ? \
               AND ts BETWEEN epoch_ms(CAST(? AS BIGINT)) AND epoch_ms(CAST(? AS BIGINT)) \
             ORDER BY ts ASC",
        )?;
        let params: [&dyn ToSql; 3] = [&asset_id, &start_ms, &end_ms];
        let mut cursor = statement.query(params.as_slice())?;

        let mut rows = Vec::new();
        while let Some(row) = cursor.next()? {
            ensure_timeout(started, guardrails.timeout())?;
            if rows.len() >= guardrails.max_rows {
                return Err(WarehouseError::QueryRejected(format!(
                    "scan of '{asset_id}' exceeds max_rows={}",
                    guardrails.max_rows
                )));
            }
            rows.push(PriceRow {
                asset_id: row.get(0)?,
                ts_ms: row.get(1)?,
                price: row.get(2)?,
                volume: row.get(3)?,
                market_cap: row.get(4)?,
                source: row.get(5)?,
            });
        }
        ensure_timeout(started, guardrails.timeout())?;

        Ok(rows)
    }

    /// Number of stored rows for one asset inside the window.
    pub fn count_prices(
        &self,
        asset_id: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 3] = [&asset_id, &start_ms, &end_ms];
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM price_history \
             WHERE asset_id = ? \
               AND ts BETWEEN epoch_ms(CAST(? AS BIGINT)) AND epoch_ms(CAST(? AS BIGINT))",
            params.as_slice(),
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Append an analytics snapshot; rolled back if it outlives the timeout.
    pub fn record_summary(
        &self,
        run_id: &str,
        snapshot: &SummarySnapshot,
        guardrails: QueryGuardrails,
    ) -> Result<(), WarehouseError> {
        guardrails.validate()?;
        let started = Instant::now();
        let connection = self.manager.acquire()?;
        let sample_count = i64::try_from(snapshot.sample_count).unwrap_or(i64::MAX);
        let params: [&dyn ToSql; 10] = [
            &run_id,
            &snapshot.asset_id,
            &snapshot.window_start_ms,
            &snapshot.window_end_ms,
            &snapshot.mean,
            &snapshot.min,
            &snapshot.max,
            &snapshot.stddev,
            &snapshot.volatility,
            &sample_count,
        ];
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = connection
            .execute(
                "INSERT INTO summary_history \
                 (run_id, asset_id, window_start, window_end, mean_price, min_price, max_price, \
                  stddev, volatility, sample_count, computed_at) \
                 VALUES (?, ?, epoch_ms(CAST(? AS BIGINT)), epoch_ms(CAST(? AS BIGINT)), \
                         ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
                params.as_slice(),
            )
            .map_err(WarehouseError::from)
            .and_then(|_| ensure_timeout(started, guardrails.timeout()));
        finalize_transaction(&connection, result)
    }

    /// Number of snapshots recorded for an asset.
    pub fn summary_count(&self, asset_id: &str) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM summary_history WHERE asset_id = ?",
            [asset_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Ingest log rows for an asset, oldest first.
    pub fn ingest_history(&self, asset_id: &str) -> Result<Vec<IngestLogEntry>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(
            "SELECT run_id, asset_id, source, row_count, status \
             FROM ingest_log WHERE asset_id = ? ORDER BY logged_at ASC, run_id ASC",
        )?;
        let entries = statement
            .query_map([asset_id], |row| {
                Ok(IngestLogEntry {
                    run_id: row.get(0)?,
                    asset_id: row.get(1)?,
                    source: row.get(2)?,
                    row_count: row.get(3)?,
                    status: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

/// Commit on success, roll back on failure.
fn finalize_transaction<T>(
    connection: &::duckdb::Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback) = connection.execute_batch("ROLLBACK") {
                tracing::warn!(error = %rollback, "rollback after failed batch also failed");
            }
            Err(error)
        }
    }
}

fn ensure_timeout(started: Instant, timeout: Duration) -> Result<(), WarehouseError> {
    if started.elapsed() > timeout {
        return Err(WarehouseError::QueryTimeout {
            timeout_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
        });
    }
    Ok(())
}

/// `$COINPIPE_HOME`, else `$HOME/.coinpipe`, else `./.coinpipe`.
pub fn resolve_coinpipe_home() -> PathBuf {
    if let Some(path) = env::var_os("COINPIPE_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".coinpipe");
    }

    PathBuf::from(".coinpipe")
}
