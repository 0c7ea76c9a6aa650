use std::collections::HashMap;

use coinpipe_warehouse::{PriceRow, WarehouseError};
use serde::Serialize;
use thiserror::Error;

use crate::store::PriceStore;
use crate::validator::ValidRecord;

pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Row accounting for one load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub committed: usize,
    pub not_committed: usize,
    pub chunks: usize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    /// A chunk failed; chunks committed before it remain stored.
    #[error(
        "load interrupted after {} committed row(s), {} not committed: {cause}",
        .report.committed,
        .report.not_committed
    )]
    Interrupted {
        report: LoadReport,
        #[source]
        cause: WarehouseError,
    },
}

impl LoadError {
    pub const fn report(&self) -> LoadReport {
        match self {
            Self::Interrupted { report, .. } => *report,
        }
    }
}

/// Chunked, idempotent writer of validated records.
pub struct Loader<'a> {
    store: &'a dyn PriceStore,
    run_id: &'a str,
    chunk_size: usize,
    fetch_latency_ms: u64,
}

impl<'a> Loader<'a> {
    pub fn new(store: &'a dyn PriceStore, run_id: &'a str) -> Self {
        Self {
            store,
            run_id,
            chunk_size: DEFAULT_CHUNK_SIZE,
            fetch_latency_ms: 0,
        }
    }

    /// Rows per transaction. Zero is treated as one.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Upstream latency recorded in `ingest_log`.
    pub fn with_fetch_latency_ms(mut self, latency_ms: u64) -> Self {
        self.fetch_latency_ms = latency_ms;
        self
    }

    /// Upsert `records` keyed by `(asset_id, timestamp)`.
    ///
    /// A repeated key within the batch keeps its last occurrence. Chunks are
    /// written in order, each in its own transaction; the first failing chunk
    /// stops the load and everything from it onwards is reported as not
    /// committed.
    pub fn load(&self, records: &[ValidRecord]) -> Result<LoadReport, LoadError> {
        let rows = dedup_rows(records);
        let total = rows.len();
        let mut report = LoadReport::default();

        for chunk in rows.chunks(self.chunk_size) {
            match self
                .store
                .upsert_chunk(self.run_id, chunk, self.fetch_latency_ms)
            {
                Ok(written) => {
                    report.committed += written;
                    report.chunks += 1;
                    tracing::debug!(
                        run_id = self.run_id,
                        rows = written,
                        committed = report.committed,
                        total,
                        "chunk committed"
                    );
                }
                Err(cause) => {
                    report.not_committed = total.saturating_sub(report.committed);
                    tracing::error!(
                        run_id = self.run_id,
                        committed = report.committed,
                        not_committed = report.not_committed,
                        error = %cause,
                        "chunk failed, load interrupted"
                    );
                    return Err(LoadError::Interrupted { report, cause });
                }
            }
        }

        Ok(report)
    }
}

fn dedup_rows(records: &[ValidRecord]) -> Vec<PriceRow> {
    let mut index: HashMap<(&str, i64), usize> = HashMap::with_capacity(records.len());
    let mut rows: Vec<PriceRow> = Vec::with_capacity(records.len());

    for valid in records {
        let record = valid.record();
        let ts_ms = record.timestamp.unix_millis();
        let row = PriceRow {
            asset_id: record.asset_id.to_string(),
            ts_ms,
            price: record.price,
            volume: record.volume,
            market_cap: record.market_cap,
            source: record.source.clone(),
        };
        match index.get(&(record.asset_id.as_str(), ts_ms)) {
            Some(&position) => rows[position] = row,
            None => {
                index.insert((record.asset_id.as_str(), ts_ms), rows.len());
                rows.push(row);
            }
        }
    }

    rows
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use coinpipe_warehouse::SummarySnapshot;

    use super::*;
    use crate::validator::{validate, ValidationConfig};
    use crate::{AssetId, PriceRecord, TimeWindow, UtcDateTime};

    #[derive(Default)]
    struct RecordingStore {
        chunks: Mutex<Vec<Vec<PriceRow>>>,
        fail_on_chunk: Option<usize>,
    }

    impl PriceStore for RecordingStore {
        fn upsert_chunk(
            &self,
            _run_id: &str,
            rows: &[PriceRow],
            _latency_ms: u64,
        ) -> Result<usize, WarehouseError> {
            let mut chunks = self.chunks.lock().expect("chunks lock");
            if self.fail_on_chunk == Some(chunks.len()) {
                return Err(WarehouseError::QueryRejected(String::from("disk full")));
            }
            chunks.push(rows.to_vec());
            Ok(rows.len())
        }

        fn scan(
            &self,
            _asset_id: &AssetId,
            _window: &TimeWindow,
        ) -> Result<Vec<PriceRow>, WarehouseError> {
            Ok(Vec::new())
        }

        fn record_summary(
            &self,
            _run_id: &str,
            _snapshot: &SummarySnapshot,
        ) -> Result<(), WarehouseError> {
            Ok(())
        }
    }

    fn valid_records(prices: &[(i64, f64)]) -> Vec<ValidRecord> {
        let asset = AssetId::parse("bitcoin").expect("asset");
        let records = prices
            .iter()
            .map(|(second, price)| {
                PriceRecord::new(
                    asset.clone(),
                    UtcDateTime::from_unix_millis(1_704_067_200_000 + second * 1_000)
                        .expect("ts"),
                    *price,
                    1.0,
                    "test",
                )
            })
            .collect();
        let window = TimeWindow::trailing_days(
            1,
            UtcDateTime::from_unix_millis(1_704_153_600_000).expect("ts"),
        )
        .expect("window");
        let outcome = validate(records, &window, &ValidationConfig::default());
        assert!(outcome.rejected.is_empty());
        outcome.valid
    }

    #[test]
    fn writes_in_chunks() {
        let store = RecordingStore::default();
        let records = valid_records(&[(0, 1.0), (1, 1.0), (2, 1.0), (3, 1.0), (4, 1.0)]);

        let report = Loader::new(&store, "run-1")
            .with_chunk_size(2)
            .load(&records)
            .expect("load succeeds");

        assert_eq!(
            report,
            LoadReport {
                committed: 5,
                not_committed: 0,
                chunks: 3
            }
        );
        let sizes: Vec<usize> = store
            .chunks
            .lock()
            .expect("chunks lock")
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn repeated_key_keeps_last_value() {
        let store = RecordingStore::default();
        let records = valid_records(&[(0, 1.0), (1, 2.0), (0, 1.5)]);

        let report = Loader::new(&store, "run-1").load(&records).expect("load");

        assert_eq!(report.committed, 2);
        let chunks = store.chunks.lock().expect("chunks lock");
        assert_eq!(chunks[0][0].price, 1.5);
        assert_eq!(chunks[0][1].price, 2.0);
    }

    #[test]
    fn failing_chunk_reports_uncommitted_rows() {
        let store = RecordingStore {
            fail_on_chunk: Some(2),
            ..RecordingStore::default()
        };
        let records = valid_records(&[(0, 1.0), (1, 1.0), (2, 1.0), (3, 1.0), (4, 1.0)]);

        let err = Loader::new(&store, "run-1")
            .with_chunk_size(2)
            .load(&records)
            .expect_err("third chunk fails");

        assert_eq!(
            err.report(),
            LoadReport {
                committed: 4,
                not_committed: 1,
                chunks: 2
            }
        );
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let store = RecordingStore::default();
        let report = Loader::new(&store, "run-1").load(&[]).expect("load");
        assert_eq!(report, LoadReport::default());
        assert!(store.chunks.lock().expect("chunks lock").is_empty());
    }
}
