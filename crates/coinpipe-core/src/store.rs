use coinpipe_warehouse::{PriceRow, QueryGuardrails, SummarySnapshot, Warehouse, WarehouseError};

use crate::{AssetId, TimeWindow};

/// Storage operations the loader and analytics engine rely on.
pub trait PriceStore: Send + Sync {
    /// Upsert one chunk atomically within the store's timeout; returns rows written.
    fn upsert_chunk(
        &self,
        run_id: &str,
        rows: &[PriceRow],
        latency_ms: u64,
    ) -> Result<usize, WarehouseError>;

    /// Stored rows for `asset_id` inside `window`, oldest first.
    fn scan(&self, asset_id: &AssetId, window: &TimeWindow) -> Result<Vec<PriceRow>, WarehouseError>;

    fn record_summary(&self, run_id: &str, snapshot: &SummarySnapshot)
        -> Result<(), WarehouseError>;
}

/// [`PriceStore`] over the DuckDB warehouse.
#[derive(Clone)]
pub struct DuckDbPriceStore {
    warehouse: Warehouse,
    guardrails: QueryGuardrails,
}

impl DuckDbPriceStore {
    pub fn new(warehouse: Warehouse, guardrails: QueryGuardrails) -> Self {
        Self {
            warehouse,
            guardrails,
        }
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }
}

impl PriceStore for DuckDbPriceStore {
    fn upsert_chunk(
        &self,
        run_id: &str,
        rows: &[PriceRow],
        latency_ms: u64,
    ) -> Result<usize, WarehouseError> {
        self.warehouse
            .upsert_prices(run_id, rows, latency_ms, self.guardrails)
    }

    fn scan(&self, asset_id: &AssetId, window: &TimeWindow) -> Result<Vec<PriceRow>, WarehouseError> {
        self.warehouse.scan_prices(
            asset_id.as_str(),
            window.start().unix_millis(),
            window.end().unix_millis(),
            self.guardrails,
        )
    }

    fn record_summary(
        &self,
        run_id: &str,
        snapshot: &SummarySnapshot,
    ) -> Result<(), WarehouseError> {
        self.warehouse
            .record_summary(run_id, snapshot, self.guardrails)
    }
}
