use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{AssetId, UtcDateTime};

/// One price observation as delivered by a source.
///
/// Construction performs no quality checks: a record with a negative price
/// is representable so that the validator can classify it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub asset_id: AssetId,
    pub timestamp: UtcDateTime,
    pub price: f64,
    pub volume: f64,
    /// Market capitalisation at `timestamp`, when the source reports one.
    #[serde(default)]
    pub market_cap: Option<f64>,
    pub source: String,
}

impl PriceRecord {
    pub fn new(
        asset_id: AssetId,
        timestamp: UtcDateTime,
        price: f64,
        volume: f64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            asset_id,
            timestamp,
            price,
            volume,
            market_cap: None,
            source: source.into(),
        }
    }

    pub fn with_market_cap(mut self, market_cap: Option<f64>) -> Self {
        self.market_cap = market_cap;
        self
    }
}

/// Transient classification attached during validation; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    Valid,
    Outlier,
    Malformed,
}

impl QualityFlag {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Outlier => "outlier",
            Self::Malformed => "malformed",
        }
    }
}

impl Display for QualityFlag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chart series element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub timestamp: UtcDateTime,
    pub price: f64,
}
