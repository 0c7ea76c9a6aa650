//! Quality rules applied between extraction and load.
//!
//! Records are ordered by timestamp (stable, so equal timestamps keep arrival
//! order) and classified one at a time; the first matching rule wins:
//!
//! 1. **malformed**: non-positive or non-finite price, negative or
//!    non-finite volume, or a timestamp outside the requested window;
//! 2. **outlier**: once `min_samples` records have been accepted, a price
//!    further than `outlier_threshold` standard deviations from the rolling
//!    mean of the last `rolling_window` accepted prices;
//! 3. **valid** otherwise.
//!
//! Only accepted records feed the rolling statistics.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{AssetId, PriceRecord, QualityFlag, TimeWindow, ValidationError};

/// `[validation]` table of the pipeline configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationConfig {
    pub outlier_threshold: f64,
    pub min_samples: usize,
    pub rolling_window: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            outlier_threshold: 3.0,
            min_samples: 5,
            rolling_window: 20,
        }
    }
}

impl ValidationConfig {
    pub fn check(&self) -> Result<(), ValidationError> {
        if !self.outlier_threshold.is_finite() || self.outlier_threshold <= 0.0 {
            return Err(ValidationError::InvalidSetting {
                name: "validation.outlier_threshold",
                reason: format!("must be a positive number, got {}", self.outlier_threshold),
            });
        }
        if self.min_samples == 0 {
            return Err(ValidationError::InvalidSetting {
                name: "validation.min_samples",
                reason: String::from("must be at least 1"),
            });
        }
        if self.rolling_window < self.min_samples {
            return Err(ValidationError::InvalidSetting {
                name: "validation.rolling_window",
                reason: format!(
                    "must be at least min_samples ({}), got {}",
                    self.min_samples, self.rolling_window
                ),
            });
        }
        Ok(())
    }
}

/// Trailing statistics over the most recent accepted prices.
#[derive(Debug, Clone)]
pub struct RollingStats {
    window: VecDeque<f64>,
    capacity: usize,
    accepted: usize,
}

impl RollingStats {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            accepted: 0,
        }
    }

    pub fn push(&mut self, price: f64) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(price);
        self.accepted += 1;
    }

    /// Total prices pushed, including those already evicted from the window.
    pub const fn accepted(&self) -> usize {
        self.accepted
    }

    pub fn mean(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        Some(self.window.iter().sum::<f64>() / self.window.len() as f64)
    }

    /// Sample standard deviation; zero for a single value.
    pub fn stddev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let n = self.window.len();
        if n < 2 {
            return Some(0.0);
        }
        let squares: f64 = self.window.iter().map(|price| (price - mean).powi(2)).sum();
        Some((squares / (n - 1) as f64).sqrt())
    }

    /// `true` if `price` lies more than `threshold` standard deviations from
    /// the mean. With zero spread any different price qualifies.
    pub fn is_outlier(&self, price: f64, threshold: f64) -> bool {
        match (self.mean(), self.stddev()) {
            (Some(mean), Some(stddev)) => (price - mean).abs() > threshold * stddev,
            _ => false,
        }
    }
}

/// A record that passed every quality rule.
///
/// Only [`validate`] produces these, so anything handed to the loader has
/// been checked.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRecord(PriceRecord);

impl ValidRecord {
    pub(crate) fn new(record: PriceRecord) -> Self {
        Self(record)
    }

    pub fn record(&self) -> &PriceRecord {
        &self.0
    }

    pub fn into_inner(self) -> PriceRecord {
        self.0
    }
}

/// Per-flag counts of one validation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub valid: usize,
    pub outliers: usize,
    pub malformed: usize,
}

impl Display for ValidationSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} records rejected as outliers, {} as malformed",
            self.outliers, self.total, self.malformed
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub valid: Vec<ValidRecord>,
    pub rejected: Vec<(PriceRecord, QualityFlag)>,
}

impl ValidationOutcome {
    pub fn summary(&self) -> ValidationSummary {
        let count = |flag: QualityFlag| {
            self.rejected
                .iter()
                .filter(|(_, rejected)| *rejected == flag)
                .count()
        };
        ValidationSummary {
            total: self.valid.len() + self.rejected.len(),
            valid: self.valid.len(),
            outliers: count(QualityFlag::Outlier),
            malformed: count(QualityFlag::Malformed),
        }
    }
}

/// Classify `records` against `window`.
pub fn validate(
    mut records: Vec<PriceRecord>,
    window: &TimeWindow,
    config: &ValidationConfig,
) -> ValidationOutcome {
    records.sort_by_key(|record| record.timestamp);

    let mut stats: BTreeMap<AssetId, RollingStats> = BTreeMap::new();
    let mut outcome = ValidationOutcome::default();

    for record in records {
        let rolling = stats
            .entry(record.asset_id.clone())
            .or_insert_with(|| RollingStats::new(config.rolling_window));

        if let Some(reason) = malformed_reason(&record, window) {
            tracing::debug!(
                asset_id = %record.asset_id,
                timestamp = %record.timestamp,
                reason,
                "record rejected as malformed"
            );
            outcome.rejected.push((record, QualityFlag::Malformed));
            continue;
        }

        if rolling.accepted() >= config.min_samples
            && rolling.is_outlier(record.price, config.outlier_threshold)
        {
            tracing::debug!(
                asset_id = %record.asset_id,
                timestamp = %record.timestamp,
                price = record.price,
                mean = rolling.mean().unwrap_or_default(),
                stddev = rolling.stddev().unwrap_or_default(),
                "record rejected as outlier"
            );
            outcome.rejected.push((record, QualityFlag::Outlier));
            continue;
        }

        rolling.push(record.price);
        outcome.valid.push(ValidRecord::new(record));
    }

    outcome
}

fn malformed_reason(record: &PriceRecord, window: &TimeWindow) -> Option<&'static str> {
    if !record.price.is_finite() {
        return Some("price is not finite");
    }
    if record.price <= 0.0 {
        return Some("price is not positive");
    }
    if !record.volume.is_finite() {
        return Some("volume is not finite");
    }
    if record.volume < 0.0 {
        return Some("volume is negative");
    }
    if let Some(market_cap) = record.market_cap {
        if !market_cap.is_finite() || market_cap < 0.0 {
            return Some("market cap is not a finite non-negative value");
        }
    }
    if !window.contains(record.timestamp) {
        return Some("timestamp outside requested window");
    }
    None
}
