use thiserror::Error;

/// Validation errors for domain inputs (ids, timestamps, windows).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("asset id cannot be empty")]
    EmptyAssetId,
    #[error("asset id length {len} exceeds max {max}")]
    AssetIdTooLong { len: usize, max: usize },
    #[error("asset id contains invalid character '{ch}' at index {index}")]
    AssetIdInvalidChar { ch: char, index: usize },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("epoch milliseconds out of range: {value}")]
    TimestampOutOfRange { value: i64 },

    #[error("window start {start} is after window end {end}")]
    InvertedWindow { start: String, end: String },
    #[error("window length must be at least one day, got {days}")]
    EmptyWindow { days: u32 },

    #[error("invalid setting '{name}': {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}
