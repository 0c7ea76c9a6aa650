//! # Domain Models
//!
//! Canonical types shared by every pipeline stage.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`AssetId`] | Validated, lowercase upstream coin id |
//! | [`UtcDateTime`] | UTC timestamp with millisecond conversions |
//! | [`TimeWindow`] | Closed `[start, end]` window, pageable |
//! | [`PriceRecord`] | One observation `{asset, timestamp, price, volume, source}` |
//! | [`QualityFlag`] | Validation outcome (`valid`, `outlier`, `malformed`) |
//! | [`SeriesPoint`] | `(timestamp, price)` pair for charting |
//!
//! `AssetId`, `UtcDateTime` and `TimeWindow` reject invalid input at
//! construction. `PriceRecord` deliberately does not: quality decisions belong
//! to the validator.

mod asset;
mod price;
mod timestamp;
mod window;

pub use asset::AssetId;
pub use price::{PriceRecord, QualityFlag, SeriesPoint};
pub use timestamp::UtcDateTime;
pub use window::TimeWindow;
