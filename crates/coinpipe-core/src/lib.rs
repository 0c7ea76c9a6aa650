//! # Coinpipe Core
//!
//! Batch ETL for cryptocurrency prices: fetch from CoinGecko, validate, upsert
//! into DuckDB, and summarize.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Upstream API adapters (CoinGecko) |
//! | [`analytics`] | Summary statistics, trend and chart series over stored data |
//! | [`chart`] | Chart collaborator trait and SVG sink |
//! | [`config`] | Pipeline configuration (defaults, TOML) |
//! | [`domain`] | Asset ids, timestamps, windows, price records |
//! | [`error`] | Domain input errors |
//! | [`fetcher`] | Source trait and retry loop |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`loader`] | Chunked idempotent load |
//! | [`pipeline`] | Stage orchestration and run reports |
//! | [`retry`] | Backoff policy |
//! | [`store`] | Storage seam over the warehouse |
//! | [`throttling`] | Client-side request quota |
//! | [`validator`] | Quality rules |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Fetcher    │──▶│  Validator   │──▶│    Loader    │──▶│  Analytics   │
//! │ (PriceSource)│   │ (RollingStats│   │ (PriceStore) │   │ (PriceStore) │
//! └──────┬───────┘   └──────────────┘   └──────┬───────┘   └──────┬───────┘
//!        │                                     │                  │
//!        ▼                                     ▼                  ▼
//! ┌──────────────┐                      ┌──────────────┐   ┌──────────────┐
//! │ HttpClient   │                      │  Warehouse   │   │  ChartSink   │
//! │ (reqwest)    │                      │  (DuckDB)    │   │  (SVG)       │
//! └──────────────┘                      └──────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use coinpipe_core::{
//!     AssetId, CoinGeckoSource, DuckDbPriceStore, FetchSettings, Pipeline, RetryConfig,
//!     TimeWindow, UtcDateTime, ValidationConfig,
//! };
//! use coinpipe_warehouse::{QueryGuardrails, Warehouse};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = CoinGeckoSource::from_env(&FetchSettings::default(), "usd", RetryConfig::default());
//!     let store = DuckDbPriceStore::new(Warehouse::open_default()?, QueryGuardrails::default());
//!     let pipeline = Pipeline::new(Arc::new(source), Arc::new(store), ValidationConfig::default());
//!
//!     let window = TimeWindow::trailing_days(30, UtcDateTime::now())?;
//!     let report = pipeline.run(&[AssetId::parse("bitcoin")?], window).await;
//!     println!("exit code {}", report.exit_code);
//!     Ok(())
//! }
//! ```
//!
//! ## Errors
//!
//! Each stage has its own error enum; [`PipelineError`] folds them into the
//! four classes a run reports, each with a distinct exit code.

pub mod adapters;
pub mod analytics;
pub mod chart;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod http_client;
pub mod loader;
pub mod pipeline;
pub mod retry;
pub mod store;
pub mod throttling;
pub mod validator;

pub use adapters::{CoinGeckoSource, FetchSettings};

pub use analytics::{Analytics, AnalyticsError, AnalyticsSummary, Trend};

pub use chart::{ChartError, ChartSink, SvgChartSink};

pub use config::{ChartSettings, ConfigError, PipelineConfig, StoreSettings, WindowSettings};

pub use domain::{AssetId, PriceRecord, QualityFlag, SeriesPoint, TimeWindow, UtcDateTime};

pub use error::ValidationError;

pub use fetcher::{FetchError, PriceSource};

pub use http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};

pub use loader::{LoadError, LoadReport, Loader};

pub use pipeline::{AssetReport, FailureReport, Pipeline, PipelineError, RunReport, Stage};

pub use retry::{Backoff, RetryConfig, RetrySettings};

pub use store::{DuckDbPriceStore, PriceStore};

pub use throttling::RequestThrottle;

pub use validator::{
    validate, RollingStats, ValidRecord, ValidationConfig, ValidationOutcome, ValidationSummary,
};
