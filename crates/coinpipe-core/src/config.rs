//! Pipeline configuration.
//!
//! Built-in defaults, overlaid by an optional TOML file; the CLI applies its
//! flags on top of the result. Every table and key is optional:
//!
//! ```toml
//! assets = ["bitcoin", "ethereum"]
//! vs_currency = "usd"
//!
//! [window]
//! days = 30
//!
//! [validation]
//! outlier_threshold = 3.0
//! min_samples = 5
//! rolling_window = 20
//!
//! [retry]
//! max_retries = 4
//!
//! [fetch]
//! page_span_days = 90
//! quota_per_minute = 10
//!
//! [store]
//! chunk_size = 500
//!
//! [chart]
//! enabled = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use coinpipe_warehouse::{resolve_coinpipe_home, QueryGuardrails, WarehouseConfig};
use serde::Deserialize;
use thiserror::Error;

use crate::adapters::FetchSettings;
use crate::loader::DEFAULT_CHUNK_SIZE;
use crate::retry::RetrySettings;
use crate::validator::ValidationConfig;
use crate::{AssetId, TimeWindow, UtcDateTime, ValidationError};

pub const DEFAULT_WINDOW_DAYS: u32 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("{0}")]
    Conflict(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub assets: Vec<String>,
    pub vs_currency: String,
    pub window: WindowSettings,
    pub validation: ValidationConfig,
    pub retry: RetrySettings,
    pub fetch: FetchSettings,
    pub store: StoreSettings,
    pub chart: ChartSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            assets: vec![String::from("bitcoin")],
            vs_currency: String::from("usd"),
            window: WindowSettings::default(),
            validation: ValidationConfig::default(),
            retry: RetrySettings::default(),
            fetch: FetchSettings::default(),
            store: StoreSettings::default(),
            chart: ChartSettings::default(),
        }
    }
}

/// Either `days` (trailing, ending at `end` or now) or explicit RFC3339 bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowSettings {
    pub days: Option<u32>,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl WindowSettings {
    /// Both bounds are truncated to whole seconds, the upstream's resolution.
    pub fn resolve(&self, now: UtcDateTime) -> Result<TimeWindow, ConfigError> {
        if self.days.is_some() && self.start.is_some() {
            return Err(ConfigError::Conflict(String::from(
                "window.days and window.start are mutually exclusive",
            )));
        }

        let end = match &self.end {
            Some(end) => UtcDateTime::parse(end)?,
            None => now,
        }
        .floor_to_second();
        let window = match &self.start {
            Some(start) => TimeWindow::new(UtcDateTime::parse(start)?.floor_to_second(), end)?,
            None => TimeWindow::trailing_days(self.days.unwrap_or(DEFAULT_WINDOW_DAYS), end)?,
        };
        Ok(window)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSettings {
    /// Defaults to `$COINPIPE_HOME/coinpipe.duckdb`.
    pub db_path: Option<PathBuf>,
    pub chunk_size: usize,
    pub query_timeout_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            query_timeout_ms: QueryGuardrails::default().query_timeout_ms,
        }
    }
}

impl StoreSettings {
    pub fn warehouse_config(&self) -> WarehouseConfig {
        match &self.db_path {
            Some(path) => WarehouseConfig::at_path(path.clone()),
            None => WarehouseConfig::default(),
        }
    }

    pub fn guardrails(&self) -> QueryGuardrails {
        QueryGuardrails {
            query_timeout_ms: self.query_timeout_ms,
            ..QueryGuardrails::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChartSettings {
    pub enabled: bool,
    /// Defaults to `$COINPIPE_HOME/charts`.
    pub output_dir: Option<PathBuf>,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: None,
        }
    }
}

impl ChartSettings {
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| resolve_coinpipe_home().join("charts"))
    }
}

impl PipelineConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Read a TOML file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parsed asset ids in configured order, duplicates removed.
    pub fn asset_ids(&self) -> Result<Vec<AssetId>, ConfigError> {
        let mut ids: Vec<AssetId> = Vec::with_capacity(self.assets.len());
        for raw in &self.assets {
            let id = AssetId::parse(raw)?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        if ids.is_empty() {
            return Err(ConfigError::Conflict(String::from(
                "at least one asset must be configured",
            )));
        }
        Ok(ids)
    }

    /// Check every setting that cannot be validated by its type alone.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validation.check()?;
        let currency = self.vs_currency.trim();
        if currency.is_empty() || !currency.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(invalid("vs_currency", "must be a non-empty alphanumeric code"));
        }
        if self.fetch.page_span_days == 0 {
            return Err(invalid("fetch.page_span_days", "must be at least 1"));
        }
        if self.fetch.request_timeout_ms == 0 {
            return Err(invalid("fetch.request_timeout_ms", "must be greater than zero"));
        }
        if !self.retry.factor.is_finite() || self.retry.factor < 1.0 {
            return Err(invalid("retry.factor", "must be a finite number >= 1.0"));
        }
        if self.store.chunk_size == 0 {
            return Err(invalid("store.chunk_size", "must be at least 1"));
        }
        if self.store.query_timeout_ms == 0 {
            return Err(invalid("store.query_timeout_ms", "must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid(ValidationError::InvalidSetting {
        name,
        reason: reason.to_owned(),
    })
}
