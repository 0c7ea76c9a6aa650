//! Fetch → validate → load → analyze, once per asset.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::analytics::{Analytics, AnalyticsError, AnalyticsSummary, Trend};
use crate::chart::ChartSink;
use crate::fetcher::{FetchError, PriceSource};
use crate::loader::{LoadError, LoadReport, Loader, DEFAULT_CHUNK_SIZE};
use crate::store::PriceStore;
use crate::validator::{validate, ValidationConfig, ValidationSummary};
use crate::{AssetId, TimeWindow, UtcDateTime};

pub const EXIT_SOURCE_UNAVAILABLE: u8 = 3;
pub const EXIT_MALFORMED_RESPONSE: u8 = 4;
pub const EXIT_STORAGE_UNAVAILABLE: u8 = 5;
pub const EXIT_INSUFFICIENT_DATA: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Validate,
    Load,
    Analyze,
    Chart,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Validate => "validate",
            Self::Load => "load",
            Self::Analyze => "analyze",
            Self::Chart => "chart",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-asset failure. Every variant names the asset and the stage it stopped in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("[{asset_id}] {stage}: source unavailable after {attempts} attempt(s): {cause}")]
    SourceUnavailable {
        asset_id: AssetId,
        stage: Stage,
        attempts: u32,
        cause: String,
    },
    #[error("[{asset_id}] {stage}: malformed response: {cause}")]
    MalformedResponse {
        asset_id: AssetId,
        stage: Stage,
        cause: String,
    },
    #[error(
        "[{asset_id}] {stage}: storage unavailable ({committed} committed, \
         {not_committed} not committed): {cause}"
    )]
    StorageUnavailable {
        asset_id: AssetId,
        stage: Stage,
        committed: usize,
        not_committed: usize,
        cause: String,
    },
    #[error("[{asset_id}] {stage}: insufficient data, {found} stored record(s), need at least 2")]
    InsufficientData {
        asset_id: AssetId,
        stage: Stage,
        found: usize,
    },
}

impl PipelineError {
    pub fn storage(asset_id: &AssetId, stage: Stage, cause: impl Display) -> Self {
        Self::StorageUnavailable {
            asset_id: asset_id.clone(),
            stage,
            committed: 0,
            not_committed: 0,
            cause: cause.to_string(),
        }
    }

    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::SourceUnavailable { .. } => EXIT_SOURCE_UNAVAILABLE,
            Self::MalformedResponse { .. } => EXIT_MALFORMED_RESPONSE,
            Self::StorageUnavailable { .. } => EXIT_STORAGE_UNAVAILABLE,
            Self::InsufficientData { .. } => EXIT_INSUFFICIENT_DATA,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::StorageUnavailable { .. } => "storage_unavailable",
            Self::InsufficientData { .. } => "insufficient_data",
        }
    }

    pub const fn stage(&self) -> Stage {
        match self {
            Self::SourceUnavailable { stage, .. }
            | Self::MalformedResponse { stage, .. }
            | Self::StorageUnavailable { stage, .. }
            | Self::InsufficientData { stage, .. } => *stage,
        }
    }

    pub fn asset_id(&self) -> &AssetId {
        match self {
            Self::SourceUnavailable { asset_id, .. }
            | Self::MalformedResponse { asset_id, .. }
            | Self::StorageUnavailable { asset_id, .. }
            | Self::InsufficientData { asset_id, .. } => asset_id,
        }
    }

    /// Whether this failure counts against the run's exit status on its own.
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::InsufficientData { .. })
    }

    fn from_fetch(error: FetchError) -> Self {
        match error {
            FetchError::SourceUnavailable {
                asset_id,
                attempts,
                cause,
            } => Self::SourceUnavailable {
                asset_id,
                stage: Stage::Fetch,
                attempts,
                cause,
            },
            FetchError::MalformedResponse { asset_id, cause } => Self::MalformedResponse {
                asset_id,
                stage: Stage::Fetch,
                cause,
            },
        }
    }

    fn from_load(asset_id: &AssetId, error: LoadError) -> Self {
        let LoadError::Interrupted { report, cause } = error;
        Self::StorageUnavailable {
            asset_id: asset_id.clone(),
            stage: Stage::Load,
            committed: report.committed,
            not_committed: report.not_committed,
            cause: cause.to_string(),
        }
    }

    fn from_analytics(asset_id: &AssetId, error: AnalyticsError) -> Self {
        match error {
            AnalyticsError::InsufficientData { asset_id, found } => Self::InsufficientData {
                asset_id,
                stage: Stage::Analyze,
                found,
            },
            other => Self::storage(asset_id, Stage::Analyze, other),
        }
    }
}

/// Serialized form of a [`PipelineError`] inside a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub stage: Stage,
    pub kind: &'static str,
    pub exit_code: u8,
    pub message: String,
}

impl From<&PipelineError> for FailureReport {
    fn from(error: &PipelineError) -> Self {
        Self {
            stage: error.stage(),
            kind: error.kind(),
            exit_code: error.exit_code(),
            message: error.to_string(),
        }
    }
}

/// What happened to one asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetReport {
    pub asset_id: AssetId,
    pub fetched: usize,
    pub validation: Option<ValidationSummary>,
    pub load: Option<LoadReport>,
    pub summary: Option<AnalyticsSummary>,
    pub trend: Option<Trend>,
    pub chart: Option<PathBuf>,
    pub warnings: Vec<String>,
    pub error: Option<FailureReport>,
}

impl AssetReport {
    fn new(asset_id: AssetId) -> Self {
        Self {
            asset_id,
            fetched: 0,
            validation: None,
            load: None,
            summary: None,
            trend: None,
            chart: None,
            warnings: Vec::new(),
            error: None,
        }
    }
}

/// Outcome of a multi-asset run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub window_start: UtcDateTime,
    pub window_end: UtcDateTime,
    pub assets: Vec<AssetReport>,
    pub exit_code: u8,
}

impl RunReport {
    /// First fatal failure in asset order; `6` only when every asset lacked
    /// data; otherwise `0`.
    pub fn compute_exit_code(assets: &[AssetReport]) -> u8 {
        if let Some(code) = assets
            .iter()
            .filter_map(|asset| asset.error.as_ref())
            .map(|failure| failure.exit_code)
            .find(|code| *code != EXIT_INSUFFICIENT_DATA)
        {
            return code;
        }
        let all_insufficient = !assets.is_empty()
            && assets.iter().all(|asset| {
                asset
                    .error
                    .as_ref()
                    .is_some_and(|failure| failure.exit_code == EXIT_INSUFFICIENT_DATA)
            });
        if all_insufficient {
            EXIT_INSUFFICIENT_DATA
        } else {
            0
        }
    }
}

/// One configured ETL run.
pub struct Pipeline {
    source: Arc<dyn PriceSource>,
    store: Arc<dyn PriceStore>,
    chart: Option<Arc<dyn ChartSink>>,
    validation: ValidationConfig,
    chunk_size: usize,
    run_id: String,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn PriceSource>,
        store: Arc<dyn PriceStore>,
        validation: ValidationConfig,
    ) -> Self {
        Self {
            source,
            store,
            chart: None,
            validation,
            chunk_size: DEFAULT_CHUNK_SIZE,
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_chart_sink(mut self, sink: Arc<dyn ChartSink>) -> Self {
        self.chart = Some(sink);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Run every stage for one asset.
    pub async fn run_asset(
        &self,
        asset_id: &AssetId,
        window: TimeWindow,
    ) -> Result<AssetReport, PipelineError> {
        let mut report = AssetReport::new(asset_id.clone());
        self.drive(asset_id, window, &mut report).await?;
        Ok(report)
    }

    /// Run `assets` in order. A failing asset never stops the ones after it.
    pub async fn run(&self, assets: &[AssetId], window: TimeWindow) -> RunReport {
        tracing::info!(
            run_id = %self.run_id,
            assets = assets.len(),
            window_start = %window.start(),
            window_end = %window.end(),
            "pipeline run started"
        );

        let mut reports = Vec::with_capacity(assets.len());
        for asset_id in assets {
            let mut report = AssetReport::new(asset_id.clone());
            if let Err(error) = self.drive(asset_id, window, &mut report).await {
                if error.is_fatal() {
                    tracing::error!(run_id = %self.run_id, error = %error, "asset failed");
                } else {
                    tracing::warn!(run_id = %self.run_id, error = %error, "asset skipped");
                }
                report.error = Some(FailureReport::from(&error));
            }
            reports.push(report);
        }

        let exit_code = RunReport::compute_exit_code(&reports);
        tracing::info!(run_id = %self.run_id, exit_code, "pipeline run finished");
        RunReport {
            run_id: self.run_id.clone(),
            window_start: window.start(),
            window_end: window.end(),
            assets: reports,
            exit_code,
        }
    }

    async fn drive(
        &self,
        asset_id: &AssetId,
        window: TimeWindow,
        report: &mut AssetReport,
    ) -> Result<(), PipelineError> {
        let started = Instant::now();
        let records = self
            .source
            .fetch(asset_id, window)
            .await
            .map_err(PipelineError::from_fetch)?;
        let fetch_latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        report.fetched = records.len();
        tracing::info!(
            asset_id = %asset_id,
            stage = %Stage::Fetch,
            source = self.source.id(),
            records = records.len(),
            latency_ms = fetch_latency_ms,
            "stage complete"
        );

        let outcome = validate(records, &window, &self.validation);
        let summary = outcome.summary();
        report.validation = Some(summary);
        if summary.outliers + summary.malformed > 0 {
            tracing::warn!(asset_id = %asset_id, stage = %Stage::Validate, "{summary}");
        } else {
            tracing::info!(
                asset_id = %asset_id,
                stage = %Stage::Validate,
                valid = summary.valid,
                "stage complete"
            );
        }

        let load = Loader::new(self.store.as_ref(), &self.run_id)
            .with_chunk_size(self.chunk_size)
            .with_fetch_latency_ms(fetch_latency_ms)
            .load(&outcome.valid)
            .map_err(|error| PipelineError::from_load(asset_id, error))?;
        report.load = Some(load);
        tracing::info!(
            asset_id = %asset_id,
            stage = %Stage::Load,
            committed = load.committed,
            chunks = load.chunks,
            "stage complete"
        );

        let analytics = Analytics::new(self.store.as_ref());
        let summary = analytics
            .summarize(asset_id, &window)
            .map_err(|error| PipelineError::from_analytics(asset_id, error))?;
        if let Err(error) = analytics.record_summary(&summary, &self.run_id) {
            tracing::warn!(asset_id = %asset_id, error = %error, "summary snapshot not recorded");
            report
                .warnings
                .push(format!("summary snapshot not recorded: {error}"));
        }
        tracing::info!(
            asset_id = %asset_id,
            stage = %Stage::Analyze,
            samples = summary.sample_count,
            mean = summary.mean,
            stddev = summary.stddev,
            "stage complete"
        );
        report.summary = Some(summary);

        match analytics.trend(asset_id, &window) {
            Ok(trend) => report.trend = trend,
            Err(error) => {
                tracing::warn!(asset_id = %asset_id, error = %error, "trend unavailable");
                report.warnings.push(format!("trend unavailable: {error}"));
            }
        }

        if let Some(sink) = &self.chart {
            self.render_chart(sink.as_ref(), &analytics, asset_id, &window, report);
        }

        Ok(())
    }

    /// Chart failures are recorded as warnings only.
    fn render_chart(
        &self,
        sink: &dyn ChartSink,
        analytics: &Analytics<'_>,
        asset_id: &AssetId,
        window: &TimeWindow,
        report: &mut AssetReport,
    ) {
        let label = format!(
            "{asset_id}_{}_{}",
            window.start().format_compact(),
            window.end().format_compact()
        );
        let rendered = analytics
            .price_series(asset_id, window)
            .map_err(|error| error.to_string())
            .and_then(|series| sink.render(&label, &series).map_err(|error| error.to_string()));

        match rendered {
            Ok(path) => {
                tracing::info!(
                    asset_id = %asset_id,
                    stage = %Stage::Chart,
                    path = %path.display(),
                    "stage complete"
                );
                report.chart = Some(path);
            }
            Err(error) => {
                tracing::warn!(asset_id = %asset_id, stage = %Stage::Chart, error = %error, "chart skipped");
                report.warnings.push(format!("chart skipped: {error}"));
            }
        }
    }
}
