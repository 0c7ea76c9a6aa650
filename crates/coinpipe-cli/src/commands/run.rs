use std::sync::Arc;

use coinpipe_core::{CoinGeckoSource, Pipeline, PipelineConfig, RetryConfig, SvgChartSink};

use super::{apply_window, open_store, resolve_window};
use crate::cli::RunArgs;
use crate::error::CliError;
use crate::output;

pub async fn run(args: &RunArgs, mut config: PipelineConfig, pretty: bool) -> Result<u8, CliError> {
    apply_overrides(&mut config, args);
    config.check()?;

    let assets = config.asset_ids()?;
    let window = resolve_window(&config)?;
    let store = open_store(&config)?;
    let source = CoinGeckoSource::from_env(
        &config.fetch,
        &config.vs_currency,
        RetryConfig::from(&config.retry),
    );

    let mut pipeline = Pipeline::new(Arc::new(source), Arc::new(store), config.validation.clone())
        .with_chunk_size(config.store.chunk_size);
    if config.chart.enabled {
        pipeline = pipeline.with_chart_sink(Arc::new(SvgChartSink::new(
            config.chart.resolved_output_dir(),
        )));
    }

    let report = pipeline.run(&assets, window).await;
    output::render(&report, pretty)?;
    Ok(report.exit_code)
}

fn apply_overrides(config: &mut PipelineConfig, args: &RunArgs) {
    if !args.assets.is_empty() {
        config.assets = args.assets.clone();
    }
    apply_window(config, &args.window);
    if let Some(currency) = &args.vs_currency {
        config.vs_currency = currency.clone();
    }
    if let Some(threshold) = args.outlier_threshold {
        config.validation.outlier_threshold = threshold;
    }
    if let Some(min_samples) = args.min_samples {
        config.validation.min_samples = min_samples;
    }
    if let Some(rolling_window) = args.rolling_window {
        config.validation.rolling_window = rolling_window;
    }
    if let Some(max_retries) = args.max_retries {
        config.retry.max_retries = max_retries;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.fetch.request_timeout_ms = timeout_ms;
    }
    if let Some(chunk_size) = args.chunk_size {
        config.store.chunk_size = chunk_size;
    }
    if let Some(base_url) = &args.base_url {
        config.fetch.base_url = base_url.clone();
    }
    if args.no_chart {
        config.chart.enabled = false;
    }
    if let Some(dir) = &args.chart_dir {
        config.chart.output_dir = Some(dir.clone());
    }
}
