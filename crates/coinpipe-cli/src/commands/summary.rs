use coinpipe_core::{Analytics, AnalyticsSummary, PipelineConfig, Trend};
use serde::Serialize;

use super::query_inputs;
use crate::cli::QueryArgs;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct SummaryOutput {
    summary: AnalyticsSummary,
    trend: Option<Trend>,
}

pub fn run(args: &QueryArgs, config: &PipelineConfig, pretty: bool) -> Result<u8, CliError> {
    let (asset_id, window, store) = query_inputs(&args.asset, &args.window, config)?;
    let analytics = Analytics::new(&store);

    let summary = analytics.summarize(&asset_id, &window)?;
    let trend = analytics.trend(&asset_id, &window)?;
    tracing::info!(
        asset_id = %asset_id,
        samples = summary.sample_count,
        "summary computed from stored prices"
    );

    output::render(&SummaryOutput { summary, trend }, pretty)?;
    Ok(0)
}
