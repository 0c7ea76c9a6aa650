use coinpipe_core::{Analytics, AssetId, PipelineConfig, SeriesPoint, UtcDateTime};
use serde::Serialize;

use super::query_inputs;
use crate::cli::QueryArgs;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct SeriesOutput {
    asset_id: AssetId,
    window_start: UtcDateTime,
    window_end: UtcDateTime,
    points: Vec<SeriesPoint>,
}

pub fn run(args: &QueryArgs, config: &PipelineConfig, pretty: bool) -> Result<u8, CliError> {
    let (asset_id, window, store) = query_inputs(&args.asset, &args.window, config)?;
    let points = Analytics::new(&store).price_series(&asset_id, &window)?;
    if points.is_empty() {
        tracing::warn!(asset_id = %asset_id, "no stored prices in window");
    }

    output::render(
        &SeriesOutput {
            asset_id,
            window_start: window.start(),
            window_end: window.end(),
            points,
        },
        pretty,
    )?;
    Ok(0)
}
