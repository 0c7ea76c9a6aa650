mod run;
mod series;
mod summary;

use coinpipe_core::{AssetId, DuckDbPriceStore, PipelineConfig, TimeWindow, UtcDateTime, WindowSettings};
use coinpipe_warehouse::Warehouse;

use crate::cli::{Cli, Command, WindowArgs};
use crate::error::CliError;

/// Execute the selected command; returns the process exit code.
pub async fn run(cli: &Cli) -> Result<u8, CliError> {
    let config = load_config(cli)?;
    match &cli.command {
        Command::Run(args) => run::run(args, config, cli.pretty).await,
        Command::Summary(args) => summary::run(args, &config, cli.pretty),
        Command::Series(args) => series::run(args, &config, cli.pretty),
    }
}

/// Defaults, then `--config`, then global flags.
fn load_config(cli: &Cli) -> Result<PipelineConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(db) = &cli.db {
        config.store.db_path = Some(db.clone());
    }
    Ok(config)
}

fn apply_window(config: &mut PipelineConfig, window: &WindowArgs) {
    if window.is_set() {
        config.window = WindowSettings {
            days: window.days,
            start: window.start.clone(),
            end: window.end.clone(),
        };
    }
}

fn resolve_window(config: &PipelineConfig) -> Result<TimeWindow, CliError> {
    Ok(config.window.resolve(UtcDateTime::now())?)
}

fn open_store(config: &PipelineConfig) -> Result<DuckDbPriceStore, CliError> {
    let warehouse = Warehouse::open(config.store.warehouse_config())?;
    Ok(DuckDbPriceStore::new(warehouse, config.store.guardrails()))
}

/// Inputs shared by the read-only commands.
fn query_inputs(
    asset: &str,
    window: &WindowArgs,
    config: &PipelineConfig,
) -> Result<(AssetId, TimeWindow, DuckDbPriceStore), CliError> {
    let mut config = config.clone();
    apply_window(&mut config, window);
    let asset_id = AssetId::parse(asset)?;
    let window = resolve_window(&config)?;
    let store = open_store(&config)?;
    Ok((asset_id, window, store))
}
