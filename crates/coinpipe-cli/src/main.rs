mod cli;
mod commands;
mod error;
mod logging;
mod output;

use clap::Parser;
use std::process::ExitCode;

use crate::cli::Cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match commands::run(&cli).await {
        Ok(code) => ExitCode::from(code),
        Err(error) => {
            tracing::error!(exit_code = error.exit_code(), "{error}");
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}
