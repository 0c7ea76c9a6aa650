use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Logs go to stderr; stdout carries JSON only.
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` with `--verbose`.
/// Returns `false` when a subscriber was already installed; that one stays.
pub fn init(verbose: bool) -> bool {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
    {
        Ok(()) => true,
        Err(error) => {
            tracing::warn!(%error, "keeping the already installed log subscriber");
            false
        }
    }
}
