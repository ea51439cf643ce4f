use anyhow::anyhow;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogFormat;

pub const DEFAULT_LOG_FILTER: &str = "info";

/// Installs the global subscriber on stderr so command output on stdout stays
/// machine-readable. `RUST_LOG` overrides [`DEFAULT_LOG_FILTER`].
pub fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let installed = match format {
        LogFormat::Human => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|err| anyhow!("failed to initialize tracing: {err}"))
}
