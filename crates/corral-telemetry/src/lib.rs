//! corral-telemetry -- tracing subscriber setup shared by the binaries.

use tracing_subscriber::{fmt, EnvFilter};

/// Output format for the global subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable terminal output.
    #[default]
    Pretty,
    /// One JSON object per line, for log shippers.
    Json,
}

/// Install the global subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise from
/// `default_level` (e.g. "info", "corral_core=debug,warn"). Safe to call
/// more than once -- only the first call installs anything.
pub fn init(service: &str, default_level: &str, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let installed = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if installed.is_ok() {
        tracing::info!(service, format = ?format, "logging initialised");
    }
}
