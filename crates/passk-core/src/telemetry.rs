//! Tracing initialisation for passk binaries.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored:
//! the global subscriber can only be set once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable selecting JSON log output (`PASSK_LOG_FORMAT=json`).
pub const LOG_FORMAT_ENV: &str = "PASSK_LOG_FORMAT";

/// Whether a `PASSK_LOG_FORMAT` value asks for JSON lines.
pub fn is_json_format(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("json")
}

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON (for log pipelines).
/// * `level`: default verbosity when `RUST_LOG` is not set.
///
/// Logs go to stderr so that stdout stays free for command output.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .ok();
    }
}
