//! Logging setup for the host binary
//!
//! Library code logs through the `log` facade. The binary routes those records
//! into a `tracing-subscriber` formatter on stderr, since stdout carries frames.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_logging(default_level: &str) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| format!("Invalid log level {}: {}", default_level, e))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(|e| format!("Failed to init logging: {}", e))
}
