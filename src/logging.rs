//! Tracing subscriber setup.
//!
//! Informational and debug lines go to stdout, warnings and errors to stderr.

use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogLevel;

/// Default filter directive for a configured level.
///
/// Dependencies are held at `warn` so HTTP client internals do not flood the
/// output at `debug`.
pub fn default_directive(level: LogLevel) -> String {
    format!("warn,influx_speedtest={}", level.as_directive())
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
///
/// Calling this more than once is a no-op.
pub fn init(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    let writer = std::io::stderr
        .with_max_level(Level::WARN)
        .or_else(std::io::stdout);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
        .try_init();
}
