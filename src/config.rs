//! Configuration module.
//!
//! Loads the INI configuration file once at startup:
//! - `[general]` cycle delay
//! - `[sink]` InfluxDB connection parameters
//! - `[speedtest]` target server ids
//! - `[logging]` verbosity

mod app;
mod validation;

pub use app::{
    AppConfig, GeneralConfig, LogLevel, LoggingConfig, SinkConfig, SpeedtestConfig,
};
pub use validation::{
    ConfigError, expand_env_vars, parse_bool, parse_port, parse_seconds, parse_targets,
};

// Re-export constants
pub use app::{
    CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH, DEFAULT_DELAY, DEFAULT_SINK_DATABASE,
    DEFAULT_SINK_PORT, DEFAULT_SINK_TIMEOUT,
};
