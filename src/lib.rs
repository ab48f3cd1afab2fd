//! influx-speedtest - periodic network speed tests persisted to InfluxDB
//!
//! This crate provides the building blocks of the `influx-speedtest` daemon.
//! It can be embedded as a library, or run as a standalone binary.
//!
//! # Architecture
//!
//! - **Config**: INI configuration loaded once at startup
//! - **Measurement**: speed test provider contract and speedtest.net client
//! - **Sink**: InfluxDB client, line protocol, commit-with-repair
//! - **Orchestrator**: the cycle / wait loop tying them together
//!
//! # Example
//!
//! ```rust,no_run
//! use influx_speedtest::{
//!     AppConfig, InfluxClient, Orchestrator, SpeedtestNet, SpeedtestSettings,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load("config.ini")?;
//! let sink = InfluxClient::new(&config.sink)?;
//! let provider = SpeedtestNet::new(SpeedtestSettings::default())?;
//!
//! let orchestrator = Orchestrator::start(config, provider, sink).await?;
//! orchestrator.run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod measurement;
pub mod orchestrator;
pub mod sink;

pub use config::{AppConfig, ConfigError, LogLevel, SinkConfig};
pub use measurement::{
    Disposition, MeasurementResult, ProviderError, Server, SpeedTester, SpeedtestNet,
    SpeedtestSettings,
};
pub use orchestrator::{CycleReport, FatalError, Orchestrator, TargetAttempt, TargetOutcome};
pub use sink::{
    FieldValue, InfluxClient, MetricSink, Point, SinkError, WriteOutcome, commit, metric_record,
    verify_connection,
};
