//! influx-speedtest binary entry point.
//!
//! Runs speed tests on a fixed delay and writes the results to InfluxDB.
//! Core functionality is provided by the `influx_speedtest` library crate.

use std::process::ExitCode;

use clap::Parser;
use influx_speedtest::{
    AppConfig, InfluxClient, LogLevel, Orchestrator, SpeedtestNet, SpeedtestSettings,
    config::CONFIG_PATH_ENV, logging,
};
use tokio_util::sync::CancellationToken;

/// A tool to take network speed tests and send the results to InfluxDB.
///
/// The configuration file is read from the path in the INFLUXSPEEDTESTCONFIG
/// environment variable (default: config.ini).
#[derive(Parser, Debug)]
#[command(name = "influx-speedtest", about, long_about)]
struct Cli {}

#[tokio::main]
async fn main() -> ExitCode {
    Cli::parse();

    let path = AppConfig::path_from_env();
    let config = match AppConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            logging::init(LogLevel::default());
            tracing::error!(
                path = %path.display(),
                env = CONFIG_PATH_ENV,
                error = %e,
                "Unable to load configuration"
            );
            return ExitCode::FAILURE;
        }
    };

    logging::init(config.logging.level);
    tracing::debug!(path = %path.display(), "Configuration successfully loaded");
    for warning in &config.warnings {
        tracing::warn!(path = %path.display(), "Configuration: {warning}");
    }
    tracing::info!(
        sink = %config.sink.base_url(),
        database = %config.sink.database,
        delay_secs = config.general.delay.as_secs(),
        targets = ?config.speedtest.targets,
        "influx-speedtest starting"
    );

    let sink = match InfluxClient::new(&config.sink) {
        Ok(sink) => sink,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create InfluxDB client");
            return ExitCode::FAILURE;
        }
    };

    let provider = match SpeedtestNet::new(SpeedtestSettings::default()) {
        Ok(provider) => provider,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create speedtest client");
            return ExitCode::FAILURE;
        }
    };

    let orchestrator = match Orchestrator::start(config, provider, sink).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    match orchestrator.run(cancel).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Aborting");
            ExitCode::FAILURE
        }
    }
}

/// Cancel `token` on Ctrl+C or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }

    token.cancel();
}
