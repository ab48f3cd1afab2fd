//! Measurement cycle and run loop.
//!
//! One [`Orchestrator`] owns the provider and the sink handle and runs
//! cycles strictly one after another. Targets within a cycle are tested in
//! configured order, never concurrently.

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::measurement::{Disposition, MeasurementResult, ProviderError, SpeedTester};
use crate::sink::{MetricSink, SinkError, WriteOutcome, commit, metric_record, verify_connection};

/// Label used in logs for the auto-selected target.
const AUTO_TARGET: &str = "auto";

/// Conditions that stop the process.
#[derive(Debug, Error)]
pub enum FatalError {
    /// The sink failed its startup probe.
    #[error("sink connectivity check failed: {0}")]
    Sink(#[from] SinkError),

    /// The measurement provider cannot be configured.
    #[error("measurement provider unavailable: {0}")]
    Provider(ProviderError),
}

/// Result of one target within a cycle.
#[derive(Debug, Clone)]
pub enum TargetOutcome {
    /// A point was produced and handed to the sink.
    Recorded(WriteOutcome),
    /// The target failed; the cycle went on.
    Abandoned(ProviderError),
    /// Not attempted: the cycle was abandoned or shutdown was requested.
    Skipped,
}

/// One entry per target, in configured order.
#[derive(Debug, Clone)]
pub struct TargetAttempt {
    /// Target id, `None` for auto-selection.
    pub target: Option<String>,
    /// What happened.
    pub outcome: TargetOutcome,
}

/// Summary of a finished cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Attempts in execution order.
    pub attempts: Vec<TargetAttempt>,
    /// Set when a server list failure cut the cycle short.
    pub abandoned: bool,
}

impl CycleReport {
    /// Number of targets that produced a point written to the sink.
    pub fn written(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| matches!(&a.outcome, TargetOutcome::Recorded(w) if w.is_written()))
            .count()
    }

    /// Number of targets the provider was actually asked to measure.
    pub fn attempted(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| !matches!(a.outcome, TargetOutcome::Skipped))
            .count()
    }
}

/// Drives measurement cycles against one provider and one sink.
pub struct Orchestrator<P: SpeedTester, S: MetricSink> {
    config: AppConfig,
    provider: P,
    sink: S,
}

impl<P: SpeedTester, S: MetricSink> Orchestrator<P, S> {
    /// Verify sink connectivity and return a runnable orchestrator.
    ///
    /// # Errors
    /// Returns `FatalError::Sink` if the sink probe fails; no cycle runs.
    pub async fn start(config: AppConfig, provider: P, sink: S) -> Result<Self, FatalError> {
        verify_connection(&sink).await?;
        Ok(Self {
            config,
            provider,
            sink,
        })
    }

    /// The measurement provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The sink handle.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run cycles until `cancel` fires.
    ///
    /// Cancellation is observed at the top of each cycle, between targets and
    /// during the inter-cycle wait; an in-flight test or write completes first.
    ///
    /// # Errors
    /// Returns `FatalError::Provider` when the provider configuration cannot be
    /// retrieved.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), FatalError> {
        let delay = self.config.general.delay;

        loop {
            if cancel.is_cancelled() {
                tracing::info!("Shutdown requested, stopping before next cycle");
                return Ok(());
            }

            let report = self.run_cycle(&cancel).await?;
            tracing::debug!(
                attempted = report.attempted(),
                written = report.written(),
                abandoned = report.abandoned,
                "Cycle complete"
            );

            tracing::info!("Waiting {} seconds until next test", delay.as_secs());
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Shutdown requested, stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Test every configured target once, or the auto target if none are set.
    ///
    /// # Errors
    /// Returns `FatalError::Provider` for unrecoverable provider failures.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport, FatalError> {
        let targets: Vec<Option<&str>> = if self.config.speedtest.targets.is_empty() {
            vec![None]
        } else {
            self.config
                .speedtest
                .targets
                .iter()
                .map(|t| Some(t.as_str()))
                .collect()
        };

        let mut report = CycleReport::default();

        for target in targets {
            let outcome = if report.abandoned || cancel.is_cancelled() {
                TargetOutcome::Skipped
            } else {
                match self.test_target(target).await {
                    Ok(write) => TargetOutcome::Recorded(write),
                    Err(e) => match e.disposition() {
                        Disposition::Fatal => {
                            tracing::error!(error = %e, "Failed to get speedtest configuration. Aborting");
                            return Err(FatalError::Provider(e));
                        }
                        Disposition::AbandonCycle => {
                            tracing::error!(
                                server = target.unwrap_or(AUTO_TARGET),
                                error = %e,
                                "Cannot retrieve server list. Skipping remaining targets this cycle"
                            );
                            report.abandoned = true;
                            TargetOutcome::Abandoned(e)
                        }
                        Disposition::AbandonTarget => {
                            tracing::error!(
                                server = target.unwrap_or(AUTO_TARGET),
                                error = %e,
                                "Speed test failed for target"
                            );
                            TargetOutcome::Abandoned(e)
                        }
                    },
                }
            };

            report.attempts.push(TargetAttempt {
                target: target.map(str::to_string),
                outcome,
            });
        }

        Ok(report)
    }

    /// Measure one target and commit the resulting point.
    async fn test_target(&self, target: Option<&str>) -> Result<WriteOutcome, ProviderError> {
        tracing::info!("Starting speed test for server \"{}\"", target.unwrap_or(AUTO_TARGET));

        let result = self.measure(target).await?;
        let write = commit(&self.sink, &metric_record(&result)).await;

        tracing::info!("{}", result.summary());
        Ok(write)
    }

    async fn measure(&self, target: Option<&str>) -> Result<MeasurementResult, ProviderError> {
        let session = self.provider.open_session().await?;

        tracing::debug!("Setting up speedtest client");
        let filter: Vec<String> = target.map(|t| vec![t.to_string()]).unwrap_or_default();
        let servers = self.provider.list_servers(&session, &filter).await?;

        tracing::debug!("Picking the closest server");
        let best = self.provider.select_best(&session, servers).await?;
        let latency = best.latency_ms.ok_or_else(|| {
            ProviderError::BestServer(format!("server {} was selected without a latency", best.id))
        })?;
        tracing::info!(
            server = %best.id,
            sponsor = %best.sponsor,
            "Selected server {} in {}",
            best.id,
            best.name
        );

        // Download strictly before upload.
        tracing::debug!("Starting download test");
        let download = self.provider.download(&session, &best).await?;
        tracing::debug!("Starting upload test");
        let upload = self.provider.upload(&session, &best).await?;

        Ok(MeasurementResult::new(download, upload, latency, &best))
    }
}

impl<P: SpeedTester, S: MetricSink> std::fmt::Debug for Orchestrator<P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("delay", &self.config.general.delay)
            .field("targets", &self.config.speedtest.targets)
            .field("sink", &self.sink.address())
            .finish_non_exhaustive()
    }
}
