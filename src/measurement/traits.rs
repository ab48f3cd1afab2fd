//! Core measurement traits and types.

use strum_macros::{AsRefStr, Display};
use thiserror::Error;

/// Transfer phase of a speed test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Download,
    Upload,
}

/// What the orchestrator does after a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Stop the process.
    Fatal,
    /// Skip every remaining target in the current cycle.
    AbandonCycle,
    /// Skip only the current target.
    AbandonTarget,
}

/// Errors reported by a measurement provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider's own configuration could not be fetched.
    #[error("failed to retrieve speedtest configuration: {0}")]
    ConfigRetrieval(String),

    /// The server list could not be fetched at all.
    #[error("cannot retrieve server list: {0}")]
    ServersRetrieval(String),

    /// No server matched the requested target(s).
    #[error("no matched servers: {}", .0.join(", "))]
    NoMatchedServers(Vec<String>),

    /// A target identifier is not a valid server id.
    #[error("{0} is an invalid server id, must be an integer")]
    InvalidServerId(String),

    /// No candidate answered the latency probe.
    #[error("unable to determine best server: {0}")]
    BestServer(String),

    /// Download or upload failed.
    #[error("{phase} test failed: {message}")]
    Transfer {
        /// Phase that failed.
        phase: Phase,
        /// Underlying error.
        message: String,
    },
}

impl ProviderError {
    /// How far the failure reaches.
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::ConfigRetrieval(_) => Disposition::Fatal,
            Self::ServersRetrieval(_) => Disposition::AbandonCycle,
            Self::NoMatchedServers(_)
            | Self::InvalidServerId(_)
            | Self::BestServer(_)
            | Self::Transfer { .. } => Disposition::AbandonTarget,
        }
    }
}

/// A remote speed test server.
#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    /// Server id.
    pub id: String,
    /// City / display name.
    pub name: String,
    /// Hosting organisation.
    pub sponsor: String,
    /// Country name.
    pub country: String,
    /// Upload endpoint; download and latency files live next to it.
    pub url: String,
    /// Great-circle distance from the client in km.
    pub distance_km: f64,
    /// Measured latency in ms, set by best-server selection.
    pub latency_ms: Option<f64>,
}

/// Outcome of one successful speed test.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementResult {
    pub download_bps: f64,
    pub upload_bps: f64,
    pub latency_ms: f64,
    pub target_id: String,
    pub target_name: String,
    pub target_country: String,
}

impl MeasurementResult {
    /// Assemble a result from transfer rates, latency and the tested server.
    pub fn new(download_bps: f64, upload_bps: f64, latency_ms: f64, server: &Server) -> Self {
        Self {
            download_bps,
            upload_bps,
            latency_ms,
            target_id: server.id.clone(),
            target_name: server.name.clone(),
            target_country: server.country.clone(),
        }
    }

    /// Human-readable summary, rates in Mbps rounded to two decimals.
    ///
    /// ```
    /// use influx_speedtest::measurement::MeasurementResult;
    ///
    /// let result = MeasurementResult {
    ///     download_bps: 93_456_789.0,
    ///     upload_bps: 20_000_000.0,
    ///     latency_ms: 8.25,
    ///     target_id: "1".into(),
    ///     target_name: "Oslo".into(),
    ///     target_country: "Norway".into(),
    /// };
    /// assert_eq!(
    ///     result.summary(),
    ///     "Download: 93.46Mbps - Upload: 20.0Mbps - Latency: 8.25ms"
    /// );
    /// ```
    pub fn summary(&self) -> String {
        format!(
            "Download: {}Mbps - Upload: {}Mbps - Latency: {}ms",
            decimal(round2(self.download_bps / 1_000_000.0)),
            decimal(round2(self.upload_bps / 1_000_000.0)),
            decimal(self.latency_ms),
        )
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Shortest decimal form that always keeps a fractional digit (`50.0`, `15.5`).
fn decimal(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// Measurement provider contract.
///
/// A session is opened per test; its failure is unrecoverable. The remaining
/// steps run in order: list, select, download, upload.
#[async_trait::async_trait]
pub trait SpeedTester: Send + Sync + 'static {
    /// Provider state shared by the steps of one test.
    type Session: Send + Sync;

    /// Fetch provider configuration.
    ///
    /// # Errors
    /// `ProviderError::ConfigRetrieval`.
    async fn open_session(&self) -> Result<Self::Session, ProviderError>;

    /// Candidate servers for the filter; an empty filter means auto-discovery.
    ///
    /// # Errors
    /// - `ProviderError::InvalidServerId` for a malformed filter entry
    /// - `ProviderError::ServersRetrieval` if the list cannot be fetched
    /// - `ProviderError::NoMatchedServers` if nothing matched
    async fn list_servers(
        &self,
        session: &Self::Session,
        filter: &[String],
    ) -> Result<Vec<Server>, ProviderError>;

    /// Pick the best candidate. The returned server must carry `latency_ms`.
    ///
    /// # Errors
    /// `ProviderError::BestServer` if no candidate is usable.
    async fn select_best(
        &self,
        session: &Self::Session,
        servers: Vec<Server>,
    ) -> Result<Server, ProviderError>;

    /// Measure download throughput in bits per second.
    async fn download(&self, session: &Self::Session, server: &Server)
    -> Result<f64, ProviderError>;

    /// Measure upload throughput in bits per second.
    async fn upload(&self, session: &Self::Session, server: &Server) -> Result<f64, ProviderError>;
}
