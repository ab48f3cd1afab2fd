//! Core sink trait.

use crate::sink::{Point, SinkError};

/// Write side of a time-series database.
///
/// Implementations are used from a single task; calls never overlap.
#[async_trait::async_trait]
pub trait MetricSink: Send + Sync + 'static {
    /// Address shown in diagnostics.
    fn address(&self) -> &str;

    /// Database receiving the points.
    fn database(&self) -> &str;

    /// Lightweight read-only request proving the sink is reachable and the
    /// credentials are accepted.
    ///
    /// # Errors
    /// - `SinkError::Unreachable` on connection failure or timeout
    /// - `SinkError::Unauthorized` when the credentials are rejected
    /// - anything else for unclassified failures
    async fn probe(&self) -> Result<(), SinkError>;

    /// Write points to [`MetricSink::database`].
    ///
    /// # Errors
    /// `SinkError::NotFound` when the database does not exist.
    async fn write_points(&self, points: &[Point]) -> Result<(), SinkError>;

    /// Create a database.
    async fn create_database(&self, name: &str) -> Result<(), SinkError>;
}
