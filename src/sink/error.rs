//! Sink-specific error types.
//!
//! All sink operations return [`SinkError`] on failure. The variants follow the
//! failure classes the orchestrator reacts to: unreachable, unauthorized,
//! missing database, and everything else.

use thiserror::Error;

/// Errors that can occur talking to the metrics sink.
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// Connection refused, DNS failure or timeout.
    #[error("sink unreachable: {0}")]
    Unreachable(String),

    /// The sink rejected the credentials (HTTP 401/403).
    #[error("invalid credentials (status {0})")]
    Unauthorized(u16),

    /// The target database does not exist (HTTP 404 on write).
    #[error("database not found: {0}")]
    NotFound(String),

    /// The sink answered with an unexpected status.
    #[error("sink returned status {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Error text reported by the sink.
        message: String,
    },

    /// Any other transport or protocol failure.
    #[error("unknown sink failure: {0}")]
    Unknown(String),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl SinkError {
    /// Whether the failure means the database has to be created first.
    pub fn is_database_missing(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Self::Unreachable(e.to_string())
        } else {
            Self::Unknown(e.to_string())
        }
    }
}
