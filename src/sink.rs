//! Sink Layer
//!
//! Persists speed test results to a time-series database.
//!
//! # Components
//!
//! - [`MetricSink`]: write contract (probe, write, create database)
//! - [`InfluxClient`]: InfluxDB 1.x implementation over HTTP
//! - [`Point`] / [`metric_record`]: point model and line protocol encoding
//! - [`verify_connection`] / [`commit`]: startup gate and commit-with-repair

mod error;
mod influx;
mod traits;
mod types;
mod writer;

pub use error::SinkError;
pub use influx::InfluxClient;
pub use traits::MetricSink;
pub use types::{FieldValue, MEASUREMENT, Point, metric_record};
pub use writer::{WriteOutcome, commit, verify_connection};

#[cfg(test)]
pub(crate) use writer::tests::MockSink;
