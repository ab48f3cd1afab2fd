//! Point model and InfluxDB line protocol encoding.
//!
//! - [`Point`]: one timestamped write unit (measurement + tags + fields)
//! - [`FieldValue`]: numeric or string field payload
//! - [`metric_record`]: the single point shape produced per speed test

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::measurement::MeasurementResult;

/// Measurement name of every speed test point.
pub const MEASUREMENT: &str = "speed_test_results";

/// Value stored in a point field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Written as an InfluxDB float.
    Float(f64),
    /// Written as a double-quoted string.
    Text(String),
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// A single point written to the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Series name.
    pub measurement: String,
    /// Indexed dimensions.
    pub tags: BTreeMap<String, String>,
    /// Payload values.
    pub fields: BTreeMap<String, FieldValue>,
    /// Point time; the server assigns one when absent.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Point {
    /// Create an empty point for a measurement.
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp: None,
        }
    }

    /// Add a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Set the point time.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Encode as one line of InfluxDB line protocol.
    ///
    /// Tags and fields are emitted in key order; the timestamp is in nanoseconds.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);

        for (key, value) in &self.tags {
            let _ = write!(
                line,
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            );
        }

        let mut separator = ' ';
        for (key, value) in &self.fields {
            line.push(separator);
            separator = ',';
            line.push_str(&escape(key, &[',', '=', ' ']));
            line.push('=');
            match value {
                FieldValue::Float(v) => {
                    let _ = write!(line, "{v}");
                }
                FieldValue::Text(s) => {
                    line.push('"');
                    line.push_str(&escape(s, &['"', '\\']));
                    line.push('"');
                }
            }
        }

        if let Some(nanos) = self.timestamp.and_then(|ts| ts.timestamp_nanos_opt()) {
            let _ = write!(line, " {nanos}");
        }

        line
    }
}

fn escape(input: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Build the point recorded for one successful speed test.
pub fn metric_record(result: &MeasurementResult) -> Point {
    Point::new(MEASUREMENT)
        .with_field("download", result.download_bps)
        .with_field("upload", result.upload_bps)
        .with_field("ping", result.latency_ms)
        .with_field("server", result.target_id.as_str())
        .with_field("server_name", result.target_name.as_str())
        .with_tag("server", result.target_id.as_str())
        .with_tag("server_name", result.target_name.as_str())
        .with_tag("server_country", result.target_country.as_str())
        .at(Utc::now())
}
