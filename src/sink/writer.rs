//! Sink access policies: the startup connectivity gate and commit-with-repair.

use crate::sink::{MetricSink, Point, SinkError};

/// How a commit ended. Commits never fail outward; this is for reporting.
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    /// First attempt succeeded.
    Written,
    /// Database was missing, created, and the retry succeeded.
    WrittenAfterRepair,
    /// Point was dropped.
    Failed(SinkError),
}

impl WriteOutcome {
    /// Whether the point reached the sink.
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written | Self::WrittenAfterRepair)
    }
}

/// Verify the sink is reachable and accepts the credentials.
///
/// Logs a classified message on failure; the caller decides to exit.
pub async fn verify_connection<S: MetricSink + ?Sized>(sink: &S) -> Result<(), SinkError> {
    tracing::debug!(address = %sink.address(), "Testing connection to InfluxDB using provided credentials");

    match sink.probe().await {
        Ok(()) => {
            tracing::debug!(address = %sink.address(), "Successful connection to InfluxDB");
            Ok(())
        }
        Err(e) => {
            match &e {
                SinkError::Unreachable(_) => tracing::error!(
                    address = %sink.address(),
                    error = %e,
                    "Cannot reach InfluxDB at {}",
                    sink.address()
                ),
                SinkError::Unauthorized(_) => tracing::error!(
                    address = %sink.address(),
                    error = %e,
                    "Unable to connect to InfluxDB: invalid credentials"
                ),
                _ => tracing::error!(
                    address = %sink.address(),
                    error = %e,
                    "Failed to connect to InfluxDB: unknown connection failure"
                ),
            }
            Err(e)
        }
    }
}

/// Write one point, creating the database and retrying once if it is missing.
///
/// Every failure is logged and swallowed.
pub async fn commit<S: MetricSink + ?Sized>(sink: &S, point: &Point) -> WriteOutcome {
    let points = std::slice::from_ref(point);
    tracing::debug!(line = %point.to_line_protocol(), "Sending to InfluxDB");

    let first = match sink.write_points(points).await {
        Ok(()) => {
            tracing::info!("Data written to InfluxDB");
            return WriteOutcome::Written;
        }
        Err(e) => e,
    };

    if !first.is_database_missing() {
        tracing::error!(error = %first, detail = ?first, "Failed to write to InfluxDB");
        return WriteOutcome::Failed(first);
    }

    tracing::error!(
        database = %sink.database(),
        "Database {} does not exist. Attempting to create and retry",
        sink.database()
    );

    if let Err(e) = sink.create_database(sink.database()).await {
        tracing::error!(database = %sink.database(), error = %e, detail = ?e, "Failed to create InfluxDB database");
        return WriteOutcome::Failed(e);
    }

    match sink.write_points(points).await {
        Ok(()) => {
            tracing::info!("Data written to InfluxDB");
            WriteOutcome::WrittenAfterRepair
        }
        Err(e) => {
            tracing::error!(error = %e, detail = ?e, "Failed to write to InfluxDB after creating database");
            WriteOutcome::Failed(e)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// In-memory sink with scripted write results.
    pub(crate) struct MockSink {
        pub probe_result: Result<(), SinkError>,
        pub write_results: Mutex<VecDeque<Result<(), SinkError>>>,
        pub create_result: Result<(), SinkError>,
        pub written: Mutex<Vec<Point>>,
        pub write_attempts: Mutex<usize>,
        pub creates: Mutex<Vec<String>>,
        pub probes: Mutex<usize>,
    }

    impl MockSink {
        pub(crate) fn new() -> Self {
            Self {
                probe_result: Ok(()),
                write_results: Mutex::new(VecDeque::new()),
                create_result: Ok(()),
                written: Mutex::new(Vec::new()),
                write_attempts: Mutex::new(0),
                creates: Mutex::new(Vec::new()),
                probes: Mutex::new(0),
            }
        }

        pub(crate) fn with_write_results(self, results: Vec<Result<(), SinkError>>) -> Self {
            *self.write_results.lock().unwrap() = results.into();
            self
        }

        pub(crate) fn written_count(&self) -> usize {
            self.written.lock().unwrap().len()
        }

        pub(crate) fn create_count(&self) -> usize {
            self.creates.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl MetricSink for MockSink {
        fn address(&self) -> &str {
            "mock-influx"
        }

        fn database(&self) -> &str {
            "speedtests"
        }

        async fn probe(&self) -> Result<(), SinkError> {
            *self.probes.lock().unwrap() += 1;
            self.probe_result.clone()
        }

        async fn write_points(&self, points: &[Point]) -> Result<(), SinkError> {
            *self.write_attempts.lock().unwrap() += 1;
            let result = self.write_results.lock().unwrap().pop_front().unwrap_or(Ok(()));
            if result.is_ok() {
                self.written.lock().unwrap().extend_from_slice(points);
            }
            result
        }

        async fn create_database(&self, name: &str) -> Result<(), SinkError> {
            self.creates.lock().unwrap().push(name.to_string());
            self.create_result.clone()
        }
    }

    fn point() -> Point {
        Point::new("speed_test_results").with_field("download", 1.0)
    }

    #[tokio::test]
    async fn test_commit_first_try() {
        let sink = MockSink::new();

        let outcome = commit(&sink, &point()).await;

        assert!(matches!(outcome, WriteOutcome::Written));
        assert_eq!(sink.written_count(), 1);
        assert_eq!(sink.create_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_repairs_missing_database() {
        let sink = MockSink::new()
            .with_write_results(vec![Err(SinkError::NotFound("database not found".into()))]);

        let outcome = commit(&sink, &point()).await;

        assert!(matches!(outcome, WriteOutcome::WrittenAfterRepair));
        assert_eq!(sink.written_count(), 1);
        assert_eq!(*sink.creates.lock().unwrap(), vec!["speedtests".to_string()]);
        assert_eq!(*sink.write_attempts.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_commit_retries_only_once() {
        let sink = MockSink::new().with_write_results(vec![
            Err(SinkError::NotFound("database not found".into())),
            Err(SinkError::NotFound("database not found".into())),
        ]);

        let outcome = commit(&sink, &point()).await;

        assert!(matches!(outcome, WriteOutcome::Failed(SinkError::NotFound(_))));
        assert_eq!(sink.written_count(), 0);
        assert_eq!(sink.create_count(), 1);
        assert_eq!(*sink.write_attempts.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_commit_other_failures_never_create() {
        let failures = vec![
            SinkError::Unreachable("connection refused".into()),
            SinkError::Unauthorized(401),
            SinkError::Server {
                status: 500,
                message: "engine error".into(),
            },
            SinkError::Unknown("reset".into()),
        ];

        for failure in failures {
            let sink = MockSink::new().with_write_results(vec![Err(failure)]);

            let outcome = commit(&sink, &point()).await;

            assert!(!outcome.is_written());
            assert_eq!(sink.create_count(), 0);
            assert_eq!(*sink.write_attempts.lock().unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn test_commit_create_failure_skips_retry() {
        let mut sink = MockSink::new()
            .with_write_results(vec![Err(SinkError::NotFound("database not found".into()))]);
        sink.create_result = Err(SinkError::Unauthorized(403));

        let outcome = commit(&sink, &point()).await;

        assert!(matches!(outcome, WriteOutcome::Failed(SinkError::Unauthorized(403))));
        assert_eq!(*sink.write_attempts.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_verify_connection_passes_error_through() {
        let mut sink = MockSink::new();
        sink.probe_result = Err(SinkError::Unauthorized(401));

        let result = verify_connection(&sink).await;

        assert!(matches!(result, Err(SinkError::Unauthorized(401))));
        assert_eq!(*sink.probes.lock().unwrap(), 1);
    }
}
