//! InfluxDB 1.x HTTP client.
//!
//! Speaks the `/query` and `/write` endpoints of the InfluxDB 1.x HTTP API.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use crate::config::SinkConfig;
use crate::sink::{MetricSink, Point, SinkError};

/// Body shape of `/query` responses.
#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Series {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

impl QueryResponse {
    fn first_error(&self) -> Option<&str> {
        self.error
            .as_deref()
            .or_else(|| self.results.iter().find_map(|r| r.error.as_deref()))
    }
}

/// Body shape of `/write` error responses.
#[derive(Debug, Deserialize)]
struct WriteError {
    error: String,
}

/// InfluxDB sink over HTTP.
pub struct InfluxClient {
    client: Client,
    base_url: String,
    address: String,
    database: String,
    credentials: Option<(String, String)>,
}

impl InfluxClient {
    /// Create a client for the configured sink.
    ///
    /// No request is made here; call [`MetricSink::probe`] to verify connectivity.
    ///
    /// # Errors
    /// Returns `SinkError::Client` if the HTTP client cannot be built.
    pub fn new(config: &SinkConfig) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .danger_accept_invalid_certs(config.tls && !config.verify_tls)
            .build()
            .map_err(|e| SinkError::Client(e.to_string()))?;

        let credentials = (!config.username.is_empty())
            .then(|| (config.username.clone(), config.password.clone()));

        Ok(Self {
            client,
            base_url: config.base_url(),
            address: config.address.clone(),
            database: config.database.clone(),
            credentials,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn run_query(&self, q: &str) -> Result<QueryResponse, SinkError> {
        let response = self
            .authorize(self.client.post(self.url("/query")))
            .form(&[("q", q)])
            .send()
            .await?;

        let status = response.status();
        if is_auth_failure(status) {
            return Err(SinkError::Unauthorized(status.as_u16()));
        }

        let text = response.text().await?;
        let body: QueryResponse = serde_json::from_str(&text).unwrap_or_default();

        if !status.is_success() {
            return Err(SinkError::Server {
                status: status.as_u16(),
                message: body.first_error().map(str::to_string).unwrap_or(text),
            });
        }
        if let Some(message) = body.first_error() {
            return Err(SinkError::Server {
                status: status.as_u16(),
                message: message.to_string(),
            });
        }

        Ok(body)
    }
}

impl std::fmt::Debug for InfluxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxClient")
            .field("base_url", &self.base_url)
            .field("database", &self.database)
            .field("authenticated", &self.credentials.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl MetricSink for InfluxClient {
    fn address(&self) -> &str {
        &self.address
    }

    fn database(&self) -> &str {
        &self.database
    }

    async fn probe(&self) -> Result<(), SinkError> {
        let response = self
            .authorize(self.client.get(self.url("/query")))
            .query(&[("q", "SHOW DATABASES")])
            .send()
            .await?;

        let status = response.status();
        if is_auth_failure(status) {
            return Err(SinkError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            return Err(SinkError::Unknown(format!("unexpected status {status}")));
        }

        let body: QueryResponse = read_json(response).await;
        let databases: Vec<&str> = body
            .results
            .iter()
            .flat_map(|r| &r.series)
            .flat_map(|s| &s.values)
            .filter_map(|row| row.first().and_then(|v| v.as_str()))
            .collect();
        tracing::debug!(?databases, "Listed InfluxDB databases");

        Ok(())
    }

    async fn write_points(&self, points: &[Point]) -> Result<(), SinkError> {
        let body = points
            .iter()
            .map(Point::to_line_protocol)
            .collect::<Vec<_>>()
            .join("\n");

        let response = self
            .authorize(self.client.post(self.url("/write")))
            .query(&[("db", self.database.as_str()), ("precision", "ns")])
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if is_auth_failure(status) {
            return Err(SinkError::Unauthorized(status.as_u16()));
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<WriteError>(&text)
            .map(|e| e.error)
            .unwrap_or(text);

        if status == StatusCode::NOT_FOUND {
            Err(SinkError::NotFound(message))
        } else {
            Err(SinkError::Server {
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn create_database(&self, name: &str) -> Result<(), SinkError> {
        let statement = format!("CREATE DATABASE \"{}\"", name.replace('"', "\\\""));
        self.run_query(&statement).await?;
        tracing::info!(database = %name, "Created InfluxDB database");
        Ok(())
    }
}

fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

/// Decode a JSON body, falling back to the default on any failure.
async fn read_json<T: serde::de::DeserializeOwned + Default>(response: Response) -> T {
    match response.text().await {
        Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
        Err(_) => T::default(),
    }
}
