//! Shared fakes for integration tests: a minimal InfluxDB 1.x HTTP API and a
//! speedtest.net look-alike, both served by axum on a random local port.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Form, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use influx_speedtest::{SinkConfig, SpeedtestSettings};
use serde_json::json;
use tokio::net::TcpListener;

/// `Authorization` header for `admin:secret`.
pub const BASIC_ADMIN_SECRET: &str = "Basic YWRtaW46c2VjcmV0";

/// Serve `router` on 127.0.0.1 and return its base URL.
pub async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{}", addr)
}

/// Port nobody listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    listener.local_addr().expect("Failed to get local addr").port()
}

fn port_of(base_url: &str) -> u16 {
    base_url
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .expect("base url has a port")
}

// =============================================================================
// Fake InfluxDB
// =============================================================================

#[derive(Debug, Default)]
pub struct InfluxState {
    pub databases: HashSet<String>,
    /// `(database, body)` for every accepted write.
    pub writes: Vec<(String, String)>,
    pub creates: usize,
    pub write_attempts: usize,
    /// Expected `Authorization` header; any request without it gets 401.
    pub auth: Option<String>,
    /// Answer every write with 500.
    pub fail_writes: bool,
    /// Answer `SHOW DATABASES` with 500.
    pub fail_queries: bool,
}

#[derive(Clone)]
pub struct FakeInflux {
    pub state: Arc<Mutex<InfluxState>>,
    pub base_url: String,
}

impl FakeInflux {
    pub async fn start(state: InfluxState) -> Self {
        let state = Arc::new(Mutex::new(state));
        let router = Router::new()
            .route("/query", get(show_databases).post(run_query))
            .route("/write", axum::routing::post(write))
            .with_state(Arc::clone(&state));

        let base_url = serve(router).await;
        Self { state, base_url }
    }

    /// Sink configuration pointing at this fake.
    pub fn sink_config(&self, database: &str) -> SinkConfig {
        SinkConfig::new("127.0.0.1")
            .with_port(port_of(&self.base_url))
            .with_database(database)
            .with_timeout(Duration::from_secs(2))
    }

    pub fn creates(&self) -> usize {
        self.state.lock().unwrap().creates
    }

    pub fn writes(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn write_attempts(&self) -> usize {
        self.state.lock().unwrap().write_attempts
    }
}

type Shared = Arc<Mutex<InfluxState>>;

fn authorized(state: &InfluxState, headers: &HeaderMap) -> bool {
    match &state.auth {
        None => true,
        Some(expected) => headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == expected),
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(json!({"error": "authorization failed"})),
    )
        .into_response()
}

async fn show_databases(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let state = state.lock().unwrap();
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    if state.fail_queries {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(json!({"error": "internal error"})),
        )
            .into_response();
    }
    if params.get("q").map(String::as_str) != Some("SHOW DATABASES") {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({"error": "unsupported query"})),
        )
            .into_response();
    }

    let mut names: Vec<&String> = state.databases.iter().collect();
    names.sort();
    let values: Vec<_> = names.into_iter().map(|n| json!([n])).collect();

    axum::Json(json!({
        "results": [{
            "statement_id": 0,
            "series": [{"name": "databases", "columns": ["name"], "values": values}]
        }]
    }))
    .into_response()
}

async fn run_query(
    State(state): State<Shared>,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    let mut state = state.lock().unwrap();
    if !authorized(&state, &headers) {
        return unauthorized();
    }

    let q = params.get("q").cloned().unwrap_or_default();
    let Some(name) = q.strip_prefix("CREATE DATABASE ") else {
        return axum::Json(json!({
            "results": [{"statement_id": 0, "error": "unsupported statement"}]
        }))
        .into_response();
    };

    state.databases.insert(name.trim_matches('"').to_string());
    state.creates += 1;
    axum::Json(json!({"results": [{"statement_id": 0}]})).into_response()
}

async fn write(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    let mut state = state.lock().unwrap();
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    state.write_attempts += 1;

    if state.fail_writes {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(json!({"error": "engine failure"})),
        )
            .into_response();
    }

    let db = params.get("db").cloned().unwrap_or_default();
    if !state.databases.contains(&db) {
        return (
            StatusCode::NOT_FOUND,
            axum::Json(json!({"error": format!("database not found: \"{db}\"")})),
        )
            .into_response();
    }

    state.writes.push((db, body));
    StatusCode::NO_CONTENT.into_response()
}

// =============================================================================
// Fake speedtest.net
// =============================================================================

/// Size of every fake `random{N}x{N}.jpg`, large enough to arrive in several chunks.
pub const IMAGE_BYTES: usize = 262_144;

#[derive(Debug, Default)]
pub struct SpeedtestState {
    pub config_fails: bool,
    pub servers_fail: bool,
    /// Server directories whose latency probe answers 500.
    pub dead: HashSet<String>,
    /// Server directories whose transfers answer 500.
    pub broken_transfers: HashSet<String>,
    pub uploads: usize,
    pub downloads: usize,
}

#[derive(Clone)]
pub struct FakeSpeedtest {
    pub state: Arc<Mutex<SpeedtestState>>,
    pub base_url: String,
}

/// Servers listed by the fake, as `(id, dir, lat, lon, name, country)`.
///
/// The client sits in Amsterdam; `near` is closest, `far` is furthest.
pub const SERVERS: &[(&str, &str, f64, f64, &str, &str)] = &[
    ("3003", "far", 40.7128, -74.0060, "New York, NY", "United States"),
    ("1001", "near", 52.3667, 4.9000, "Amsterdam", "Netherlands"),
    ("2002", "mid", 50.8503, 4.3517, "Brussels", "Belgium"),
];

impl FakeSpeedtest {
    pub async fn start(state: SpeedtestState) -> Self {
        let state = Arc::new(Mutex::new(state));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind random port");
        let addr = listener.local_addr().expect("Failed to get local addr");
        let base_url = format!("http://{}", addr);

        let router = Router::new()
            .route("/speedtest-config.php", get(config_document))
            .route("/servers.php", get(servers_document))
            .route("/{dir}/{file}", get(serve_file).post(accept_upload))
            .with_state(SpeedtestApp {
                state: Arc::clone(&state),
                base_url: base_url.clone(),
            });

        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { state, base_url }
    }

    /// Provider settings pointing at this fake with small transfers.
    pub fn settings(&self) -> SpeedtestSettings {
        SpeedtestSettings::default()
            .with_endpoints(
                format!("{}/speedtest-config.php", self.base_url),
                format!("{}/servers.php", self.base_url),
            )
            .with_download(vec![350, 500], 2)
            .with_upload(vec![1024, 2048], 2)
            .with_connections(2)
    }

    pub fn uploads(&self) -> usize {
        self.state.lock().unwrap().uploads
    }

    pub fn downloads(&self) -> usize {
        self.state.lock().unwrap().downloads
    }
}

#[derive(Clone)]
struct SpeedtestApp {
    state: Arc<Mutex<SpeedtestState>>,
    base_url: String,
}

async fn config_document(State(app): State<SpeedtestApp>) -> Response {
    if app.state.lock().unwrap().config_fails {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    r#"<?xml version="1.0" encoding="UTF-8"?>
<settings>
<client ip="203.0.113.7" lat="52.3740" lon="4.8897" isp="Example ISP" isprating="3.7" country="NL" />
</settings>"#
        .into_response()
}

async fn servers_document(State(app): State<SpeedtestApp>) -> Response {
    if app.state.lock().unwrap().servers_fail {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let entries: String = SERVERS
        .iter()
        .map(|(id, dir, lat, lon, name, country)| {
            format!(
                r#"<server url="{base}/{dir}/upload.php" lat="{lat}" lon="{lon}" name="{name}" country="{country}" cc="XX" sponsor="Sponsor {id}" id="{id}" host="{host}" />"#,
                base = app.base_url,
                host = app.base_url.trim_start_matches("http://"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!("<settings>\n<servers>\n{entries}\n</servers>\n</settings>").into_response()
}

async fn serve_file(
    State(app): State<SpeedtestApp>,
    Path((dir, file)): Path<(String, String)>,
) -> Response {
    let mut state = app.state.lock().unwrap();

    if file == "latency.txt" {
        if state.dead.contains(&dir) {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        return "test=test".into_response();
    }

    if file.starts_with("random") && file.ends_with(".jpg") {
        if state.broken_transfers.contains(&dir) {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        state.downloads += 1;
        return vec![b'x'; IMAGE_BYTES].into_response();
    }

    StatusCode::NOT_FOUND.into_response()
}

async fn accept_upload(
    State(app): State<SpeedtestApp>,
    Path((dir, file)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let mut state = app.state.lock().unwrap();
    if file != "upload.php" {
        return StatusCode::NOT_FOUND.into_response();
    }
    if state.broken_transfers.contains(&dir) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    state.uploads += 1;
    format!("size={}", body.len()).into_response()
}
