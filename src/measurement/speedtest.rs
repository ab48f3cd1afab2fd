//! speedtest.net measurement provider.
//!
//! Talks to the public speedtest.net HTTP endpoints: a configuration document
//! locating the client, a static server list, and per-server `latency.txt`,
//! `random{N}x{N}.jpg` and `upload.php` resources.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::measurement::{Phase, ProviderError, Server, SpeedTester};

/// Default configuration document.
pub const DEFAULT_CONFIG_URL: &str = "https://www.speedtest.net/speedtest-config.php";

/// Default server list.
pub const DEFAULT_SERVERS_URL: &str = "https://www.speedtest.net/speedtest-servers-static.php";

/// Latency assigned to a failed probe (one hour, in ms).
const FAILED_LATENCY_MS: f64 = 3_600_000.0;

/// Expected body of `latency.txt`.
const LATENCY_BODY: &str = "test=test";

const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; influx-speedtest/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Upload payload alphabet.
const PAYLOAD_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Tunables for the speedtest.net provider.
#[derive(Debug, Clone)]
pub struct SpeedtestSettings {
    /// Configuration document URL.
    pub config_url: String,
    /// Server list URL.
    pub servers_url: String,
    /// Closest servers kept for latency probing.
    pub closest_candidates: usize,
    /// Latency probes per candidate.
    pub latency_samples: usize,
    /// Image edge sizes fetched during download.
    pub download_sizes: Vec<u32>,
    /// Fetches per download size.
    pub download_repeats: usize,
    /// Payload sizes in bytes posted during upload.
    pub upload_sizes: Vec<usize>,
    /// Posts per upload size.
    pub upload_repeats: usize,
    /// Concurrent transfer connections.
    pub connections: usize,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for SpeedtestSettings {
    fn default() -> Self {
        Self {
            config_url: DEFAULT_CONFIG_URL.to_string(),
            servers_url: DEFAULT_SERVERS_URL.to_string(),
            closest_candidates: 5,
            latency_samples: 3,
            download_sizes: vec![350, 500, 750, 1000, 1500, 2000, 2500, 3000, 3500, 4000],
            download_repeats: 4,
            upload_sizes: vec![262_144, 524_288, 1_048_576],
            upload_repeats: 8,
            connections: 4,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl SpeedtestSettings {
    /// Point both documents at another host, e.g. a mirror or a test server.
    pub fn with_endpoints(
        mut self,
        config_url: impl Into<String>,
        servers_url: impl Into<String>,
    ) -> Self {
        self.config_url = config_url.into();
        self.servers_url = servers_url.into();
        self
    }

    /// Set download image sizes and repeat count.
    pub fn with_download(mut self, sizes: Vec<u32>, repeats: usize) -> Self {
        self.download_sizes = sizes;
        self.download_repeats = repeats;
        self
    }

    /// Set upload payload sizes and repeat count.
    pub fn with_upload(mut self, sizes: Vec<usize>, repeats: usize) -> Self {
        self.upload_sizes = sizes;
        self.upload_repeats = repeats;
        self
    }

    /// Set the number of concurrent transfer connections.
    pub fn with_connections(mut self, connections: usize) -> Self {
        self.connections = connections;
        self
    }
}

/// Client location reported by the configuration document.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientInfo {
    pub ip: String,
    pub isp: String,
    pub lat: f64,
    pub lon: f64,
}

/// speedtest.net provider.
pub struct SpeedtestNet {
    settings: SpeedtestSettings,
    client: Client,
}

impl SpeedtestNet {
    /// Create a provider.
    ///
    /// # Errors
    /// Returns `ProviderError::ConfigRetrieval` if the HTTP client cannot be built.
    pub fn new(settings: SpeedtestSettings) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| {
                ProviderError::ConfigRetrieval(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { settings, client })
    }

    async fn fetch_text(&self, url: &str) -> Result<String, reqwest::Error> {
        self.client
            .get(url)
            .query(&[("x", cache_buster())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    /// Average of the latency probes for one server, halved to a one-way figure.
    async fn measure_latency(&self, server: &Server) -> f64 {
        let url = format!("{}/latency.txt", server_dir(&server.url));
        let samples = self.settings.latency_samples.max(1);
        let mut total_ms = 0.0;

        for _ in 0..samples {
            let start = Instant::now();
            let ok = match self.fetch_text(&url).await {
                Ok(body) => body.trim() == LATENCY_BODY,
                Err(e) => {
                    tracing::debug!(server = %server.id, error = %e, "Latency probe failed");
                    false
                }
            };
            total_ms += if ok {
                start.elapsed().as_secs_f64() * 1000.0
            } else {
                FAILED_LATENCY_MS
            };
        }

        let one_way = total_ms / (samples as f64 * 2.0);
        (one_way * 1000.0).round() / 1000.0
    }
}

impl std::fmt::Debug for SpeedtestNet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeedtestNet")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl SpeedTester for SpeedtestNet {
    type Session = ClientInfo;

    async fn open_session(&self) -> Result<ClientInfo, ProviderError> {
        let body = self
            .fetch_text(&self.settings.config_url)
            .await
            .map_err(|e| ProviderError::ConfigRetrieval(e.to_string()))?;

        let info = parse_client(&body).ok_or_else(|| {
            ProviderError::ConfigRetrieval("configuration has no client element".to_string())
        })?;

        tracing::debug!(ip = %info.ip, isp = %info.isp, "Retrieved speedtest configuration");
        Ok(info)
    }

    async fn list_servers(
        &self,
        session: &ClientInfo,
        filter: &[String],
    ) -> Result<Vec<Server>, ProviderError> {
        for target in filter {
            if target.trim().parse::<u32>().is_err() {
                return Err(ProviderError::InvalidServerId(target.clone()));
            }
        }

        let body = self
            .fetch_text(&self.settings.servers_url)
            .await
            .map_err(|e| ProviderError::ServersRetrieval(e.to_string()))?;

        let mut servers: Vec<Server> = parse_servers(&body, session)
            .into_iter()
            .filter(|s| filter.is_empty() || filter.iter().any(|t| t.trim() == s.id))
            .collect();

        if servers.is_empty() {
            return Err(ProviderError::NoMatchedServers(filter.to_vec()));
        }

        servers.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        servers.truncate(self.settings.closest_candidates.max(1));

        tracing::debug!(candidates = servers.len(), "Retrieved server list");
        Ok(servers)
    }

    async fn select_best(
        &self,
        _session: &ClientInfo,
        servers: Vec<Server>,
    ) -> Result<Server, ProviderError> {
        let mut best: Option<Server> = None;

        for mut server in servers {
            let latency = self.measure_latency(&server).await;
            tracing::debug!(server = %server.id, latency_ms = latency, "Measured server latency");

            if latency >= FAILED_LATENCY_MS / 2.0 {
                continue;
            }
            if best
                .as_ref()
                .and_then(|b| b.latency_ms)
                .is_none_or(|current| latency < current)
            {
                server.latency_ms = Some(latency);
                best = Some(server);
            }
        }

        best.ok_or_else(|| ProviderError::BestServer("no server answered latency probes".into()))
    }

    async fn download(&self, _session: &ClientInfo, server: &Server) -> Result<f64, ProviderError> {
        let dir = server_dir(&server.url);
        let urls: Vec<String> = self
            .settings
            .download_sizes
            .iter()
            .flat_map(|size| {
                std::iter::repeat_n(
                    format!("{dir}/random{size}x{size}.jpg"),
                    self.settings.download_repeats,
                )
            })
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.settings.connections.max(1)));
        let mut tasks = JoinSet::new();
        let start = Instant::now();

        for url in urls {
            let client = self.client.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|e| e.to_string())?;
                let mut response = client
                    .get(&url)
                    .query(&[("x", cache_buster())])
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| e.to_string())?;

                let mut received = 0u64;
                while let Some(chunk) = response.chunk().await.map_err(|e| e.to_string())? {
                    received += chunk.len() as u64;
                }
                Ok::<u64, String>(received)
            });
        }

        let total = drain(tasks, Phase::Download).await?;
        Ok(bits_per_second(total, start.elapsed()))
    }

    async fn upload(&self, _session: &ClientInfo, server: &Server) -> Result<f64, ProviderError> {
        let semaphore = Arc::new(Semaphore::new(self.settings.connections.max(1)));
        let mut tasks = JoinSet::new();
        let start = Instant::now();

        for &size in &self.settings.upload_sizes {
            let payload = upload_payload(size);
            for _ in 0..self.settings.upload_repeats {
                let client = self.client.clone();
                let semaphore = Arc::clone(&semaphore);
                let url = server.url.clone();
                let body = payload.clone();
                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.map_err(|e| e.to_string())?;
                    client
                        .post(&url)
                        .header(
                            reqwest::header::CONTENT_TYPE,
                            "application/x-www-form-urlencoded",
                        )
                        .body(body)
                        .send()
                        .await
                        .and_then(|r| r.error_for_status())
                        .map_err(|e| e.to_string())?;
                    Ok::<u64, String>(size as u64)
                });
            }
        }

        let total = drain(tasks, Phase::Upload).await?;
        Ok(bits_per_second(total, start.elapsed()))
    }
}

/// Wait for every transfer, summing bytes; the first failure aborts the rest.
async fn drain(mut tasks: JoinSet<Result<u64, String>>, phase: Phase) -> Result<u64, ProviderError> {
    let mut total = 0u64;
    while let Some(joined) = tasks.join_next().await {
        let message = match joined {
            Ok(Ok(bytes)) => {
                total += bytes;
                continue;
            }
            Ok(Err(message)) => message,
            Err(e) => e.to_string(),
        };
        tasks.abort_all();
        return Err(ProviderError::Transfer { phase, message });
    }
    Ok(total)
}

fn bits_per_second(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 * 8.0 / secs
}

fn cache_buster() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
        .to_string()
}

/// Directory holding a server's test files.
fn server_dir(url: &str) -> &str {
    url.rsplit_once('/').map_or(url, |(dir, _)| dir)
}

/// `content1=` followed by the payload alphabet, `size` bytes in total.
fn upload_payload(size: usize) -> Vec<u8> {
    let mut payload = b"content1=".to_vec();
    payload.extend(PAYLOAD_CHARS.iter().cycle().take(size.saturating_sub(payload.len())));
    payload.truncate(size);
    payload
}

/// Attributes of every `<tag>` element in `document`, with entities decoded.
///
/// Parsing stops at the first syntax error; elements read up to that point
/// are kept.
fn elements(document: &str, tag: &str) -> Vec<HashMap<String, String>> {
    let mut reader = Reader::from_str(document);
    let mut found = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e) | Event::Empty(e)) if e.name().as_ref() == tag.as_bytes() => {
                let attrs = e
                    .attributes()
                    .filter_map(Result::ok)
                    .map(|attr| {
                        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                        let value = match attr.unescape_value() {
                            Ok(value) => value.into_owned(),
                            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
                        };
                        (key, value)
                    })
                    .collect();
                found.push(attrs);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(
                    position = reader.buffer_position(),
                    error = %e,
                    "Malformed speedtest document"
                );
                break;
            }
        }
    }

    found
}

/// Extract the `<client .../>` element of the configuration document.
pub fn parse_client(document: &str) -> Option<ClientInfo> {
    let attrs = elements(document, "client").into_iter().next()?;
    let text = |key: &str| attrs.get(key).cloned().unwrap_or_default();

    Some(ClientInfo {
        ip: text("ip"),
        isp: text("isp"),
        lat: attrs.get("lat")?.parse().ok()?,
        lon: attrs.get("lon")?.parse().ok()?,
    })
}

/// Extract every `<server .../>` element, computing distance from the client.
///
/// Entries without an id, url or coordinates are skipped.
pub fn parse_servers(document: &str, client: &ClientInfo) -> Vec<Server> {
    elements(document, "server")
        .into_iter()
        .filter_map(|mut attrs| {
            let lat: f64 = attrs.get("lat")?.parse().ok()?;
            let lon: f64 = attrs.get("lon")?.parse().ok()?;
            let id = attrs.remove("id")?;
            let url = attrs.remove("url")?;
            let mut text = |key: &str| attrs.remove(key).unwrap_or_default();

            Some(Server {
                id,
                name: text("name"),
                sponsor: text("sponsor"),
                country: text("country"),
                url,
                distance_km: distance_km((client.lat, client.lon), (lat, lon)),
                latency_ms: None,
            })
        })
        .collect()
}

/// Haversine distance in km.
fn distance_km(origin: (f64, f64), destination: (f64, f64)) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let (lat1, lon1) = origin;
    let (lat2, lon2) = destination;
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}
