//! Application configuration structures.

use std::path::Path;
use std::time::Duration;

use ini::{Ini, ParseOption, Properties};
use strum_macros::{AsRefStr, Display, EnumString};

use super::validation::{
    ConfigError, expand_env_vars, parse_bool, parse_port, parse_seconds, parse_targets,
};

// =============================================================================
// Constants
// =============================================================================

/// Environment variable holding the configuration file path.
pub const CONFIG_PATH_ENV: &str = "INFLUXSPEEDTESTCONFIG";

/// Configuration file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config.ini";

/// Default delay between test cycles (5 minutes).
pub const DEFAULT_DELAY: Duration = Duration::from_secs(300);

/// Default InfluxDB HTTP port.
pub const DEFAULT_SINK_PORT: u16 = 8086;

/// Default InfluxDB database.
pub const DEFAULT_SINK_DATABASE: &str = "speedtests";

/// Default bound on every sink request, including the startup probe.
pub const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// General Configuration
// =============================================================================

/// `[general]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneralConfig {
    /// Wait between the end of one cycle and the start of the next.
    pub delay: Duration,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
        }
    }
}

// =============================================================================
// Sink Configuration
// =============================================================================

/// `[sink]` section: InfluxDB connection parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct SinkConfig {
    /// Host name or IP address. Required.
    pub address: String,

    /// HTTP port (default: 8086).
    pub port: u16,

    /// Database receiving the points (default: "speedtests").
    pub database: String,

    /// Username; authentication is skipped when empty.
    pub username: String,

    /// Password.
    pub password: String,

    /// Use HTTPS (default: false).
    pub tls: bool,

    /// Verify the server certificate when `tls` is on (default: true).
    pub verify_tls: bool,

    /// Per-request timeout (default: 5s).
    pub timeout: Duration,
}

impl SinkConfig {
    /// Create a sink configuration with defaults for everything but the address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: DEFAULT_SINK_PORT,
            database: DEFAULT_SINK_DATABASE.to_string(),
            username: String::new(),
            password: String::new(),
            tls: false,
            verify_tls: true,
            timeout: DEFAULT_SINK_TIMEOUT,
        }
    }

    /// Base URL of the InfluxDB HTTP API, e.g. `http://influxdb:8086`.
    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("{scheme}://[{}]:{}", self.address, self.port)
        } else {
            format!("{scheme}://{}:{}", self.address, self.port)
        }
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the database.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkConfig")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("tls", &self.tls)
            .field("verify_tls", &self.verify_tls)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Speedtest Configuration
// =============================================================================

/// `[speedtest]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeedtestConfig {
    /// Server ids to test against, in order. Empty means auto-select.
    pub targets: Vec<String>,
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Log verbosity accepted in `[logging] level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    #[default]
    Debug,
    Info,
    #[strum(to_string = "warning", serialize = "warn")]
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Equivalent `tracing` filter directive.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical => "error",
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Verbosity (default: debug).
    pub level: LogLevel,
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Scheduling.
    pub general: GeneralConfig,

    /// InfluxDB connection.
    pub sink: SinkConfig,

    /// Test targets.
    pub speedtest: SpeedtestConfig,

    /// Log verbosity.
    pub logging: LoggingConfig,

    /// Malformed values that were replaced by their default, for the caller to
    /// log once logging is installed.
    pub warnings: Vec<String>,
}

impl AppConfig {
    /// Resolve the configuration path from the environment.
    pub fn path_from_env() -> std::path::PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(Into::into)
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.into())
    }

    /// Load configuration from an INI file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file is missing, unreadable or unparsable,
    /// or if `sink.address` is absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_ini_str(&content)
    }

    /// Build configuration from INI text.
    ///
    /// Values are taken literally: backslashes and quotes are not interpreted.
    /// Malformed optional values fall back to their defaults and are listed in
    /// [`AppConfig::warnings`].
    pub fn from_ini_str(content: &str) -> Result<Self, ConfigError> {
        let options = ParseOption {
            enabled_quote: false,
            enabled_escape: false,
            ..Default::default()
        };
        let ini = Ini::load_from_str_opt(content, options)?;

        let general = section(&ini, &["general"]);
        let sink = section(&ini, &["sink", "influxdb"]);
        let speedtest = section(&ini, &["speedtest"]);
        let logging = section(&ini, &["logging"]);
        let mut warnings = Vec::new();

        let address = value(sink, &["address"])
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or(ConfigError::MissingAddress)?;

        let mut sink_config = SinkConfig::new(address);
        if let Some(port) = checked(value(sink, &["port"]), "sink.port", parse_port, &mut warnings) {
            sink_config.port = port;
        }
        if let Some(database) = value(sink, &["database"]).filter(|d| !d.trim().is_empty()) {
            sink_config.database = database.trim().to_string();
        }
        if let Some(username) = value(sink, &["username"]) {
            sink_config.username = expand_env_vars(username);
        }
        if let Some(password) = value(sink, &["password"]) {
            sink_config.password = expand_env_vars(password);
        }
        if let Some(tls) = checked(value(sink, &["tls", "ssl"]), "sink.tls", parse_bool, &mut warnings) {
            sink_config.tls = tls;
        }
        if let Some(verify) = checked(
            value(sink, &["verify_tls", "verify_ssl"]),
            "sink.verify_tls",
            parse_bool,
            &mut warnings,
        ) {
            sink_config.verify_tls = verify;
        }
        if let Some(timeout) =
            checked(value(sink, &["timeout"]), "sink.timeout", parse_seconds, &mut warnings)
        {
            sink_config.timeout = timeout;
        }

        let delay = checked(value(general, &["delay"]), "general.delay", parse_seconds, &mut warnings)
            .unwrap_or(DEFAULT_DELAY);

        let targets = value(speedtest, &["servers", "server"])
            .map(parse_targets)
            .unwrap_or_default();

        let level = checked(
            value(logging, &["level"]),
            "logging.level",
            |raw| raw.trim().parse().ok(),
            &mut warnings,
        )
        .unwrap_or_default();

        Ok(Self {
            general: GeneralConfig { delay },
            sink: sink_config,
            speedtest: SpeedtestConfig { targets },
            logging: LoggingConfig { level },
            warnings,
        })
    }
}

/// Parse an optional value, noting it in `warnings` when present but malformed.
fn checked<T>(
    raw: Option<&str>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
    warnings: &mut Vec<String>,
) -> Option<T> {
    let raw = raw?;
    let parsed = parse(raw);
    if parsed.is_none() {
        warnings.push(format!("invalid value {raw:?} for {key}, using default"));
    }
    parsed
}

/// First section present among `names`.
fn section<'a>(ini: &'a Ini, names: &[&str]) -> Option<&'a Properties> {
    names.iter().find_map(|name| ini.section(Some(*name)))
}

/// First key present among `keys` in an optional section.
fn value<'a>(props: Option<&'a Properties>, keys: &[&str]) -> Option<&'a str> {
    let props = props?;
    keys.iter().find_map(|key| props.get(*key))
}
