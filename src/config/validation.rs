//! Configuration error type and permissive value parsers.
//!
//! Every parser here returns `None` on malformed input so callers can fall
//! back to the documented default instead of failing the whole load.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Configuration error types.
///
/// Any of these is fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file does not exist.
    #[error("unable to load config file: {}", .0.display())]
    NotFound(PathBuf),

    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse the INI document.
    #[error("failed to parse config file: {0}")]
    ParseError(#[from] ini::ParseError),

    /// `sink.address` is absent or empty.
    #[error("config option \"sink.address\" is required")]
    MissingAddress,
}

/// Parse a boolean the way INI readers traditionally do.
///
/// Accepts `1/yes/true/on` and `0/no/false/off`, case-insensitive.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a TCP port. Zero is rejected.
pub fn parse_port(s: &str) -> Option<u16> {
    s.trim().parse::<u16>().ok().filter(|p| *p != 0)
}

/// Parse a positive duration.
///
/// A bare integer is read as seconds; anything else goes through humantime,
/// so `300`, `5m` and `1h 30m` are all accepted.
///
/// # Examples
///
/// ```
/// use influx_speedtest::config::parse_seconds;
///
/// assert_eq!(parse_seconds("300").unwrap().as_secs(), 300);
/// assert_eq!(parse_seconds("5m").unwrap().as_secs(), 300);
/// assert!(parse_seconds("0").is_none());
/// ```
pub fn parse_seconds(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let duration = match s.parse::<i64>() {
        Ok(secs) if secs > 0 => Duration::from_secs(secs as u64),
        Ok(_) => return None,
        Err(_) => humantime::parse_duration(s).ok()?,
    };

    (!duration.is_zero()).then_some(duration)
}

/// Split a comma-separated target list, trimming items and dropping empties.
pub fn parse_targets(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Expand environment variables in a string.
/// Supports ${VAR} and ${VAR:-default} syntax.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("failed to compile env var regex")
    });

    regex
        .replace_all(input, |caps: &regex::Captures| {
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(&caps[1]).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}
