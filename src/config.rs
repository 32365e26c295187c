use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_TRAFFIC_THRESHOLD: f64 = 0.8;
pub const DEFAULT_MAP_CENTER: [f64; 2] = [-80.72, -0.95];
pub const DEFAULT_MAP_ZOOM: u8 = 13;

const PLACEHOLDER_MAP_TOKEN: &str = "your-mapbox-public-token-here";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub backend: Option<BackendSection>,
    #[serde(default)]
    pub monitor: Option<MonitorSection>,
    #[serde(default)]
    pub map: Option<MapSection>,
    #[serde(default)]
    pub server: Option<ServerSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendSection {
    /// Base URL of the traffic backend, normalized before use
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorSection {
    /// Quiet period after the last viewport settle before a query is issued
    pub debounce_ms: Option<u64>,
    /// Speed ratio under which a region counts as having traffic
    pub traffic_threshold: Option<f64>,
    /// Per-request timeout; unset leaves it to the transport
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MapSection {
    pub access_token: Option<String>,
    /// `[lon, lat]`
    pub default_center: Option<[f64; 2]>,
    pub default_zoom: Option<u8>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8080)
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapTokenStatus {
    Missing,
    Placeholder,
    Configured,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

/// Normalize a configured backend URL: default host, default `http://`
/// scheme, no trailing slash.
pub fn normalize_backend_url(raw: Option<&str>) -> String {
    let trimmed = raw.unwrap_or("").trim();
    if trimmed.is_empty() {
        return DEFAULT_BACKEND_URL.to_string();
    }

    let mut url = trimmed.to_string();
    if let Some(port) = url.strip_prefix(':')
        && port.starts_with(|c: char| c.is_ascii_digit())
    {
        url = format!("http://localhost:{port}");
    }

    let lower = url.to_ascii_lowercase();
    if !lower.starts_with("http://") && !lower.starts_with("https://") {
        url = format!("http://{url}");
    }

    if url.ends_with('/') {
        url.pop();
    }
    url
}

impl Config {
    pub fn backend_url(&self) -> String {
        let raw = self.backend.as_ref().and_then(|b| b.url.as_deref());
        normalize_backend_url(raw)
    }

    /// Returns the debounce delay (default: 500 ms)
    pub fn debounce(&self) -> Duration {
        let millis = self
            .monitor
            .as_ref()
            .and_then(|m| m.debounce_ms)
            .unwrap_or(DEFAULT_DEBOUNCE_MS);
        Duration::from_millis(millis)
    }

    pub fn traffic_threshold(&self) -> f64 {
        self.monitor
            .as_ref()
            .and_then(|m| m.traffic_threshold)
            .filter(|t| t.is_finite() && *t > 0.0 && *t <= 1.0)
            .unwrap_or(DEFAULT_TRAFFIC_THRESHOLD)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.monitor
            .as_ref()
            .and_then(|m| m.request_timeout_secs)
            .map(Duration::from_secs)
    }

    pub fn map_token_status(&self) -> MapTokenStatus {
        match self.map.as_ref().and_then(|m| m.access_token.as_deref()) {
            None => MapTokenStatus::Missing,
            Some(token) if token.trim().is_empty() => MapTokenStatus::Missing,
            Some(PLACEHOLDER_MAP_TOKEN) => MapTokenStatus::Placeholder,
            Some(_) => MapTokenStatus::Configured,
        }
    }

    /// Returns the initial map center as `[lon, lat]`
    pub fn map_center(&self) -> [f64; 2] {
        self.map
            .as_ref()
            .and_then(|m| m.default_center)
            .unwrap_or(DEFAULT_MAP_CENTER)
    }

    pub fn map_zoom(&self) -> u8 {
        self.map
            .as_ref()
            .and_then(|m| m.default_zoom)
            .unwrap_or(DEFAULT_MAP_ZOOM)
    }

    /// Returns the server port (default: 8080)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }
}
