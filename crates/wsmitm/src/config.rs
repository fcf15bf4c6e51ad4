use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_listen")]
    pub listen_addr: String,
    #[serde(default = "default_upstream")]
    pub upstream_url: String,
    #[serde(default)]
    pub proxy_enabled: bool,
    #[serde(default)]
    pub proxy_url: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen(),
            upstream_url: default_upstream(),
            proxy_enabled: false,
            proxy_url: None,
        }
    }
}

impl NetworkConfig {
    /// The forward proxy to use for the upstream dial, if any.
    ///
    /// Enabling the proxy without a URL is a configuration error.
    pub fn forward_proxy(&self) -> anyhow::Result<Option<String>> {
        if !self.proxy_enabled {
            return Ok(None);
        }
        match &self.proxy_url {
            Some(url) => Ok(Some(url.clone())),
            None => anyhow::bail!("proxy_enabled is set but proxy_url is missing"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    /// Connection attempts allowed per client per window.
    #[serde(default = "default_connection_points")]
    pub connection_points: u32,
    #[serde(default = "default_window_secs")]
    pub connection_window_secs: u64,
    /// Messages allowed per client per window.
    #[serde(default = "default_message_points")]
    pub message_points: u32,
    #[serde(default = "default_window_secs")]
    pub message_window_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            connection_points: default_connection_points(),
            connection_window_secs: default_window_secs(),
            message_points: default_message_points(),
            message_window_secs: default_window_secs(),
        }
    }
}

impl LimitsConfig {
    pub fn connection_window(&self) -> Duration {
        Duration::from_secs(self.connection_window_secs)
    }

    pub fn message_window(&self) -> Duration {
        Duration::from_secs(self.message_window_secs)
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_event_log_path")]
    pub event_log_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            event_log_path: default_event_log_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_upstream() -> String {
    "ws://127.0.0.1:9000".to_string()
}

fn default_connection_points() -> u32 {
    20
}

fn default_message_points() -> u32 {
    100
}

fn default_window_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_event_log_path() -> PathBuf {
    PathBuf::from("events.jsonl")
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a YAML file.
///
/// A missing file yields the default configuration with a warning, so the
/// relay starts with sensible defaults before any config has been written.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "configuration file not found; using defaults"
        );
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    let config: Config = serde_yml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;

    Ok(config)
}
