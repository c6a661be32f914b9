//! Bootstrap configuration loading
//!
//! Settings are resolved in priority order:
//! 1. Command-line arguments (applied by the binary)
//! 2. Environment variables
//! 3. TOML config file
//! 4. Compiled defaults
//!
//! A missing config file is never fatal: the service logs a warning and
//! starts with defaults. A config file that exists but fails to parse is an
//! error, since silently ignoring it would hide a misconfiguration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "ITK_CONFIG";

/// Complete bootstrap configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub paths: PathsConfig,
    pub jobs: JobsConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Rendering backend location and handshake ceilings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// Host name or IP of the node-graph backend
    pub address: String,
    pub port: u16,
    /// Readiness probe attempts before proceeding anyway
    pub readiness_attempts: u32,
    pub readiness_interval_ms: u64,
    /// Event-stream connection attempts before proceeding anyway
    pub stream_attempts: u32,
    pub stream_interval_ms: u64,
    /// Per-request timeout of the readiness probe
    pub probe_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8188,
            readiness_attempts: 60,
            readiness_interval_ms: 1000,
            stream_attempts: 5,
            stream_interval_ms: 2000,
            probe_timeout_ms: 5000,
        }
    }
}

impl BackendConfig {
    /// Base HTTP endpoint, with trailing slash
    pub fn base_url(&self) -> String {
        format!("http://{}:{}/", self.address, self.port)
    }

    /// Event-stream endpoint for the given client id
    pub fn stream_url(&self, client_id: &str) -> String {
        format!("ws://{}:{}/ws?clientId={}", self.address, self.port, client_id)
    }

    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }

    pub fn stream_interval(&self) -> Duration {
        Duration::from_millis(self.stream_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding the workflow graph templates
    pub templates_dir: PathBuf,
    /// Bundled example media used when a request omits its own
    pub examples_dir: PathBuf,
    /// Parent of the per-job scratch directories
    pub work_dir: PathBuf,
    /// Durable shared storage for `network_volume` requests
    pub network_volume_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            templates_dir: PathBuf::from("/"),
            examples_dir: PathBuf::from("/examples"),
            work_dir: PathBuf::from("."),
            network_volume_dir: PathBuf::from("/runpod-volume"),
        }
    }
}

/// Job retention settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct JobsConfig {
    /// Terminal jobs older than this are evicted from the store
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retention_secs: 24 * 60 * 60,
            sweep_interval_secs: 60,
        }
    }
}

impl JobsConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Read and parse a config file that must exist
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read config {} failed: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load the TOML layer
    ///
    /// An explicit path (CLI or `ITK_CONFIG`) must exist. Otherwise the
    /// platform default locations are searched, falling back to compiled
    /// defaults when none is present.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            info!("Loading config from {}", path.display());
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            info!("Loading config from {} ({})", path.display(), CONFIG_PATH_ENV);
            return Self::from_file(&path);
        }

        match find_default_config_file() {
            Some(path) => {
                info!("Loading config from {}", path.display());
                Self::from_file(&path)
            }
            None => {
                warn!("No config file found, using compiled defaults");
                Ok(Self::default())
            }
        }
    }

    /// Apply overrides from an arbitrary key lookup
    ///
    /// `SERVER_ADDRESS` and `PORT` keep the names used by the container
    /// images this service ships in.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("SERVER_ADDRESS") {
            self.backend.address = address;
        }
        if let Some(port) = parse_override::<u16>(&lookup, "PORT") {
            self.server.port = port;
        }
        if let Some(port) = parse_override::<u16>(&lookup, "ITK_BACKEND_PORT") {
            self.backend.port = port;
        }
        if let Some(dir) = lookup("ITK_TEMPLATES_DIR") {
            self.paths.templates_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("ITK_EXAMPLES_DIR") {
            self.paths.examples_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("ITK_WORK_DIR") {
            self.paths.work_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("ITK_NETWORK_VOLUME_DIR") {
            self.paths.network_volume_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup("ITK_LOG_LEVEL") {
            self.logging.level = level;
        }
    }
}

fn parse_override<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid {} override: {:?}", key, raw);
            None
        }
    }
}

/// First existing config file among the platform default locations
pub fn find_default_config_file() -> Option<PathBuf> {
    default_config_locations().into_iter().find(|p| p.exists())
}

fn default_config_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join("infinitetalk").join("config.toml"));
    }
    if cfg!(unix) {
        locations.push(PathBuf::from("/etc/infinitetalk/config.toml"));
    }
    locations
}
