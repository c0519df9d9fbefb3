//! Configuration management.
//!
//! weft configuration can come from:
//! - Environment variables (WEFT_*)
//! - Config file (~/.config/weft/config.toml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// weft configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Run engine limits
    #[serde(default)]
    pub engine: EngineConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Waiting-run poller
    #[serde(default)]
    pub poller: PollerConfig,

    /// Credential source
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Outbound HTTP from nodes
    #[serde(default)]
    pub http: HttpConfig,
}

/// Run engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum retry count for a failed run
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Step ceiling per run segment (guards against cyclic graphs)
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Per-run timeout requested by the outer job runner
    #[serde(default = "default_run_timeout")]
    pub run_timeout_seconds: u64,

    /// Days to keep finished runs
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_steps: default_max_steps(),
            run_timeout_seconds: default_run_timeout(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_steps() -> usize {
    1000
}

fn default_run_timeout() -> u64 {
    300
}

fn default_retention_days() -> u32 {
    30
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

/// Poller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> u64 {
    1000
}

/// Credential source configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// JSON file mapping credential refs to credential maps
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// HTTP node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Allow requests to localhost and private ranges
    #[serde(default)]
    pub allow_internal_urls: bool,
}

impl Config {
    /// Load configuration from default locations.
    pub fn load() -> Self {
        let mut config = Self::default();

        let primary_path = Self::config_dir().join("config.toml");
        if let Ok(partial) = Self::load_partial_from_path(&primary_path) {
            config.apply_partial(partial);
        }

        config.apply_env_overrides();
        config
    }

    /// Load configuration from an explicit file, then apply env overrides.
    ///
    /// Unlike [`Config::load`], a missing or malformed file is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let partial: PartialConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid {}: {}", path.display(), e)))?;

        let mut config = Self::default();
        config.apply_partial(partial);
        config.apply_env_overrides();
        Ok(config)
    }

    /// Get the data directory.
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("weft"))
            .unwrap_or_else(|| PathBuf::from(".weft"))
    }

    /// Get the config directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("weft"))
            .unwrap_or_else(|| PathBuf::from(".weft"))
    }

    /// Resolved database path.
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("weft.db"))
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<u32>("WEFT_MAX_RETRIES") {
            self.engine.max_retries = v;
        }
        if let Some(v) = env_parse::<usize>("WEFT_MAX_STEPS") {
            self.engine.max_steps = v;
        }
        if let Some(v) = env_parse::<u64>("WEFT_RUN_TIMEOUT_SECONDS") {
            self.engine.run_timeout_seconds = v;
        }
        if let Some(v) = env_parse::<u32>("WEFT_RETENTION_DAYS") {
            self.engine.retention_days = v;
        }
        if let Ok(path) = std::env::var("WEFT_DATABASE_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }
        if let Some(v) = env_parse::<u64>("WEFT_POLL_INTERVAL_MS") {
            self.poller.interval_ms = v;
        }
        if let Ok(path) = std::env::var("WEFT_CREDENTIALS_PATH") {
            self.credentials.path = Some(PathBuf::from(path));
        }
        if let Ok(level) = std::env::var("WEFT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(v) = std::env::var("WEFT_ALLOW_INTERNAL_URLS") {
            self.http.allow_internal_urls = v.eq_ignore_ascii_case("true");
        }
    }

    fn load_partial_from_path(path: &Path) -> std::result::Result<PartialConfig, ()> {
        let content = std::fs::read_to_string(path).map_err(|_| ())?;
        toml::from_str(&content).map_err(|_| ())
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(engine) = partial.engine {
            self.engine = engine;
        }
        if let Some(storage) = partial.storage {
            self.storage = storage;
        }
        if let Some(poller) = partial.poller {
            self.poller = poller;
        }
        if let Some(credentials) = partial.credentials {
            self.credentials = credentials;
        }
        if let Some(logging) = partial.logging {
            self.logging = logging;
        }
        if let Some(http) = partial.http {
            self.http = http;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    engine: Option<EngineConfig>,
    storage: Option<StorageConfig>,
    poller: Option<PollerConfig>,
    credentials: Option<CredentialsConfig>,
    logging: Option<LoggingConfig>,
    http: Option<HttpConfig>,
}
