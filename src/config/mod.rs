//! Configuration module for Nodexia

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of environment overrides, e.g. `NODEXIA__SERVER__PORT=9090`
pub const ENV_PREFIX: &str = "NODEXIA";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Dashboard triage configuration
    #[serde(default)]
    pub triage: TriageConfig,

    /// Synchronizer configuration
    #[serde(default)]
    pub synchronizer: SynchronizerConfig,

    /// Notification delivery configuration
    #[serde(default)]
    pub notifications: NotificationsConfig,

    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: true,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database
    pub path: Option<String>,
}

impl DatabaseConfig {
    pub fn get_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            PathBuf::from(path)
        } else {
            get_data_dir().join("nodexia.db")
        }
    }
}

/// Triage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    /// Minutes on either side of the scheduled time that still count as on time
    #[serde(default = "default_window_minutes")]
    pub window_minutes: i64,

    /// Offset of the plants' local time from UTC, in minutes
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
}

fn default_window_minutes() -> i64 {
    crate::triage::DEFAULT_WINDOW_MINUTES
}

fn default_utc_offset_minutes() -> i32 {
    -180
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_window_minutes(),
            utc_offset_minutes: default_utc_offset_minutes(),
        }
    }
}

/// Synchronizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynchronizerConfig {
    /// Automatic retries of a failed transactional write
    #[serde(default = "default_persist_retries")]
    pub persist_retries: u32,
}

fn default_persist_retries() -> u32 {
    1
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        Self {
            persist_retries: default_persist_retries(),
        }
    }
}

/// Notification delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Publish notifications to live WebSocket clients
    #[serde(default = "default_true")]
    pub event_bus: bool,

    /// External delivery service receiving notifications as JSON
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Webhook request timeout in seconds
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_seconds: u64,
}

fn default_webhook_timeout() -> u64 {
    10
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            event_bus: true,
            webhook_url: None,
            webhook_timeout_seconds: default_webhook_timeout(),
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,

    /// Filter directives used when RUST_LOG is unset
    #[serde(default)]
    pub filter: Option<String>,
}

/// Get the data directory for Nodexia
pub fn get_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("nodexia"))
        .or_else(|| dirs::home_dir().map(|h| h.join(".nodexia")))
        .unwrap_or_else(|| PathBuf::from(".nodexia"))
}

/// Get the config directory for Nodexia
pub fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("nodexia"))
        .unwrap_or_else(get_data_dir)
}

pub fn default_config_path() -> PathBuf {
    get_config_dir().join("config.toml")
}

/// Load configuration from `path` (or the default location) plus environment overrides
pub fn load_config(path: Option<&Path>) -> Result<Config, config::ConfigError> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

/// Save configuration to `path` as TOML
pub fn save_config_to(config: &Config, path: &Path) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let contents = toml::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, contents)
}
