//! Configuration module for ci-dispatch
//!
//! Settings come from `config.toml` in the config directory (or an explicit
//! path), overridden by `CI_DISPATCH_*` environment variables, e.g.
//! `CI_DISPATCH_QUEUE__STATUS_URL`.

use std::path::{Path, PathBuf};

use ::config::{Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "CI_DISPATCH";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("loading configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("serializing configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("writing configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// VCS host configuration
    #[serde(default)]
    pub github: GitHubConfig,

    /// Submission and queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
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
            get_data_dir().join("data.db")
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// API base URL; GitHub Enterprise installs point this at `/api/v3`
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Read but never write: statuses, comments and state clearing are dropped
    #[serde(default)]
    pub readonly: bool,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            readonly: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Base URL linked from commit statuses
    #[serde(default = "default_status_url")]
    pub status_url: String,

    /// How long a caller waits for one submission, in seconds
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_seconds: u64,
}

fn default_status_url() -> String {
    "http://localhost:6010".to_string()
}

fn default_submit_timeout() -> u64 {
    300
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            status_url: default_status_url(),
            submit_timeout_seconds: default_submit_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    "ci_dispatch=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

/// Get the data directory for ci-dispatch
pub fn get_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("ci-dispatch"))
        .or_else(|| dirs::home_dir().map(|h| h.join(".ci-dispatch")))
        .unwrap_or_else(|| PathBuf::from(".ci-dispatch"))
}

/// Get the config directory for ci-dispatch
pub fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("ci-dispatch"))
        .unwrap_or_else(get_data_dir)
}

pub fn default_config_path() -> PathBuf {
    get_config_dir().join("config.toml")
}

/// Load configuration from the default location
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&default_config_path())
}

/// Load configuration from `path`; a missing file yields the defaults plus
/// any environment overrides
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config = ::config::Config::builder()
        .add_source(File::from(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?
        .try_deserialize()?;

    Ok(config)
}

/// Save configuration to the default location
pub fn save_config(config: &Config) -> Result<PathBuf, ConfigError> {
    let config_path = default_config_path();
    save_config_to(config, &config_path)?;
    Ok(config_path)
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}
