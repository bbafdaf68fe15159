use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::fetch::HttpMethod;
use super::settings::CollectionSettings;

/// Main configuration structure for refresh-cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Scheduler driver configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Shared HTTP client configuration
    #[serde(default)]
    pub http: HttpClientConfig,

    /// JSON collections served by the CLI store
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            scheduler: SchedulerConfig::default(),
            http: HttpClientConfig::default(),
            collections: vec![],
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for log files (stdout only when unset)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// File rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Scheduler driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Longest the driver sleeps when no timer is armed, in milliseconds
    #[serde(default = "default_idle_tick_ms")]
    pub idle_tick_ms: u64,
}

const fn default_idle_tick_ms() -> u64 {
    1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_tick_ms: default_idle_tick_ms(),
        }
    }
}

/// HTTP client configuration shared by fetchers and cached requests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HttpClientConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

const fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("refresh-cache/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

/// A JSON collection declared in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CollectionConfig {
    /// Collection id
    pub id: String,

    /// Single-item fetching scheme
    #[serde(default)]
    pub fetch_one: Option<SchemeConfig>,

    /// Batch fetching scheme
    #[serde(default)]
    pub fetch_some: Option<SchemeConfig>,

    /// Collection settings
    #[serde(default)]
    pub settings: CollectionSettings,
}

/// Declarative fetching scheme for JSON endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchemeConfig {
    /// HTTP verb
    #[serde(default)]
    pub method: HttpMethod,

    /// URI template with `:key` / `:keys` placeholders
    pub uri: String,

    /// Static JSON payload
    #[serde(default)]
    pub payload: Option<serde_json::Value>,

    /// Field of each returned object holding its key
    #[serde(default = "default_key_field")]
    pub key_field: String,

    /// Field of a batch response holding the item array (body itself when unset)
    #[serde(default)]
    pub items_field: Option<String>,
}

fn default_key_field() -> String {
    "id".to_string()
}
