use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Project-local configuration directory
pub const CONFIG_DIR: &str = ".refresh-cache";

/// Prefix of environment overrides; `__` separates nested keys
pub const ENV_PREFIX: &str = "REFRESH_CACHE_";

/// Configuration error types
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Invalid timeout_secs: {0}. Must be at least 1")]
    InvalidTimeout(u64),

    #[error("Invalid idle_tick_ms: {0}. Must be at least 1")]
    InvalidIdleTick(u64),

    #[error("Collection id cannot be empty")]
    EmptyCollectionId,

    #[error("Duplicate collection id: {0}")]
    DuplicateCollectionId(String),

    #[error("Collection '{0}' has neither a fetch_one nor a fetch_some scheme")]
    MissingScheme(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the current directory
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .refresh-cache/config.yaml
    /// 3. .refresh-cache/local.yaml (optional local overrides)
    /// 4. Environment variables (REFRESH_CACHE_* prefix)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(Path::new("."))
    }

    /// Load configuration rooted at `root` instead of the current directory
    pub fn load_from_dir(root: &Path) -> Result<Config> {
        let dir = root.join(CONFIG_DIR);
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        if config.http.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout(config.http.timeout_secs));
        }

        if config.scheduler.idle_tick_ms == 0 {
            return Err(ConfigError::InvalidIdleTick(config.scheduler.idle_tick_ms));
        }

        let mut seen = HashSet::new();
        for collection in &config.collections {
            if collection.id.trim().is_empty() {
                return Err(ConfigError::EmptyCollectionId);
            }
            if !seen.insert(collection.id.as_str()) {
                return Err(ConfigError::DuplicateCollectionId(collection.id.clone()));
            }
            if collection.fetch_one.is_none() && collection.fetch_some.is_none() {
                return Err(ConfigError::MissingScheme(collection.id.clone()));
            }
            for scheme in [&collection.fetch_one, &collection.fetch_some].into_iter().flatten() {
                if scheme.uri.is_empty() {
                    return Err(ConfigError::ValidationFailed(format!(
                        "collection '{}' has a scheme with an empty uri",
                        collection.id
                    )));
                }
            }
        }

        Ok(())
    }
}
