//! Error taxonomy for the cache engine.

use thiserror::Error;

use super::models::FetchSchemeKind;

/// Errors surfaced by the scheduler, cache entities and fetch strategies.
///
/// `Clone` so that every waiter on a single-flight fetch can receive the
/// same outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Fetched key mismatch: requested {requested}, fetched {fetched}")]
    KeyMismatch { requested: String, fetched: String },

    #[error("Fetching scheme '{0}' not configured")]
    SchemeNotConfigured(FetchSchemeKind),

    #[error("Task with name '{0}' already registered")]
    DuplicateTaskName(String),

    #[error("Invalid task name: '{0}' (must match ^[A-Za-z0-9_]+$)")]
    InvalidTaskName(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Could not translate response: {0}")]
    TranslationFailed(String),

    #[error("Unknown setting: {0}")]
    UnknownSetting(String),

    #[error("Invalid value for setting {name}: {reason}")]
    InvalidSettingValue { name: String, reason: String },

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

impl CacheError {
    /// Build a key mismatch error from any two debuggable keys.
    pub fn key_mismatch(requested: &impl std::fmt::Debug, fetched: &impl std::fmt::Debug) -> Self {
        Self::KeyMismatch {
            requested: format!("{requested:?}"),
            fetched: format!("{fetched:?}"),
        }
    }

    /// Wrap a transport-level failure.
    pub fn fetch_failed(err: impl std::fmt::Display) -> Self {
        Self::FetchFailed(err.to_string())
    }

    /// Whether this error came from the retrieval strategy rather than from
    /// configuration or key validation.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::FetchFailed(_) | Self::TranslationFailed(_))
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        CacheError::FetchFailed(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::TranslationFailed(err.to_string())
    }
}
