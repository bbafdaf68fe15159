//! JSON-friendly cache key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Key type used by JSON-backed collections.
///
/// Serialises untagged so that URI templating produces `5` for integer
/// keys and `"abc"` for text keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheKey {
    Int(i64),
    Text(String),
}

impl CacheKey {
    /// Extract a key from a JSON value (integers and strings only).
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_i64().map(Self::Int),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl FromStr for CacheKey {
    type Err = std::convert::Infallible;

    /// Integers parse as `Int`, anything else is kept as `Text`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.parse::<i64>().map_or_else(|_| Self::Text(s.to_string()), Self::Int))
    }
}

impl From<i64> for CacheKey {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}
