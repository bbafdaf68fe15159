//! Lifespan and refresh policy of refreshable entities.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How long a value stays fresh before a scheduled refresh.
///
/// Serialised as milliseconds, with `null` meaning infinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<u64>", into = "Option<u64>")]
pub enum Lifespan {
    Finite(Duration),
    #[default]
    Infinite,
}

impl Lifespan {
    /// Build a lifespan from a duration. A zero duration never schedules a
    /// refresh and is treated as infinite.
    pub fn new(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::Infinite
        } else {
            Self::Finite(duration)
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    pub const fn is_finite(&self) -> bool {
        matches!(self, Self::Finite(_))
    }

    pub const fn duration(&self) -> Option<Duration> {
        match self {
            Self::Finite(d) => Some(*d),
            Self::Infinite => None,
        }
    }

    /// `from + lifespan`, or `None` for an infinite lifespan.
    pub fn deadline_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let duration = chrono::Duration::from_std(self.duration()?).ok()?;
        from.checked_add_signed(duration)
    }
}

impl From<Option<u64>> for Lifespan {
    fn from(ms: Option<u64>) -> Self {
        ms.map_or(Self::Infinite, Self::from_millis)
    }
}

impl From<Lifespan> for Option<u64> {
    fn from(lifespan: Lifespan) -> Self {
        lifespan
            .duration()
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for Lifespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finite(d) => write!(f, "{}ms", d.as_millis()),
            Self::Infinite => f.write_str("infinite"),
        }
    }
}

/// Update flags shared by every refreshable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshPolicy {
    /// Keep an immutable snapshot of the payload after every update.
    pub keep_history: bool,
    /// Refresh once, then stop scheduling.
    pub update_once: bool,
    /// Stop scheduling once this many refreshes succeeded.
    pub max_updates: Option<u64>,
    /// Schedule the next cycle even when a refresh failed.
    pub reschedule_on_failure: bool,
}

impl RefreshPolicy {
    /// Whether another refresh should be scheduled after `update_count`
    /// successful refreshes.
    pub fn allows_another(&self, update_count: u64) -> bool {
        if self.update_once {
            return false;
        }
        self.max_updates.is_none_or(|max| update_count < max)
    }
}
