//! Scheduled task state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Registered, timer armed, callback not run yet.
    Pending,
    /// Callback executed (terminal).
    Resolved,
    /// Cancelled before firing (terminal).
    Aborted,
}

impl TaskState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Aborted)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing triple handed to a task callback and yielded to awaiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTiming {
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub executed_at: DateTime<Utc>,
}

impl TaskTiming {
    /// How late the task ran relative to its schedule.
    pub fn lateness(&self) -> chrono::Duration {
        self.executed_at - self.scheduled_at
    }
}
