//! Event log entries recording group lifecycle actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle action recorded in the event log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GroupAction {
    /// A group was created with its initial command set.
    GroupCreated,
    /// A process was started for a command.
    CommandStarted,
    /// A command's process was stopped by the supervisor.
    CommandStopped,
    /// Every command of a group was removed.
    GroupRemoved,
}

impl GroupAction {
    /// Name stored in the `action_name` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GroupCreated => "group_created",
            Self::CommandStarted => "command_started",
            Self::CommandStopped => "command_stopped",
            Self::GroupRemoved => "group_removed",
        }
    }

    /// Parse a stored action name.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "group_created" => Some(Self::GroupCreated),
            "command_started" => Some(Self::CommandStarted),
            "command_stopped" => Some(Self::CommandStopped),
            "group_removed" => Some(Self::GroupRemoved),
            _ => None,
        }
    }
}

/// One immutable entry of the append-only event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    /// Monotonic sequence number assigned by the store.
    pub seq: i64,
    /// Recorded action.
    pub action: GroupAction,
    /// Command the action refers to; `None` for group-level actions.
    pub command_id: Option<String>,
    /// Group the action belongs to.
    pub group_name: String,
    /// Time the entry was appended.
    pub recorded_at: DateTime<Utc>,
}
