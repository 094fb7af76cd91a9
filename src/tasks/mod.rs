use crate::shared::ids::{GroupFolder, TaskId};
use serde::{Deserialize, Serialize};

pub mod cron;
pub mod schedule;

pub use cron::CronSchedule;
pub use schedule::{first_run, next_run_after_firing, resume_run, ScheduleSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Cron,
    Interval,
    Once,
}

impl ScheduleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cron => "cron",
            Self::Interval => "interval",
            Self::Once => "once",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ScheduleError> {
        match raw {
            "cron" => Ok(Self::Cron),
            "interval" => Ok(Self::Interval),
            "once" => Ok(Self::Once),
            other => Err(ScheduleError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    /// Resume the group's session and store the one the run reports.
    #[default]
    Group,
    Isolated,
}

impl ContextMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Isolated => "isolated",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ScheduleError> {
        match raw {
            "group" => Ok(Self::Group),
            "isolated" => Ok(Self::Isolated),
            other => Err(ScheduleError::UnknownContextMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Transitions reachable through management operations. `active -> completed`
/// only happens when a `once` task fires.
pub fn valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    match from {
        TaskStatus::Active => matches!(to, TaskStatus::Paused | TaskStatus::Cancelled),
        TaskStatus::Paused => matches!(to, TaskStatus::Active | TaskStatus::Cancelled),
        TaskStatus::Completed => matches!(to, TaskStatus::Cancelled),
        TaskStatus::Cancelled => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub group_folder: GroupFolder,
    pub chat_target: String,
    pub prompt: String,
    pub schedule_kind: ScheduleKind,
    pub schedule_value: String,
    pub context_mode: ContextMode,
    pub status: TaskStatus,
    pub next_run: Option<i64>,
    pub created_at: i64,
    pub last_run: Option<i64>,
    pub last_result: Option<String>,
}

impl Task {
    pub fn schedule(&self) -> ScheduleSpec<'_> {
        ScheduleSpec {
            kind: self.schedule_kind,
            value: &self.schedule_value,
        }
    }
}

/// Caller-supplied fields of a task; id, status and timing are assigned on create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub group_folder: GroupFolder,
    pub chat_target: String,
    pub prompt: String,
    pub schedule_kind: ScheduleKind,
    pub schedule_value: String,
    pub context_mode: ContextMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Error,
    Skipped,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunLog {
    pub task_id: TaskId,
    pub started_at: i64,
    pub duration_ms: i64,
    pub status: RunStatus,
    pub result_summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("unknown schedule type `{0}` (expected cron, interval or once)")]
    UnknownKind(String),
    #[error("unknown context mode `{0}` (expected group or isolated)")]
    UnknownContextMode(String),
    #[error("invalid cron expression `{expression}`: {reason}")]
    InvalidCron { expression: String, reason: String },
    #[error("cron expression `{0}` has no upcoming occurrence")]
    NoOccurrence(String),
    #[error("invalid interval `{0}`: expected a positive number of milliseconds")]
    InvalidInterval(String),
    #[error("invalid timestamp `{0}`: expected RFC 3339 or YYYY-MM-DDTHH:MM[:SS]")]
    InvalidTimestamp(String),
    #[error("timestamp `{0}` is not in the future")]
    NotInFuture(String),
}
