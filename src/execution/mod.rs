use crate::group::GroupIdentity;
use crate::shared::ids::GroupFolder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod invocation;
pub mod layout;
pub mod output_parse;
pub mod runner;

pub use invocation::{build_invocation, InvocationSpec};
pub use layout::{plan_mounts, VolumeMount};
pub use output_parse::{parse_agent_output, truncate_with_marker, OutputCapture};
pub use runner::ExecutionRunner;

pub const OUTPUT_START_MARKER: &str = "---HOSTCLAW_OUTPUT_START---";
pub const OUTPUT_END_MARKER: &str = "---HOSTCLAW_OUTPUT_END---";
pub const TRUNCATION_MARKER: &str = "[output truncated]";
pub const TIMEOUT_ERROR_MESSAGE: &str = "timeout";

/// The single JSON document written to an execution's stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub prompt: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub group_folder: GroupFolder,
    pub chat_target: String,
    pub is_privileged: bool,
    pub is_scheduled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_task_id: Option<String>,
}

impl ExecutionRequest {
    pub fn identity(&self) -> GroupIdentity {
        GroupIdentity {
            folder: self.group_folder.clone(),
            is_privileged: self.is_privileged,
        }
    }

    /// Scheduled runs carry a marker line so the agent can tell them apart
    /// from user-triggered ones.
    pub fn effective_prompt(&self) -> String {
        if !self.is_scheduled {
            return self.prompt.clone();
        }
        let id = self.scheduled_task_id.as_deref().unwrap_or("unknown");
        format!(
            "[scheduled-task id={id}]\nThis is an automated run of a scheduled task, not a message from a user.\n\n{}",
            self.prompt
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub new_session_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    pub fn failure(error: &ExecutionError) -> Self {
        let message = match error {
            ExecutionError::Timeout { .. } => TIMEOUT_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        };
        Self {
            status: ExecutionStatus::Error,
            output: None,
            new_session_id: None,
            error_message: Some(message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to spawn `{binary}`: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("execution exited with code {exit_code}: {stderr}")]
    NonZeroExit { exit_code: i32, stderr: String },
    #[error("execution produced no output frame")]
    MissingFrame,
    #[error("execution output frame exceeded {limit} bytes")]
    FrameOverflow { limit: usize },
    #[error("malformed execution output: {reason}")]
    MalformedFrame { reason: String },
    #[error("invalid execution backend: {0}")]
    Backend(String),
    #[error("failed to encode execution request: {0}")]
    Encode(#[from] serde_json::Error),
}

pub(crate) fn io_error(path: &std::path::Path, source: std::io::Error) -> ExecutionError {
    ExecutionError::Io {
        path: path.display().to_string(),
        source,
    }
}
