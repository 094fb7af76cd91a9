//! Requests dropped by running executions into their IPC directory, and the
//! host-side layer that authorizes and applies them.
//!
//! Each group sees only `ipc/<group>/` (mounted at `/workspace/ipc`), so the
//! issuing group is the directory a file was found in, never a field of the
//! file itself.

use crate::shared::ids::GroupFolder;
use crate::tasks::{ContextMode, ScheduleKind};
use serde::{Deserialize, Serialize};

pub mod authorize;
pub mod processor;
pub mod snapshots;
pub mod source;

pub use authorize::{authorize, RequestFacts};
pub use processor::{IpcPollReport, IpcProcessor};
pub use snapshots::{write_snapshots, AVAILABLE_GROUPS_FILE, CURRENT_TASKS_FILE};
pub use source::{FileDropSource, IpcEnvelope, IpcSource, IPC_REQUEST_DIRS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    #[serde(rename_all = "camelCase")]
    SendMessage { chat_target: String, text: String },
    #[serde(rename_all = "camelCase")]
    ScheduleTask {
        prompt: String,
        schedule_type: ScheduleKind,
        schedule_value: String,
        #[serde(default)]
        context_mode: Option<ContextMode>,
        group_folder: GroupFolder,
    },
    #[serde(rename_all = "camelCase")]
    PauseTask { task_id: String },
    #[serde(rename_all = "camelCase")]
    ResumeTask { task_id: String },
    #[serde(rename_all = "camelCase")]
    CancelTask { task_id: String },
    #[serde(rename_all = "camelCase")]
    RegisterGroup {
        chat_target: String,
        name: String,
        folder: GroupFolder,
        trigger: String,
        #[serde(default)]
        requires_trigger: Option<bool>,
    },
}

impl IpcRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send_message",
            Self::ScheduleTask { .. } => "schedule_task",
            Self::PauseTask { .. } => "pause_task",
            Self::ResumeTask { .. } => "resume_task",
            Self::CancelTask { .. } => "cancel_task",
            Self::RegisterGroup { .. } => "register_group",
        }
    }
}

/// Why a request was refused. The file is kept in the error area.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IpcRejection {
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("group `{group}` is not authorized: {reason}")]
    Unauthorized { group: String, reason: String },
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("unknown target: {0}")]
    UnknownTarget(String),
    #[error("unknown task `{0}`")]
    UnknownTask(String),
}

/// Failures that leave the request file in place for the next poll.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("ipc io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Queue(#[from] crate::queue::QueueError),
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
    #[error(transparent)]
    Messaging(#[from] crate::messaging::MessagingError),
    #[error(transparent)]
    Runtime(#[from] crate::runtime::RuntimeError),
}

pub(crate) fn io_err(path: &std::path::Path, source: std::io::Error) -> IpcError {
    IpcError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_kinds_are_tagged_by_type() {
        let raw = r#"{"type":"schedule_task","prompt":"p","scheduleType":"interval","scheduleValue":"60000","groupFolder":"alpha"}"#;
        let request: IpcRequest = serde_json::from_str(raw).expect("parse");
        assert_eq!(request.kind(), "schedule_task");
        assert!(matches!(
            request,
            IpcRequest::ScheduleTask {
                schedule_type: ScheduleKind::Interval,
                context_mode: None,
                ..
            }
        ));

        let send: IpcRequest =
            serde_json::from_str(r#"{"type":"send_message","chatTarget":"c","text":"hi"}"#)
                .expect("parse");
        assert_eq!(
            send,
            IpcRequest::SendMessage {
                chat_target: "c".to_string(),
                text: "hi".to_string()
            }
        );
    }

    #[test]
    fn unknown_kinds_and_bad_folders_fail_to_parse() {
        assert!(serde_json::from_str::<IpcRequest>(r#"{"type":"shell","cmd":"rm"}"#).is_err());
        assert!(serde_json::from_str::<IpcRequest>(
            r#"{"type":"schedule_task","prompt":"p","scheduleType":"once","scheduleValue":"x","groupFolder":"../main"}"#
        )
        .is_err());
    }
}
