use super::dispatcher::{Job, JobExecutor};
use super::{ensure_group_dirs, StatePaths};
use crate::execution::{ExecutionLimits, ExecutionRequest, ExecutionResult, ExecutionRunner};
use crate::group::RegisteredGroup;
use crate::ipc::write_snapshots;
use crate::messaging::{Messenger, MessagingError};
use crate::shared::ids::GroupFolder;
use crate::shared::time::{format_ms_rfc3339, now_ms};
use crate::store::{FiringOutcome, StoredMessage, Store, StoreError};
use crate::tasks::{
    next_run_after_firing, ContextMode, RunStatus, ScheduleError, Task, TaskStatus,
};
use chrono_tz::Tz;
use std::sync::Arc;

const RESULT_SUMMARY_CHARS: usize = 200;
const UNREGISTERED_SUMMARY: &str = "target group not registered";

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Messaging(#[from] MessagingError),
}

/// Everything a job needs, shared by all worker threads.
pub struct JobContext {
    pub store: Store,
    pub runner: ExecutionRunner,
    pub messenger: Arc<dyn Messenger>,
    pub paths: StatePaths,
    pub privileged: GroupFolder,
    pub assistant_name: String,
    pub tz: Tz,
    pub limits: ExecutionLimits,
}

impl JobExecutor for JobContext {
    fn execute(&self, group: &GroupFolder, job: Job) {
        match job {
            Job::Messages { chat_target } => {
                if let Err(err) = self.run_messages(&chat_target) {
                    tracing::error!(group = %group, chat_target = %chat_target, error = %err, "message job failed");
                }
            }
            Job::Task(task) => {
                let task_id = task.id.clone();
                if let Err(err) = self.run_task(task) {
                    tracing::error!(group = %group, task_id = %task_id, error = %err, "task job failed");
                    if let Err(err) = self.store.release_claim(task_id.as_str()) {
                        tracing::warn!(task_id = %task_id, error = %err, "failed to release task claim");
                    }
                }
            }
        }
    }
}

impl JobContext {
    /// Answers a chat's unanswered messages. The cursor only moves after a
    /// successful execution, so a failed run is retried with the same
    /// messages on the next trigger.
    pub fn run_messages(&self, chat_target: &str) -> Result<(), JobError> {
        let Some(group) = self.store.group_by_chat(chat_target)? else {
            tracing::debug!(chat_target, "message job for unregistered chat ignored");
            return Ok(());
        };
        let messages = self.store.messages_since_cursor(chat_target)?;
        let Some(last) = messages.last() else {
            return Ok(());
        };
        let identity = group.identity(&self.privileged);
        let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
        if !group.should_respond(identity.is_privileged, &texts) {
            return Ok(());
        }

        self.prepare_group(&group, identity.is_privileged);
        let request = ExecutionRequest {
            prompt: format_prompt(&messages),
            session_id: self.store.session(&group.folder)?,
            group_folder: group.folder.clone(),
            chat_target: chat_target.to_string(),
            is_privileged: identity.is_privileged,
            is_scheduled: false,
            scheduled_task_id: None,
        };
        let result = self.runner.run(&request, &group.additional_mounts, self.limits);
        if !result.is_success() {
            tracing::warn!(
                group = %group.folder,
                chat_target,
                error = result.error_message.as_deref().unwrap_or("unknown"),
                "no reply sent for failed execution"
            );
            return Ok(());
        }

        self.store.advance_agent_cursor(chat_target, last.seq)?;
        self.remember_session(&group.folder, &result)?;
        self.deliver(chat_target, &result)?;
        Ok(())
    }

    /// Runs a claimed task and records the firing. The claim is always
    /// released through `finish_firing`.
    pub fn run_task(&self, task: Task) -> Result<(), JobError> {
        let started_at = now_ms();
        let scheduled_for = task.next_run.unwrap_or(started_at);

        let group = self
            .store
            .group_by_chat(&task.chat_target)?
            .filter(|group| group.folder == task.group_folder);
        let Some(group) = group else {
            tracing::warn!(
                task_id = %task.id,
                group = %task.group_folder,
                chat_target = %task.chat_target,
                "target group is no longer registered, firing skipped"
            );
            match next_run_after_firing(task.schedule(), scheduled_for, started_at, &self.tz) {
                Ok(Some(next_run)) => self.store.finish_firing(&FiringOutcome {
                    task_id: task.id.clone(),
                    started_at,
                    duration_ms: 0,
                    run_status: RunStatus::Skipped,
                    summary: Some(UNREGISTERED_SUMMARY.to_string()),
                    next_run: Some(next_run),
                    status: TaskStatus::Active,
                })?,
                // A once task waits, off the due list, for its group to return.
                Ok(None) => self.store.park_task(&task.id, started_at, UNREGISTERED_SUMMARY)?,
                Err(err) => self.store.finish_firing(&schedule_error_outcome(
                    &task,
                    started_at,
                    0,
                    scheduled_for,
                    &err,
                ))?,
            }
            return Ok(());
        };

        let is_privileged = group.folder == self.privileged;
        self.prepare_group(&group, is_privileged);
        let session_id = match task.context_mode {
            ContextMode::Group => self.store.session(&group.folder)?,
            ContextMode::Isolated => None,
        };
        let request = ExecutionRequest {
            prompt: task.prompt.clone(),
            session_id,
            group_folder: group.folder.clone(),
            chat_target: task.chat_target.clone(),
            is_privileged,
            is_scheduled: true,
            scheduled_task_id: Some(task.id.to_string()),
        };
        let result = self.runner.run(&request, &group.additional_mounts, self.limits);
        let duration_ms = now_ms().saturating_sub(started_at);

        let (run_status, summary) = if result.is_success() {
            if task.context_mode == ContextMode::Group {
                self.remember_session(&group.folder, &result)?;
            }
            if let Err(err) = self.deliver(&task.chat_target, &result) {
                tracing::warn!(task_id = %task.id, error = %err, "task output not delivered");
            }
            let summary = result
                .output
                .as_deref()
                .map(|text| text.chars().take(RESULT_SUMMARY_CHARS).collect::<String>())
                .unwrap_or_else(|| "Completed".to_string());
            (RunStatus::Success, summary)
        } else {
            let message = result.error_message.as_deref().unwrap_or("unknown error");
            (RunStatus::Error, format!("Error: {message}"))
        };

        let outcome = match next_run_after_firing(task.schedule(), scheduled_for, now_ms(), &self.tz) {
            Ok(next_run) => FiringOutcome {
                task_id: task.id.clone(),
                started_at,
                duration_ms,
                run_status,
                summary: Some(summary),
                next_run,
                status: TaskStatus::Active,
            },
            Err(err) => schedule_error_outcome(&task, started_at, duration_ms, scheduled_for, &err),
        };
        self.store.finish_firing(&outcome)?;
        tracing::info!(
            task_id = %task.id,
            group = %group.folder,
            status = outcome.run_status.as_str(),
            next_run = ?outcome.next_run,
            "task fired"
        );
        Ok(())
    }

    /// Best effort: a run still happens if the snapshots cannot be written.
    fn prepare_group(&self, group: &RegisteredGroup, is_privileged: bool) {
        if let Err(err) = ensure_group_dirs(&self.paths, &group.folder) {
            tracing::warn!(group = %group.folder, error = %err, "failed to prepare group directories");
        }
        let identity = crate::group::GroupIdentity {
            folder: group.folder.clone(),
            is_privileged,
        };
        if let Err(err) = write_snapshots(&self.paths, &self.store, &identity) {
            tracing::warn!(group = %group.folder, error = %err, "failed to write ipc snapshots");
        }
    }

    fn remember_session(
        &self,
        folder: &GroupFolder,
        result: &ExecutionResult,
    ) -> Result<(), StoreError> {
        match &result.new_session_id {
            Some(session_id) => self.store.set_session(folder, session_id, now_ms()),
            None => Ok(()),
        }
    }

    fn deliver(&self, chat_target: &str, result: &ExecutionResult) -> Result<(), MessagingError> {
        let Some(output) = result.output.as_deref().map(str::trim).filter(|o| !o.is_empty()) else {
            return Ok(());
        };
        self.messenger
            .send_message(chat_target, &format!("{}: {output}", self.assistant_name))?;
        Ok(())
    }
}

/// A stored schedule that no longer parses pauses the task.
fn schedule_error_outcome(
    task: &Task,
    started_at: i64,
    duration_ms: i64,
    scheduled_for: i64,
    err: &ScheduleError,
) -> FiringOutcome {
    tracing::error!(task_id = %task.id, error = %err, "task schedule is invalid, pausing");
    FiringOutcome {
        task_id: task.id.clone(),
        started_at,
        duration_ms,
        run_status: RunStatus::Error,
        summary: Some(format!("schedule error: {err}")),
        next_run: Some(scheduled_for),
        status: TaskStatus::Paused,
    }
}

/// One line per message: `[<rfc3339>] <sender>: <text>`.
pub fn format_prompt(messages: &[StoredMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            format!(
                "[{}] {}: {}",
                format_ms_rfc3339(m.timestamp),
                m.sender_name,
                m.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_messages_in_order_with_timestamps() {
        let messages = vec![
            StoredMessage {
                seq: 1,
                message_id: "m1".to_string(),
                chat_target: "c".to_string(),
                sender_name: "Alice".to_string(),
                text: "@Andy hi".to_string(),
                timestamp: 0,
            },
            StoredMessage {
                seq: 2,
                message_id: "m2".to_string(),
                chat_target: "c".to_string(),
                sender_name: "Bob".to_string(),
                text: "also me".to_string(),
                timestamp: 1_700_000_000_000,
            },
        ];
        assert_eq!(
            format_prompt(&messages),
            "[1970-01-01T00:00:00Z] Alice: @Andy hi\n[2023-11-14T22:13:20Z] Bob: also me"
        );
    }
}
