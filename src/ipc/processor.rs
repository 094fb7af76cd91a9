use super::{authorize, IpcEnvelope, IpcError, IpcRejection, IpcRequest, IpcSource, RequestFacts};
use crate::group::{GroupIdentity, RegisteredGroup};
use crate::messaging::Messenger;
use crate::runtime::{ensure_group_dirs, StatePaths};
use crate::shared::ids::GroupFolder;
use crate::store::{Store, StoreError};
use crate::tasks::{ContextMode, NewTask, TaskStatus};
use chrono_tz::Tz;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpcPollReport {
    pub processed: usize,
    pub rejected: usize,
    /// Left in place after a transient failure; retried next poll.
    pub deferred: usize,
}

enum Failure {
    Rejected(IpcRejection),
    Deferred(IpcError),
}

impl From<IpcError> for Failure {
    fn from(err: IpcError) -> Self {
        Self::Deferred(err)
    }
}

impl From<StoreError> for Failure {
    fn from(err: StoreError) -> Self {
        Self::Deferred(IpcError::Store(err))
    }
}

impl From<IpcRejection> for Failure {
    fn from(rejection: IpcRejection) -> Self {
        Self::Rejected(rejection)
    }
}

/// Drains every pending request once per poll, giving each its own failure
/// boundary.
pub struct IpcProcessor {
    source: Box<dyn IpcSource>,
    store: Store,
    messenger: Arc<dyn Messenger>,
    paths: StatePaths,
    privileged: GroupFolder,
    default_trigger: String,
    tz: Tz,
}

impl IpcProcessor {
    pub fn new(
        source: Box<dyn IpcSource>,
        store: Store,
        messenger: Arc<dyn Messenger>,
        paths: StatePaths,
        privileged: GroupFolder,
        default_trigger: String,
        tz: Tz,
    ) -> Self {
        Self {
            source,
            store,
            messenger,
            paths,
            privileged,
            default_trigger,
            tz,
        }
    }

    pub fn poll_once(&mut self, now: i64) -> Result<IpcPollReport, IpcError> {
        let mut report = IpcPollReport::default();
        for envelope in self.source.pending()? {
            match self.handle(&envelope, now) {
                Ok(kind) => {
                    self.source.complete(&envelope)?;
                    tracing::info!(group = %envelope.issuer, kind, file = %envelope.name, "ipc request processed");
                    report.processed += 1;
                }
                Err(Failure::Rejected(rejection)) => {
                    let reason = rejection.to_string();
                    let kept = self.source.reject(&envelope, &reason)?;
                    tracing::warn!(
                        group = %envelope.issuer,
                        file = %envelope.name,
                        path = %kept.display(),
                        reason = %reason,
                        "ipc request rejected"
                    );
                    report.rejected += 1;
                }
                Err(Failure::Deferred(err)) => {
                    tracing::warn!(group = %envelope.issuer, file = %envelope.name, error = %err, "ipc request deferred");
                    report.deferred += 1;
                }
            }
        }
        Ok(report)
    }

    fn handle(&self, envelope: &IpcEnvelope, now: i64) -> Result<&'static str, Failure> {
        let folder = GroupFolder::parse(&envelope.issuer)
            .map_err(|err| IpcRejection::Malformed(format!("issuing directory: {err}")))?;
        let request: IpcRequest = serde_json::from_slice(&envelope.body)
            .map_err(|err| IpcRejection::Malformed(err.to_string()))?;
        let identity = GroupIdentity {
            is_privileged: folder == self.privileged,
            folder,
        };

        let facts = self.gather_facts(&identity, &request)?;
        authorize(&identity, &request, &facts)?;
        self.apply(&request, facts, now)?;
        Ok(request.kind())
    }

    fn gather_facts(
        &self,
        issuer: &GroupIdentity,
        request: &IpcRequest,
    ) -> Result<RequestFacts, StoreError> {
        let mut facts = RequestFacts {
            issuer_registered: self.store.group_by_folder(&issuer.folder)?.is_some(),
            ..RequestFacts::default()
        };
        match request {
            IpcRequest::SendMessage { chat_target, .. } => {
                facts.target_group = self.store.group_by_chat(chat_target)?;
            }
            IpcRequest::ScheduleTask { group_folder, .. } => {
                facts.target_group = self.store.group_by_folder(group_folder)?;
            }
            IpcRequest::PauseTask { task_id }
            | IpcRequest::ResumeTask { task_id }
            | IpcRequest::CancelTask { task_id } => {
                facts.task_owner = self.store.get_task(task_id)?.map(|task| task.group_folder);
            }
            IpcRequest::RegisterGroup { .. } => {}
        }
        Ok(facts)
    }

    fn apply(&self, request: &IpcRequest, facts: RequestFacts, now: i64) -> Result<(), Failure> {
        match request {
            IpcRequest::SendMessage { chat_target, text } => {
                self.messenger
                    .send_message(chat_target, text)
                    .map_err(IpcError::from)?;
            }
            IpcRequest::ScheduleTask {
                prompt,
                schedule_type,
                schedule_value,
                context_mode,
                group_folder,
            } => {
                let target = facts.target_group.ok_or_else(|| {
                    IpcRejection::UnknownTarget(format!("group `{group_folder}` is not registered"))
                })?;
                let new = NewTask {
                    group_folder: group_folder.clone(),
                    chat_target: target.chat_target,
                    prompt: prompt.clone(),
                    schedule_kind: *schedule_type,
                    schedule_value: schedule_value.clone(),
                    context_mode: context_mode.unwrap_or(ContextMode::Isolated),
                };
                let task = self.store.create_task(&new, now, &self.tz).map_err(rejectable)?;
                tracing::info!(task_id = %task.id, group = %group_folder, "task scheduled over ipc");
            }
            IpcRequest::PauseTask { task_id } => self.set_status(task_id, TaskStatus::Paused, now)?,
            IpcRequest::ResumeTask { task_id } => self.set_status(task_id, TaskStatus::Active, now)?,
            IpcRequest::CancelTask { task_id } => {
                self.set_status(task_id, TaskStatus::Cancelled, now)?
            }
            IpcRequest::RegisterGroup {
                chat_target,
                name,
                folder,
                trigger,
                requires_trigger,
            } => {
                let trigger = if trigger.trim().is_empty() {
                    self.default_trigger.clone()
                } else {
                    trigger.clone()
                };
                let group = RegisteredGroup {
                    chat_target: chat_target.clone(),
                    name: name.clone(),
                    folder: folder.clone(),
                    trigger,
                    requires_trigger: requires_trigger.unwrap_or(true),
                    additional_mounts: Vec::new(),
                    added_at: now,
                };
                self.store.register_group(&group).map_err(rejectable)?;
                ensure_group_dirs(&self.paths, folder).map_err(IpcError::from)?;
            }
        }
        Ok(())
    }

    fn set_status(&self, task_id: &str, to: TaskStatus, now: i64) -> Result<(), Failure> {
        self.store
            .set_task_status(task_id, to, now, &self.tz)
            .map_err(rejectable)?;
        Ok(())
    }
}

/// Store errors caused by the request's content are rejections; the rest are
/// transient.
fn rejectable(err: StoreError) -> Failure {
    match err {
        StoreError::Schedule(_)
        | StoreError::InvalidTransition { .. }
        | StoreError::InvalidGroup(_) => Failure::Rejected(IpcRejection::Invalid(err.to_string())),
        StoreError::TaskNotFound(id) => Failure::Rejected(IpcRejection::UnknownTask(id)),
        other => Failure::Deferred(IpcError::Store(other)),
    }
}
