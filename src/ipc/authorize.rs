use super::{IpcRejection, IpcRequest};
use crate::group::{GroupIdentity, RegisteredGroup};
use crate::shared::ids::GroupFolder;

/// Registry lookups a decision depends on, gathered before deciding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFacts {
    /// The issuing folder is a registered group.
    pub issuer_registered: bool,
    /// Group named by the request's chat target or folder, if registered.
    pub target_group: Option<RegisteredGroup>,
    /// Owner of the task named by the request, if it exists.
    pub task_owner: Option<GroupFolder>,
}

/// Trust decision for one request. Non-privileged groups may only act on
/// their own chat and their own tasks; only the privileged group registers
/// groups.
pub fn authorize(
    issuer: &GroupIdentity,
    request: &IpcRequest,
    facts: &RequestFacts,
) -> Result<(), IpcRejection> {
    if !issuer.is_privileged && !facts.issuer_registered {
        return Err(unauthorized(issuer, "issuing group is not registered"));
    }

    match request {
        IpcRequest::SendMessage { chat_target, text } => {
            if text.trim().is_empty() {
                return Err(IpcRejection::Invalid("message text is empty".to_string()));
            }
            match &facts.target_group {
                Some(target) if issuer.is_privileged || target.folder == issuer.folder => Ok(()),
                Some(_) => Err(unauthorized(
                    issuer,
                    &format!("cannot send to chat `{chat_target}` of another group"),
                )),
                None if issuer.is_privileged => {
                    Err(IpcRejection::UnknownTarget(format!("chat `{chat_target}`")))
                }
                // Do not reveal whether some other chat is registered.
                None => Err(unauthorized(
                    issuer,
                    &format!("cannot send to chat `{chat_target}`"),
                )),
            }
        }
        IpcRequest::ScheduleTask {
            group_folder,
            prompt,
            ..
        } => {
            if !issuer.is_privileged && group_folder != &issuer.folder {
                return Err(unauthorized(
                    issuer,
                    &format!("cannot schedule tasks for group `{group_folder}`"),
                ));
            }
            if prompt.trim().is_empty() {
                return Err(IpcRejection::Invalid("task prompt is empty".to_string()));
            }
            if facts.target_group.is_none() {
                return Err(IpcRejection::UnknownTarget(format!(
                    "group `{group_folder}` is not registered"
                )));
            }
            Ok(())
        }
        IpcRequest::PauseTask { task_id }
        | IpcRequest::ResumeTask { task_id }
        | IpcRequest::CancelTask { task_id } => match &facts.task_owner {
            Some(owner) if issuer.is_privileged || owner == &issuer.folder => Ok(()),
            Some(_) => Err(unauthorized(
                issuer,
                &format!("task `{task_id}` belongs to another group"),
            )),
            None => Err(IpcRejection::UnknownTask(task_id.clone())),
        },
        IpcRequest::RegisterGroup { .. } if issuer.is_privileged => Ok(()),
        IpcRequest::RegisterGroup { .. } => {
            Err(unauthorized(issuer, "only the privileged group can register groups"))
        }
    }
}

fn unauthorized(issuer: &GroupIdentity, reason: &str) -> IpcRejection {
    IpcRejection::Unauthorized {
        group: issuer.folder.to_string(),
        reason: reason.to_string(),
    }
}
