use super::IpcError;
use crate::group::GroupIdentity;
use crate::runtime::StatePaths;
use crate::shared::fs_atomic::atomic_write_json;
use crate::shared::time::format_ms_rfc3339;
use crate::store::Store;
use serde::Serialize;

pub const CURRENT_TASKS_FILE: &str = "current_tasks.json";
pub const AVAILABLE_GROUPS_FILE: &str = "available_groups.json";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskSnapshot {
    id: String,
    group_folder: String,
    prompt: String,
    schedule_type: &'static str,
    schedule_value: String,
    context_mode: &'static str,
    status: &'static str,
    next_run: Option<String>,
    last_run: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupSnapshot {
    chat_target: String,
    name: String,
    folder: String,
    requires_trigger: bool,
}

/// Read-only views an execution can consult from `/workspace/ipc`: its tasks
/// (every task for the privileged group) and, for the privileged group, the
/// registered groups.
pub fn write_snapshots(
    paths: &StatePaths,
    store: &Store,
    identity: &GroupIdentity,
) -> Result<(), IpcError> {
    let dir = paths.ipc_group_dir(&identity.folder);
    let tasks = if identity.is_privileged {
        store.list_tasks()?
    } else {
        store.list_tasks_for_group(&identity.folder)?
    };
    let tasks: Vec<TaskSnapshot> = tasks
        .into_iter()
        .map(|task| TaskSnapshot {
            id: task.id.to_string(),
            group_folder: task.group_folder.to_string(),
            prompt: task.prompt,
            schedule_type: task.schedule_kind.as_str(),
            schedule_value: task.schedule_value,
            context_mode: task.context_mode.as_str(),
            status: task.status.as_str(),
            next_run: task.next_run.map(format_ms_rfc3339),
            last_run: task.last_run.map(format_ms_rfc3339),
        })
        .collect();
    write(&dir.join(CURRENT_TASKS_FILE), &tasks)?;

    if identity.is_privileged {
        let groups: Vec<GroupSnapshot> = store
            .list_groups()?
            .into_iter()
            .map(|group| GroupSnapshot {
                chat_target: group.chat_target,
                name: group.name,
                folder: group.folder.to_string(),
                requires_trigger: group.requires_trigger,
            })
            .collect();
        write(&dir.join(AVAILABLE_GROUPS_FILE), &groups)?;
    }
    Ok(())
}

fn write<T: Serialize>(path: &std::path::Path, value: &T) -> Result<(), IpcError> {
    atomic_write_json(path, value).map_err(|source| super::io_err(path, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::RegisteredGroup;
    use crate::shared::ids::GroupFolder;
    use crate::tasks::{ContextMode, NewTask, ScheduleKind};
    use chrono_tz::Tz;
    use std::fs;
    use tempfile::tempdir;

    fn folder(name: &str) -> GroupFolder {
        GroupFolder::parse(name).expect("folder")
    }

    #[test]
    fn non_privileged_snapshot_lists_only_own_tasks() {
        let dir = tempdir().expect("tempdir");
        let paths = StatePaths::new(dir.path());
        let store = Store::open(&paths.store_path()).expect("store");
        for name in ["alpha", "beta"] {
            store
                .register_group(&RegisteredGroup {
                    chat_target: format!("{name}@chat"),
                    name: name.to_string(),
                    folder: folder(name),
                    trigger: "@Andy".to_string(),
                    requires_trigger: true,
                    additional_mounts: Vec::new(),
                    added_at: 0,
                })
                .expect("register");
            store
                .create_task(
                    &NewTask {
                        group_folder: folder(name),
                        chat_target: format!("{name}@chat"),
                        prompt: format!("{name} task"),
                        schedule_kind: ScheduleKind::Interval,
                        schedule_value: "60000".to_string(),
                        context_mode: ContextMode::Group,
                    },
                    0,
                    &Tz::UTC,
                )
                .expect("task");
        }

        let alpha = GroupIdentity {
            folder: folder("alpha"),
            is_privileged: false,
        };
        write_snapshots(&paths, &store, &alpha).expect("snapshot");
        let alpha_dir = paths.ipc_group_dir(&alpha.folder);
        let raw = fs::read_to_string(alpha_dir.join(CURRENT_TASKS_FILE)).expect("tasks");
        assert!(raw.contains("alpha task"));
        assert!(!raw.contains("beta task"));
        assert!(!alpha_dir.join(AVAILABLE_GROUPS_FILE).exists());

        let main = GroupIdentity {
            folder: folder("main"),
            is_privileged: true,
        };
        write_snapshots(&paths, &store, &main).expect("snapshot");
        let main_dir = paths.ipc_group_dir(&main.folder);
        let raw = fs::read_to_string(main_dir.join(CURRENT_TASKS_FILE)).expect("tasks");
        assert!(raw.contains("beta task"));
        let groups = fs::read_to_string(main_dir.join(AVAILABLE_GROUPS_FILE)).expect("groups");
        assert!(groups.contains("\"chatTarget\": \"beta@chat\""));
    }
}
