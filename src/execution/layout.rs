use crate::group::GroupIdentity;
use crate::mounts::{ResolvedMount, EXTRA_MOUNT_ROOT};
use crate::runtime::StatePaths;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const GROUP_MOUNT: &str = "/workspace/group";
pub const PROJECT_MOUNT: &str = "/workspace/project";
pub const GLOBAL_MOUNT: &str = "/workspace/global";
pub const SESSION_MOUNT: &str = "/home/agent/.session";
pub const IPC_MOUNT: &str = "/workspace/ipc";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

/// The complete filesystem surface of one execution. Directories are expected
/// to exist already (see `runtime::ensure_group_dirs`); the global area is
/// skipped when absent.
///
/// The privileged project mount exposes the state root, so the orchestrator's
/// own files inside it (settings, store, daemon signals and an in-root mount
/// allow-list) are overlaid read-only on top of it.
pub fn plan_mounts(
    paths: &StatePaths,
    group: &GroupIdentity,
    extras: &[ResolvedMount],
    allowlist_path: &Path,
) -> Vec<VolumeMount> {
    let mut mounts = vec![VolumeMount {
        host_path: paths.group_dir(&group.folder),
        container_path: GROUP_MOUNT.to_string(),
        read_only: false,
    }];

    if group.is_privileged {
        mounts.push(VolumeMount {
            host_path: paths.root.clone(),
            container_path: PROJECT_MOUNT.to_string(),
            read_only: false,
        });
        mounts.extend(orchestrator_overlays(paths, allowlist_path));
    } else if paths.global_dir().is_dir() {
        mounts.push(VolumeMount {
            host_path: paths.global_dir(),
            container_path: GLOBAL_MOUNT.to_string(),
            read_only: true,
        });
    }

    mounts.push(VolumeMount {
        host_path: paths.session_dir(&group.folder),
        container_path: SESSION_MOUNT.to_string(),
        read_only: false,
    });
    mounts.push(VolumeMount {
        host_path: paths.ipc_group_dir(&group.folder),
        container_path: IPC_MOUNT.to_string(),
        read_only: false,
    });

    for extra in extras {
        mounts.push(VolumeMount {
            host_path: extra.host_path.clone(),
            container_path: format!(
                "{EXTRA_MOUNT_ROOT}/{}",
                extra.container_path.trim_start_matches("./")
            ),
            read_only: extra.read_only,
        });
    }
    mounts
}

fn orchestrator_overlays(paths: &StatePaths, allowlist_path: &Path) -> Vec<VolumeMount> {
    let mut protected = paths.orchestrator_paths();
    protected.push(allowlist_path.to_path_buf());
    protected
        .into_iter()
        // A bind of a missing host path would create it.
        .filter(|path| path.exists())
        .filter_map(|path| {
            let relative = path.strip_prefix(&paths.root).ok()?.to_path_buf();
            Some(VolumeMount {
                container_path: format!("{PROJECT_MOUNT}/{}", relative.display()),
                host_path: path,
                read_only: true,
            })
        })
        .collect()
}
