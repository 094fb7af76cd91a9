use super::RuntimeError;
use crate::queue::QueuePaths;
use crate::shared::ids::GroupFolder;
use std::fs;
use std::path::{Path, PathBuf};

pub const STORE_FILE_NAME: &str = "hostclaw.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub root: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn required_directories(&self) -> Vec<PathBuf> {
        let queue = self.queue();
        vec![
            self.groups_dir(),
            self.global_dir(),
            self.root.join("sessions"),
            self.ipc_root(),
            self.ipc_errors_dir(),
            self.root.join("store"),
            self.logs_dir(),
            self.daemon_dir(),
            queue.incoming,
            queue.processing,
            queue.outgoing,
            queue.failed,
        ]
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join(crate::config::SETTINGS_FILE_NAME)
    }

    /// Files only the orchestrator may write, even though they sit under a
    /// root the privileged group can see.
    pub fn orchestrator_paths(&self) -> Vec<PathBuf> {
        vec![
            self.settings_file(),
            self.root.join("store"),
            self.daemon_dir(),
        ]
    }

    pub fn store_path(&self) -> PathBuf {
        self.root.join("store").join(STORE_FILE_NAME)
    }

    pub fn queue(&self) -> QueuePaths {
        QueuePaths::from_state_root(&self.root)
    }

    pub fn groups_dir(&self) -> PathBuf {
        self.root.join("groups")
    }

    pub fn group_dir(&self, folder: &GroupFolder) -> PathBuf {
        self.groups_dir().join(folder.as_str())
    }

    /// Shared read-only area every non-privileged group sees.
    pub fn global_dir(&self) -> PathBuf {
        self.groups_dir().join("global")
    }

    pub fn session_dir(&self, folder: &GroupFolder) -> PathBuf {
        self.root.join("sessions").join(folder.as_str())
    }

    pub fn ipc_root(&self) -> PathBuf {
        self.root.join("ipc")
    }

    pub fn ipc_group_dir(&self, folder: &GroupFolder) -> PathBuf {
        self.ipc_root().join(folder.as_str())
    }

    pub fn ipc_errors_dir(&self) -> PathBuf {
        self.ipc_root().join("errors")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn daemon_dir(&self) -> PathBuf {
        self.root.join("daemon")
    }

    pub fn supervisor_lock_path(&self) -> PathBuf {
        self.daemon_dir().join("supervisor.lock")
    }

    pub fn stop_signal_path(&self) -> PathBuf {
        self.daemon_dir().join("stop")
    }

    pub fn reload_mounts_signal_path(&self) -> PathBuf {
        self.daemon_dir().join("reload-mounts")
    }
}

pub fn bootstrap_state_root(paths: &StatePaths) -> Result<(), RuntimeError> {
    for path in paths.required_directories() {
        create_dir(&path)?;
    }
    Ok(())
}

/// Creates the per-group directories an execution expects to find mounted.
pub fn ensure_group_dirs(paths: &StatePaths, folder: &GroupFolder) -> Result<(), RuntimeError> {
    let ipc = paths.ipc_group_dir(folder);
    for path in [
        paths.group_dir(folder),
        paths.session_dir(folder),
        ipc.join("messages"),
        ipc.join("tasks"),
    ] {
        create_dir(&path)?;
    }
    Ok(())
}

fn create_dir(path: &Path) -> Result<(), RuntimeError> {
    fs::create_dir_all(path).map_err(|source| RuntimeError::CreateDir {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn bootstrap_creates_required_directories() {
        let dir = tempdir().expect("tempdir");
        let paths = StatePaths::new(dir.path().join("state"));
        bootstrap_state_root(&paths).expect("bootstrap");
        for required in paths.required_directories() {
            assert!(required.is_dir(), "missing {}", required.display());
        }
    }

    #[test]
    fn group_dirs_are_scoped_by_folder() {
        let dir = tempdir().expect("tempdir");
        let paths = StatePaths::new(dir.path());
        let folder = GroupFolder::parse("family").expect("folder");
        ensure_group_dirs(&paths, &folder).expect("group dirs");
        assert!(paths.group_dir(&folder).is_dir());
        assert!(paths.ipc_group_dir(&folder).join("tasks").is_dir());
        assert!(paths.ipc_group_dir(&folder).join("messages").is_dir());
        assert!(paths.session_dir(&folder).is_dir());
    }
}
