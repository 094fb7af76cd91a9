use super::{RuntimeError, StatePaths};
use crate::shared::fs_atomic::atomic_write_file;
use crate::shared::process::{is_process_alive, send_signal};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipState {
    NotRunning,
    Running { pid: u32 },
    Stale,
}

#[derive(Debug, Clone)]
pub struct StopResult {
    pub pid: u32,
    pub forced: bool,
}

pub fn supervisor_ownership_state(paths: &StatePaths) -> Result<OwnershipState, RuntimeError> {
    let path = paths.supervisor_lock_path();
    if !path.exists() {
        return Ok(OwnershipState::NotRunning);
    }
    match read_lock_pid(paths)? {
        Some(pid) if is_process_alive(pid) => Ok(OwnershipState::Running { pid }),
        _ => Ok(OwnershipState::Stale),
    }
}

/// Takes the single-supervisor lock for this process. A lock left by a dead
/// process is removed first.
pub fn acquire_supervisor_lock(paths: &StatePaths) -> Result<(), RuntimeError> {
    match supervisor_ownership_state(paths)? {
        OwnershipState::Running { pid } if pid != std::process::id() => {
            return Err(RuntimeError::AlreadyRunning { pid })
        }
        OwnershipState::Running { .. } => return Ok(()),
        OwnershipState::Stale => {
            tracing::warn!(path = %paths.supervisor_lock_path().display(), "removing stale supervisor lock");
            release_supervisor_lock(paths);
        }
        OwnershipState::NotRunning => {}
    }

    let path = paths.supervisor_lock_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| RuntimeError::CreateDir {
            path: parent.display().to_string(),
            source,
        })?;
    }
    fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&path)
        .and_then(|mut file| file.write_all(std::process::id().to_string().as_bytes()))
        .map_err(|source| RuntimeError::WriteLock {
            path: path.display().to_string(),
            source,
        })
}

pub fn release_supervisor_lock(paths: &StatePaths) {
    let _ = fs::remove_file(paths.supervisor_lock_path());
}

pub fn spawn_supervisor_process(state_root: &Path) -> Result<u32, RuntimeError> {
    let exe = std::env::current_exe().map_err(|e| RuntimeError::Spawn(e.to_string()))?;
    let child = Command::new(exe)
        .arg("__supervisor")
        .arg("--state-root")
        .arg(state_root)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| RuntimeError::Spawn(e.to_string()))?;
    Ok(child.id())
}

pub fn signal_stop(paths: &StatePaths) -> Result<(), RuntimeError> {
    write_signal(&paths.stop_signal_path(), b"stop")
}

/// Asks the running supervisor to re-read the mount allow-list.
pub fn signal_reload_mounts(paths: &StatePaths) -> Result<(), RuntimeError> {
    match supervisor_ownership_state(paths)? {
        OwnershipState::Running { .. } => write_signal(&paths.reload_mounts_signal_path(), b"reload"),
        _ => Err(RuntimeError::NotRunning),
    }
}

fn write_signal(path: &Path, body: &[u8]) -> Result<(), RuntimeError> {
    atomic_write_file(path, body).map_err(|source| RuntimeError::WriteSignal {
        path: path.display().to_string(),
        source,
    })
}

/// Requests a graceful stop, then escalates to TERM and KILL, giving each
/// stage its own grace period. The first stage waits `timeout`.
pub fn stop_active_supervisor(
    paths: &StatePaths,
    timeout: Duration,
) -> Result<StopResult, RuntimeError> {
    let pid = match supervisor_ownership_state(paths)? {
        OwnershipState::Running { pid } => pid,
        OwnershipState::Stale => {
            clear_daemon_files(paths);
            return Err(RuntimeError::NotRunning);
        }
        OwnershipState::NotRunning => return Err(RuntimeError::NotRunning),
    };

    signal_stop(paths)?;
    tracing::info!(pid, "supervisor stop requested");
    if exited_within(pid, timeout) {
        return Ok(StopResult { pid, forced: false });
    }

    for signal in ["-TERM", "-KILL"] {
        tracing::warn!(pid, signal, "supervisor still alive, escalating");
        send_signal(i64::from(pid), signal);
        if exited_within(pid, FORCED_STOP_GRACE) {
            clear_daemon_files(paths);
            return Ok(StopResult { pid, forced: true });
        }
    }
    tracing::error!(pid, "supervisor survived KILL");
    Err(RuntimeError::StopFailedAlive { pid })
}

const FORCED_STOP_GRACE: Duration = Duration::from_secs(2);

fn clear_daemon_files(paths: &StatePaths) {
    release_supervisor_lock(paths);
    let _ = fs::remove_file(paths.stop_signal_path());
}

fn exited_within(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_process_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(100));
    }
}

pub fn read_lock_pid(paths: &StatePaths) -> Result<Option<u32>, RuntimeError> {
    let path = paths.supervisor_lock_path();
    match fs::read_to_string(&path) {
        Ok(raw) => Ok(raw.trim().parse::<u32>().ok()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(RuntimeError::ReadLock {
            path: path.display().to_string(),
            source,
        }),
    }
}
