use crate::app::command_support::{ensure_runtime_root, load_settings, open_store};
use crate::app::AppError;
use crate::config::Settings;
use crate::runtime::{
    run_supervisor, spawn_supervisor_process, stop_active_supervisor, supervisor_ownership_state,
    OwnershipState, RuntimeError, StatePaths,
};
use std::time::Duration;

const STOP_TIMEOUT: Duration = Duration::from_secs(15);

pub fn cmd_setup(paths: &StatePaths) -> Result<String, AppError> {
    ensure_runtime_root(paths)?;
    let settings_file = paths.settings_file();
    let created_settings = if settings_file.exists() {
        false
    } else {
        Settings::default().save(&settings_file)?;
        true
    };
    let settings = load_settings(paths)?;
    open_store(paths)?;
    let allowlist = settings.mount_allowlist_path()?;

    Ok(format!(
        "setup complete\nstate_root={}\nconfig={}\nconfig_created={}\nstore={}\nmount_allowlist={}\nmount_allowlist_present={}",
        paths.root.display(),
        settings_file.display(),
        created_settings,
        paths.store_path().display(),
        allowlist.display(),
        allowlist.exists()
    ))
}

pub fn cmd_start(paths: &StatePaths, detach: bool) -> Result<String, AppError> {
    ensure_runtime_root(paths)?;
    let settings = load_settings(paths)?;
    if let OwnershipState::Running { pid } = supervisor_ownership_state(paths)? {
        return Err(RuntimeError::AlreadyRunning { pid }.into());
    }

    if detach {
        let pid = spawn_supervisor_process(&paths.root)?;
        tracing::info!(pid, "supervisor start requested");
        return Ok(format!(
            "started\nstate_root={}\npid={pid}",
            paths.root.display()
        ));
    }

    run_supervisor(paths, &settings)?;
    Ok("supervisor exited".to_string())
}

pub fn cmd_supervisor(paths: &StatePaths) -> Result<String, AppError> {
    let settings = load_settings(paths)?;
    run_supervisor(paths, &settings)?;
    Ok("supervisor exited".to_string())
}

pub fn cmd_stop(paths: &StatePaths) -> Result<String, AppError> {
    match stop_active_supervisor(paths, STOP_TIMEOUT) {
        Ok(result) => Ok(format!(
            "stopped\npid={}\nforced={}",
            result.pid, result.forced
        )),
        Err(RuntimeError::NotRunning) => Ok("stopped\nrunning=false".to_string()),
        Err(err) => Err(err.into()),
    }
}
