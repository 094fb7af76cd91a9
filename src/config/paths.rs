use crate::config::ConfigError;
use std::path::PathBuf;

pub const DEFAULT_STATE_ROOT_DIR: &str = ".hostclaw";
pub const SETTINGS_FILE_NAME: &str = "config.yaml";
pub const MOUNT_ALLOWLIST_FILE_NAME: &str = "mount-allowlist.yaml";

fn home_dir() -> Result<PathBuf, ConfigError> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or(ConfigError::HomeDirectoryUnavailable)
}

/// `HOSTCLAW_STATE_ROOT` when set, otherwise `~/.hostclaw`.
pub fn default_state_root() -> Result<PathBuf, ConfigError> {
    if let Some(root) = std::env::var_os("HOSTCLAW_STATE_ROOT").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(root));
    }
    Ok(home_dir()?.join(DEFAULT_STATE_ROOT_DIR))
}

/// Lives under `~/.config`, outside the state root, so no group mount can
/// ever expose it.
pub fn default_mount_allowlist_path() -> Result<PathBuf, ConfigError> {
    Ok(home_dir()?
        .join(".config/hostclaw")
        .join(MOUNT_ALLOWLIST_FILE_NAME))
}
