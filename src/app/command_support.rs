use super::AppError;
use crate::config::{default_state_root, load_settings as load_settings_file, Settings};
use crate::runtime::{bootstrap_state_root, StatePaths};
use crate::shared::ids::GroupFolder;
use crate::shared::time::format_ms_rfc3339;
use crate::store::Store;
use std::path::PathBuf;

pub fn resolve_state_root(explicit: Option<PathBuf>) -> Result<StatePaths, AppError> {
    let root = match explicit {
        Some(root) => root,
        None => default_state_root()?,
    };
    Ok(StatePaths::new(root))
}

pub fn ensure_runtime_root(paths: &StatePaths) -> Result<(), AppError> {
    bootstrap_state_root(paths)?;
    Ok(())
}

pub fn load_settings(paths: &StatePaths) -> Result<Settings, AppError> {
    Ok(load_settings_file(&paths.settings_file())?)
}

pub fn open_store(paths: &StatePaths) -> Result<Store, AppError> {
    ensure_runtime_root(paths)?;
    Ok(Store::open(&paths.store_path())?)
}

pub fn parse_folder(raw: &str) -> Result<GroupFolder, AppError> {
    GroupFolder::parse(raw).map_err(AppError::Invalid)
}

pub fn render_time(ms: Option<i64>) -> String {
    ms.map(format_ms_rfc3339)
        .unwrap_or_else(|| "none".to_string())
}
