use super::{ConfigError, Settings};
use std::path::{Path, PathBuf};

pub trait EnvLookup {
    fn var(&self, name: &str) -> Option<String>;
}

impl<F> EnvLookup for F
where
    F: Fn(&str) -> Option<String>,
{
    fn var(&self, name: &str) -> Option<String> {
        self(name)
    }
}

/// Reads `config.yaml` when present, applies `HOSTCLAW_*` overrides and
/// validates the result.
pub fn load_settings(settings_file: &Path) -> Result<Settings, ConfigError> {
    load_settings_with_env(settings_file, &|name: &str| {
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    })
}

pub fn load_settings_with_env(
    settings_file: &Path,
    env: &dyn EnvLookup,
) -> Result<Settings, ConfigError> {
    let mut settings = if settings_file.exists() {
        Settings::from_path(settings_file)?
    } else {
        Settings::default()
    };
    apply_env_overrides(&mut settings, env)?;
    settings.validate()?;
    Ok(settings)
}

pub fn apply_env_overrides(
    settings: &mut Settings,
    env: &dyn EnvLookup,
) -> Result<(), ConfigError> {
    if let Some(name) = env.var("HOSTCLAW_ASSISTANT_NAME") {
        settings.assistant_name = name.trim().to_string();
    }
    if let Some(value) = parse_env::<u64>(env, "HOSTCLAW_POLL_INTERVAL_MS")? {
        settings.message_poll_interval_ms = value;
    }
    if let Some(value) = parse_env::<u64>(env, "HOSTCLAW_SCHEDULER_POLL_INTERVAL_MS")? {
        settings.scheduler_poll_interval_ms = value;
    }
    if let Some(value) = parse_env::<u64>(env, "HOSTCLAW_IPC_POLL_INTERVAL_MS")? {
        settings.ipc_poll_interval_ms = value;
    }
    if let Some(value) = parse_env::<u64>(env, "HOSTCLAW_EXECUTION_TIMEOUT_MS")? {
        settings.execution_timeout_ms = value;
    }
    if let Some(value) = parse_env::<usize>(env, "HOSTCLAW_MAX_OUTPUT_BYTES")? {
        settings.max_output_bytes = value;
    }
    if let Some(value) = parse_env::<usize>(env, "HOSTCLAW_MAX_CONCURRENT_EXECUTIONS")? {
        settings.max_concurrent_executions = value;
    }
    // A host `TZ` that is not an IANA name (e.g. `:/etc/localtime`) is ignored.
    if let Some(tz) = env.var("HOSTCLAW_TIMEZONE").or_else(|| {
        env.var("TZ")
            .filter(|tz| tz.trim().parse::<chrono_tz::Tz>().is_ok())
    }) {
        settings.timezone = tz.trim().to_string();
    }
    if let Some(path) = env.var("HOSTCLAW_MOUNT_ALLOWLIST") {
        settings.mount_allowlist_path = Some(PathBuf::from(path));
    }
    Ok(())
}

fn parse_env<T>(env: &dyn EnvLookup, name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = env.var(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|err| ConfigError::Env {
            name: name.to_string(),
            reason: err.to_string(),
        })
}
