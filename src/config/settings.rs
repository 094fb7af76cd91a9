use super::ConfigError;
use crate::shared::fs_atomic::atomic_write_file;
use crate::shared::ids::GroupFolder;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ASSISTANT_NAME: &str = "Andy";
pub const DEFAULT_PRIVILEGED_FOLDER: &str = "main";
pub const DEFAULT_MESSAGE_POLL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_SCHEDULER_POLL_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_IPC_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_EXECUTION_TIMEOUT_MS: u64 = 300_000;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_MAX_CONCURRENT_EXECUTIONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// One throwaway container per execution.
    Container { runtime: String, image: String },
    /// A restricted child process; used where no container runtime exists.
    Subprocess { command: Vec<String> },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Container {
            runtime: "docker".to_string(),
            image: "hostclaw-agent:latest".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub assistant_name: String,
    pub privileged_folder: String,
    pub message_poll_interval_ms: u64,
    pub scheduler_poll_interval_ms: u64,
    pub ipc_poll_interval_ms: u64,
    pub execution_timeout_ms: u64,
    pub max_output_bytes: usize,
    pub max_concurrent_executions: usize,
    pub timezone: String,
    pub mount_allowlist_path: Option<PathBuf>,
    pub credential_env: Vec<String>,
    pub backend: BackendConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            assistant_name: DEFAULT_ASSISTANT_NAME.to_string(),
            privileged_folder: DEFAULT_PRIVILEGED_FOLDER.to_string(),
            message_poll_interval_ms: DEFAULT_MESSAGE_POLL_INTERVAL_MS,
            scheduler_poll_interval_ms: DEFAULT_SCHEDULER_POLL_INTERVAL_MS,
            ipc_poll_interval_ms: DEFAULT_IPC_POLL_INTERVAL_MS,
            execution_timeout_ms: DEFAULT_EXECUTION_TIMEOUT_MS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_concurrent_executions: DEFAULT_MAX_CONCURRENT_EXECUTIONS,
            timezone: "UTC".to_string(),
            mount_allowlist_path: None,
            credential_env: vec![
                "ANTHROPIC_API_KEY".to_string(),
                "CLAUDE_CODE_OAUTH_TOKEN".to_string(),
            ],
            backend: BackendConfig::default(),
        }
    }
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let body = serde_yaml::to_string(self).map_err(|source| ConfigError::Encode {
            path: path.display().to_string(),
            source,
        })?;
        atomic_write_file(path, body.as_bytes()).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.assistant_name.trim().is_empty() {
            return Err(ConfigError::Settings(
                "`assistant_name` must be non-empty".to_string(),
            ));
        }
        GroupFolder::parse(&self.privileged_folder).map_err(ConfigError::Settings)?;

        for (field, value) in [
            ("message_poll_interval_ms", self.message_poll_interval_ms),
            ("scheduler_poll_interval_ms", self.scheduler_poll_interval_ms),
            ("ipc_poll_interval_ms", self.ipc_poll_interval_ms),
            ("execution_timeout_ms", self.execution_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Settings(format!("`{field}` must be >= 1")));
            }
        }
        if self.max_output_bytes == 0 {
            return Err(ConfigError::Settings(
                "`max_output_bytes` must be >= 1".to_string(),
            ));
        }
        if self.max_concurrent_executions == 0 {
            return Err(ConfigError::Settings(
                "`max_concurrent_executions` must be >= 1".to_string(),
            ));
        }
        self.timezone.parse::<Tz>().map_err(|_| {
            ConfigError::Settings(format!(
                "invalid timezone `{}`; expected IANA timezone id",
                self.timezone
            ))
        })?;
        for key in &self.credential_env {
            if key.is_empty() || key.contains('=') {
                return Err(ConfigError::Settings(format!(
                    "invalid credential variable name `{key}`"
                )));
            }
        }

        match &self.backend {
            BackendConfig::Container { runtime, image } => {
                if runtime.trim().is_empty() || image.trim().is_empty() {
                    return Err(ConfigError::Settings(
                        "container backend requires `runtime` and `image`".to_string(),
                    ));
                }
            }
            BackendConfig::Subprocess { command } => {
                if command.first().map_or(true, |bin| bin.trim().is_empty()) {
                    return Err(ConfigError::Settings(
                        "subprocess backend requires a non-empty `command`".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Falls back to UTC; `validate` has already rejected unknown zones.
    pub fn tz(&self) -> Tz {
        self.timezone.parse::<Tz>().unwrap_or(Tz::UTC)
    }

    pub fn privileged_group(&self) -> Result<GroupFolder, ConfigError> {
        GroupFolder::parse(&self.privileged_folder).map_err(ConfigError::Settings)
    }

    pub fn trigger_token(&self) -> String {
        format!("@{}", self.assistant_name)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn mount_allowlist_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.mount_allowlist_path {
            Some(path) => Ok(path.clone()),
            None => super::default_mount_allowlist_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_validate() {
        let settings = Settings::default();
        settings.validate().expect("defaults are valid");
        assert_eq!(settings.trigger_token(), "@Andy");
        assert_eq!(settings.tz(), Tz::UTC);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "assistant_name: Nova\ntimezone: Europe/Berlin\nbackend:\n  type: subprocess\n  command: [\"/usr/local/bin/agent\"]\n",
        )
        .expect("write");

        let settings = Settings::from_path(&path).expect("parse");
        settings.validate().expect("valid");
        assert_eq!(settings.assistant_name, "Nova");
        assert_eq!(settings.tz(), chrono_tz::Europe::Berlin);
        assert_eq!(
            settings.scheduler_poll_interval_ms,
            DEFAULT_SCHEDULER_POLL_INTERVAL_MS
        );
        assert_eq!(
            settings.backend,
            BackendConfig::Subprocess {
                command: vec!["/usr/local/bin/agent".to_string()]
            }
        );
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.timezone = "Mars/Olympus".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.ipc_poll_interval_ms = 0;
        let err = settings.validate().expect_err("zero interval");
        assert!(err.to_string().contains("ipc_poll_interval_ms"));

        let mut settings = Settings::default();
        settings.privileged_folder = "../main".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.backend = BackendConfig::Subprocess { command: vec![] };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn save_round_trips_through_yaml() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        let mut settings = Settings::default();
        settings.max_concurrent_executions = 2;
        settings.save(&path).expect("save");
        let loaded = Settings::from_path(&path).expect("load");
        assert_eq!(loaded.max_concurrent_executions, 2);
    }
}
