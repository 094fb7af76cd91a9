use super::{ExecutionError, VolumeMount};
use crate::config::BackendConfig;
use crate::group::GroupIdentity;
use crate::runtime::StatePaths;
use std::collections::BTreeMap;
use std::path::PathBuf;

const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationSpec {
    pub binary: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Start from an empty environment instead of inheriting the host's.
    pub clear_env: bool,
    pub env: BTreeMap<String, String>,
    /// Arguments for `binary` that stop the execution by name on timeout.
    pub stop_args: Option<Vec<String>>,
}

/// Picks the allow-listed variables that are actually set on the host.
pub fn collect_credentials(
    allowed: &[String],
    lookup: impl Fn(&str) -> Option<String>,
) -> BTreeMap<String, String> {
    allowed
        .iter()
        .filter_map(|key| lookup(key).map(|value| (key.clone(), value)))
        .collect()
}

pub fn container_name(group: &GroupIdentity, now_ms: i64) -> String {
    format!("hostclaw-{}-{now_ms}", group.folder.as_str().to_ascii_lowercase())
}

pub fn build_invocation(
    backend: &BackendConfig,
    paths: &StatePaths,
    group: &GroupIdentity,
    mounts: &[VolumeMount],
    credentials: &BTreeMap<String, String>,
    name: &str,
) -> Result<InvocationSpec, ExecutionError> {
    let cwd = paths.group_dir(&group.folder);
    match backend {
        BackendConfig::Container { runtime, image } => {
            let mut args = vec![
                "run".to_string(),
                "-i".to_string(),
                "--rm".to_string(),
                "--name".to_string(),
                name.to_string(),
                "-w".to_string(),
                super::layout::GROUP_MOUNT.to_string(),
            ];
            for mount in mounts {
                args.push("-v".to_string());
                let mut spec = format!("{}:{}", mount.host_path.display(), mount.container_path);
                if mount.read_only {
                    spec.push_str(":ro");
                }
                args.push(spec);
            }
            // `-e KEY` without a value copies the value from the client's env.
            for key in credentials.keys() {
                args.push("-e".to_string());
                args.push(key.clone());
            }
            args.push(image.clone());

            Ok(InvocationSpec {
                binary: runtime.clone(),
                args,
                cwd,
                clear_env: false,
                env: credentials.clone(),
                stop_args: Some(vec!["stop".to_string(), name.to_string()]),
            })
        }
        BackendConfig::Subprocess { command } => {
            let (binary, rest) = command.split_first().ok_or_else(|| {
                ExecutionError::Backend("subprocess backend has no command".to_string())
            })?;
            let mut env = credentials.clone();
            env.insert(
                "PATH".to_string(),
                std::env::var("PATH").unwrap_or_else(|_| FALLBACK_PATH.to_string()),
            );
            env.insert(
                "HOME".to_string(),
                paths.session_dir(&group.folder).display().to_string(),
            );
            env.insert(
                "HOSTCLAW_MOUNTS".to_string(),
                serde_json::to_string(mounts)?,
            );

            Ok(InvocationSpec {
                binary: binary.clone(),
                args: rest.to_vec(),
                cwd,
                clear_env: true,
                env,
                stop_args: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::ids::GroupFolder;

    fn identity() -> GroupIdentity {
        GroupIdentity {
            folder: GroupFolder::parse("Family").expect("folder"),
            is_privileged: false,
        }
    }

    fn mounts() -> Vec<VolumeMount> {
        vec![
            VolumeMount {
                host_path: PathBuf::from("/state/groups/Family"),
                container_path: "/workspace/group".to_string(),
                read_only: false,
            },
            VolumeMount {
                host_path: PathBuf::from("/state/groups/global"),
                container_path: "/workspace/global".to_string(),
                read_only: true,
            },
        ]
    }

    #[test]
    fn credentials_only_include_allowed_and_present_keys() {
        let allowed = vec!["API_KEY".to_string(), "MISSING".to_string()];
        let creds = collect_credentials(&allowed, |key| match key {
            "API_KEY" => Some("secret".to_string()),
            "OTHER" => Some("nope".to_string()),
            _ => None,
        });
        assert_eq!(creds.len(), 1);
        assert_eq!(creds.get("API_KEY").map(String::as_str), Some("secret"));
    }

    #[test]
    fn container_invocation_binds_mounts_and_names_env_keys_only() {
        let backend = BackendConfig::Container {
            runtime: "docker".to_string(),
            image: "agent:1".to_string(),
        };
        let creds = BTreeMap::from([("API_KEY".to_string(), "secret".to_string())]);
        let name = container_name(&identity(), 42);
        let spec = build_invocation(
            &backend,
            &StatePaths::new("/state"),
            &identity(),
            &mounts(),
            &creds,
            &name,
        )
        .expect("spec");

        assert_eq!(name, "hostclaw-family-42");
        assert_eq!(spec.binary, "docker");
        assert_eq!(&spec.args[..5], &["run", "-i", "--rm", "--name", "hostclaw-family-42"]);
        assert!(spec
            .args
            .contains(&"/state/groups/Family:/workspace/group".to_string()));
        assert!(spec
            .args
            .contains(&"/state/groups/global:/workspace/global:ro".to_string()));
        assert!(spec.args.windows(2).any(|w| w == ["-e", "API_KEY"]));
        assert!(!spec.args.iter().any(|arg| arg.contains("secret")));
        assert_eq!(spec.args.last().map(String::as_str), Some("agent:1"));
        assert_eq!(
            spec.stop_args,
            Some(vec!["stop".to_string(), "hostclaw-family-42".to_string()])
        );
    }

    #[test]
    fn subprocess_invocation_clears_env_and_passes_mount_table() {
        let backend = BackendConfig::Subprocess {
            command: vec!["/opt/agent".to_string(), "--json".to_string()],
        };
        let spec = build_invocation(
            &backend,
            &StatePaths::new("/state"),
            &identity(),
            &mounts(),
            &BTreeMap::new(),
            "unused",
        )
        .expect("spec");

        assert!(spec.clear_env);
        assert_eq!(spec.binary, "/opt/agent");
        assert_eq!(spec.args, vec!["--json".to_string()]);
        assert_eq!(spec.cwd, PathBuf::from("/state/groups/Family"));
        assert_eq!(
            spec.env.get("HOME").map(String::as_str),
            Some("/state/sessions/Family")
        );
        let table = spec.env.get("HOSTCLAW_MOUNTS").expect("mount table");
        assert!(table.contains("\"containerPath\":\"/workspace/global\""));
        assert!(table.contains("\"readOnly\":true"));
        assert!(spec.stop_args.is_none());
    }
}
