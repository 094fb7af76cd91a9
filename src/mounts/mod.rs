pub mod allowlist;
pub mod policy;

pub use allowlist::{MountAllowlist, MountRule};
pub use policy::{MountPolicy, DEFAULT_BLOCKED_PATTERNS};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Container-side root for additional mounts.
pub const EXTRA_MOUNT_ROOT: &str = "/workspace/extra";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountRequest {
    pub host_path: String,
    /// Relative to [`EXTRA_MOUNT_ROOT`]; defaults to the host path's last component.
    #[serde(default)]
    pub container_path: Option<String>,
    #[serde(default = "default_read_only")]
    pub read_only: bool,
}

fn default_read_only() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MountDenied {
    #[error("no mount allow-list found at {path}; additional mounts are disabled")]
    NoAllowlist { path: String },
    #[error("path `{path}` contains parent-directory traversal")]
    Traversal { path: String },
    #[error("invalid container path `{path}`: {reason}")]
    InvalidContainerPath { path: String, reason: String },
    #[error("host path `{path}` must be absolute")]
    RelativeHostPath { path: String },
    #[error("host path `{path}` cannot be resolved: {reason}")]
    Unresolvable { path: String, reason: String },
    #[error("host path `{path}` would expose the mount allow-list")]
    ExposesAllowlist { path: String },
    #[error("host path `{path}` matches blocked pattern `{pattern}`")]
    Blocked { path: String, pattern: String },
    #[error("host path `{path}` is denied by rule `{pattern}`")]
    DeniedByRule { path: String, pattern: String },
    #[error("host path `{path}` is not covered by any allow rule")]
    NotAllowed { path: String },
}

#[derive(Debug, thiserror::Error)]
pub enum MountPolicyError {
    #[error("failed to read mount allow-list {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid mount allow-list {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid mount pattern `{pattern}`: {reason}")]
    Pattern { pattern: String, reason: String },
}
