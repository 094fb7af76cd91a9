use super::MountPolicyError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountRule {
    pub path_pattern: String,
    pub allowed: bool,
    #[serde(default)]
    pub read_write: bool,
}

/// On-disk shape of `mount-allowlist.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountAllowlist {
    #[serde(default)]
    pub rules: Vec<MountRule>,
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
}

impl MountAllowlist {
    /// `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, MountPolicyError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(MountPolicyError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        if raw.trim().is_empty() {
            return Ok(Some(Self::default()));
        }
        serde_yaml::from_str(&raw)
            .map(Some)
            .map_err(|source| MountPolicyError::Parse {
                path: path.display().to_string(),
                source,
            })
    }
}
