use super::{io_err, IpcError};
use crate::queue::sorted_json_paths;
use std::fs;
use std::path::{Path, PathBuf};

/// Sub-directories of `ipc/<group>/` that executions drop requests into.
pub const IPC_REQUEST_DIRS: [&str; 2] = ["messages", "tasks"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcEnvelope {
    /// Raw name of the directory the request came from.
    pub issuer: String,
    pub name: String,
    pub body: Vec<u8>,
    pub location: PathBuf,
}

/// Transport for IPC requests. Each envelope is finished exactly once, by
/// `complete` or by `reject`.
pub trait IpcSource: Send {
    fn pending(&mut self) -> Result<Vec<IpcEnvelope>, IpcError>;
    fn complete(&mut self, envelope: &IpcEnvelope) -> Result<(), IpcError>;
    /// Keeps the request for audit together with the reason.
    fn reject(&mut self, envelope: &IpcEnvelope, reason: &str) -> Result<PathBuf, IpcError>;
}

/// Per-group drop directories under the state root's `ipc/`.
#[derive(Debug, Clone)]
pub struct FileDropSource {
    ipc_root: PathBuf,
    errors_dir: PathBuf,
}

impl FileDropSource {
    pub fn new(ipc_root: impl Into<PathBuf>, errors_dir: impl Into<PathBuf>) -> Self {
        Self {
            ipc_root: ipc_root.into(),
            errors_dir: errors_dir.into(),
        }
    }

    fn group_dirs(&self) -> Result<Vec<(String, PathBuf)>, IpcError> {
        let entries = match fs::read_dir(&self.ipc_root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_err(&self.ipc_root, err)),
        };
        let mut dirs = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| io_err(&self.ipc_root, e))?.path();
            if !path.is_dir() || path == self.errors_dir {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                dirs.push((name.to_string(), path));
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

impl IpcSource for FileDropSource {
    fn pending(&mut self) -> Result<Vec<IpcEnvelope>, IpcError> {
        let mut out = Vec::new();
        for (issuer, group_dir) in self.group_dirs()? {
            for sub in IPC_REQUEST_DIRS {
                let dir = group_dir.join(sub);
                if !dir.is_dir() {
                    continue;
                }
                for path in sorted_json_paths(&dir)? {
                    let body = match fs::read(&path) {
                        Ok(body) => body,
                        Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                        Err(err) => return Err(io_err(&path, err)),
                    };
                    let name = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("request.json")
                        .to_string();
                    out.push(IpcEnvelope {
                        issuer: issuer.clone(),
                        name,
                        body,
                        location: path,
                    });
                }
            }
        }
        Ok(out)
    }

    fn complete(&mut self, envelope: &IpcEnvelope) -> Result<(), IpcError> {
        match fs::remove_file(&envelope.location) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&envelope.location, err)),
        }
    }

    fn reject(&mut self, envelope: &IpcEnvelope, reason: &str) -> Result<PathBuf, IpcError> {
        fs::create_dir_all(&self.errors_dir).map_err(|e| io_err(&self.errors_dir, e))?;
        let target = unused_path(&self.errors_dir, &format!("{}-{}", envelope.issuer, envelope.name));
        fs::rename(&envelope.location, &target).map_err(|e| io_err(&envelope.location, e))?;
        let reason_path = reason_path(&target);
        fs::write(&reason_path, format!("{reason}\n")).map_err(|e| io_err(&reason_path, e))?;
        Ok(target)
    }
}

pub fn reason_path(rejected: &Path) -> PathBuf {
    let mut name = rejected.as_os_str().to_os_string();
    name.push(".reason");
    PathBuf::from(name)
}

fn unused_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    (1..)
        .map(|n| dir.join(format!("{n}-{name}")))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}
