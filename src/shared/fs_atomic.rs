use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Writes through a hidden sibling file and renames it into place, so readers
/// polling the directory never observe a partially written file.
pub fn atomic_write_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other("path has no parent"))?;
    fs::create_dir_all(dir)?;

    let staging = staging_path(dir, path)?;
    let staged = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&staging)
        .and_then(|mut file| {
            file.write_all(content)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&staging, path));
    if staged.is_err() {
        let _ = fs::remove_file(&staging);
    }
    staged?;
    sync_dir(dir)
}

fn staging_path(dir: &Path, target: &Path) -> std::io::Result<PathBuf> {
    let mut nonce = [0u8; 6];
    getrandom::getrandom(&mut nonce).map_err(|e| std::io::Error::other(e.to_string()))?;
    let suffix: String = nonce.iter().map(|b| format!("{b:02x}")).collect();
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    Ok(dir.join(format!(".{name}.tmp-{suffix}")))
}

pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let body = serde_json::to_vec_pretty(value).map_err(std::io::Error::other)?;
    atomic_write_file(path, &body)
}

/// Directory fsync is a unix notion; elsewhere the rename is as durable as it gets.
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    if cfg!(unix) {
        fs::File::open(dir)?.sync_all()
    } else {
        Ok(())
    }
}
