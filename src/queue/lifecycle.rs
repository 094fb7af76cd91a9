use super::{
    is_valid_queue_json_filename, queue_filename, IncomingMessage, OutgoingMessage, QueueError,
    QueuePaths,
};
use crate::shared::fs_atomic::atomic_write_file;
use serde::Serialize;
use std::ffi::OsStr;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// An inbound message that this process owns until it is completed or put back.
#[derive(Debug, Clone)]
pub struct ClaimedMessage {
    pub processing_path: PathBuf,
    pub payload: IncomingMessage,
}

/// Claims the first inbound file in name order. Another claimer winning the
/// rename is not an error; the next file is tried instead. An unparseable
/// file is parked in `failed/` and reported, so a retry moves past it.
pub fn claim_oldest(paths: &QueuePaths) -> Result<Option<ClaimedMessage>, QueueError> {
    for candidate in sorted_json_paths(&paths.incoming)? {
        let Some(name) = candidate.file_name() else {
            continue;
        };
        let processing_path = paths.processing.join(name);
        match fs::rename(&candidate, &processing_path) {
            Ok(()) => return read_claim(paths, processing_path, name).map(Some),
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&candidate, err)),
        }
    }
    Ok(None)
}

fn read_claim(
    paths: &QueuePaths,
    processing_path: PathBuf,
    name: &OsStr,
) -> Result<ClaimedMessage, QueueError> {
    let raw = match fs::read(&processing_path) {
        Ok(raw) => raw,
        Err(err) => {
            move_back(paths, &processing_path)?;
            return Err(io_err(&processing_path, err));
        }
    };
    match serde_json::from_slice::<IncomingMessage>(&raw) {
        Ok(payload) => Ok(ClaimedMessage {
            processing_path,
            payload,
        }),
        Err(err) => {
            let parked = paths.failed.join(name);
            fs::rename(&processing_path, &parked).map_err(|e| io_err(&processing_path, e))?;
            Err(parse_err(&parked, err))
        }
    }
}

pub fn complete(claimed: &ClaimedMessage) -> Result<(), QueueError> {
    fs::remove_file(&claimed.processing_path).map_err(|e| io_err(&claimed.processing_path, e))
}

/// Puts a claimed message back under its own name, so it keeps its place
/// ahead of anything that arrived later.
pub fn requeue_failure(
    paths: &QueuePaths,
    claimed: &ClaimedMessage,
) -> Result<PathBuf, QueueError> {
    move_back(paths, &claimed.processing_path)
}

pub fn enqueue_incoming(
    paths: &QueuePaths,
    message: &IncomingMessage,
) -> Result<PathBuf, QueueError> {
    let name = queue_filename(&message.chat_target, &message.message_id, message.timestamp);
    write_entry(&paths.incoming.join(name), message)
}

pub fn write_outgoing(
    paths: &QueuePaths,
    message: &OutgoingMessage,
) -> Result<PathBuf, QueueError> {
    let name = queue_filename(&message.chat_target, &message.message_id, message.timestamp);
    write_entry(&paths.outgoing.join(name), message)
}

fn write_entry<T: Serialize>(path: &Path, entry: &T) -> Result<PathBuf, QueueError> {
    let body = serde_json::to_vec_pretty(entry).map_err(|e| parse_err(path, e))?;
    atomic_write_file(path, &body).map_err(|e| io_err(path, e))?;
    Ok(path.to_path_buf())
}

/// Hands every file a previous process left in `processing/` back to
/// `incoming/`. Run before any claim is made.
pub fn recover_processing(paths: &QueuePaths) -> Result<Vec<PathBuf>, QueueError> {
    let mut orphans = Vec::new();
    for entry in fs::read_dir(&paths.processing).map_err(|e| io_err(&paths.processing, e))? {
        let path = entry.map_err(|e| io_err(&paths.processing, e))?.path();
        if path.is_file() {
            orphans.push(path);
        }
    }
    orphans.sort();
    orphans
        .iter()
        .map(|orphan| move_back(paths, orphan))
        .collect()
}

/// Visible `*.json` entries of `dir`, sorted by file name.
pub fn sorted_json_paths(dir: &Path) -> Result<Vec<PathBuf>, QueueError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let path = entry.map_err(|e| io_err(dir, e))?.path();
        let is_entry = path
            .file_name()
            .and_then(OsStr::to_str)
            .is_some_and(is_valid_queue_json_filename);
        if is_entry && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}

fn move_back(paths: &QueuePaths, processing_path: &Path) -> Result<PathBuf, QueueError> {
    let name = processing_path
        .file_name()
        .and_then(OsStr::to_str)
        .unwrap_or("message.json");
    let target = vacant_incoming_path(&paths.incoming, name);
    fs::rename(processing_path, &target).map_err(|e| io_err(processing_path, e))?;
    Ok(target)
}

/// `name` itself when free, otherwise `<stem>-r<n>.json` for the first free n.
fn vacant_incoming_path(incoming: &Path, name: &str) -> PathBuf {
    let preferred = incoming.join(name);
    if !preferred.exists() {
        return preferred;
    }
    let stem = name.strip_suffix(".json").unwrap_or(name);
    (1u32..)
        .map(|n| incoming.join(format!("{stem}-r{n}.json")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(preferred)
}

fn io_err(path: &Path, source: std::io::Error) -> QueueError {
    QueueError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn parse_err(path: &Path, source: serde_json::Error) -> QueueError {
    QueueError::Parse {
        path: path.display().to_string(),
        source,
    }
}
