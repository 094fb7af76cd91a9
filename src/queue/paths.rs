use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePaths {
    pub incoming: PathBuf,
    pub processing: PathBuf,
    pub outgoing: PathBuf,
    /// Inbound files that could not be parsed.
    pub failed: PathBuf,
}

impl QueuePaths {
    pub fn from_state_root(state_root: &Path) -> Self {
        let queue = state_root.join("queue");
        Self {
            incoming: queue.join("incoming"),
            processing: queue.join("processing"),
            outgoing: queue.join("outgoing"),
            failed: queue.join("failed"),
        }
    }
}

/// `<timestamp>-<chat digest>-<message id>.json`. The zero-padded timestamp
/// leads so that name order is arrival order.
pub fn queue_filename(chat_target: &str, message_id: &str, timestamp: i64) -> String {
    format!(
        "{:013}-{}-{}.json",
        timestamp.max(0),
        chat_digest(chat_target),
        safe_message_id(message_id)
    )
}

pub fn is_valid_queue_json_filename(filename: &str) -> bool {
    // Dotfiles are in-flight atomic writes.
    if filename.starts_with('.') {
        return false;
    }
    filename
        .strip_suffix(".json")
        .is_some_and(|stem| !stem.trim().is_empty())
}

fn chat_digest(chat_target: &str) -> String {
    Sha256::digest(chat_target.as_bytes())[..4]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn safe_message_id(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "msg".to_string()
    } else {
        cleaned
    }
}
