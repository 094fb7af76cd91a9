use crate::queue::{self, QueueError, QueuePaths};
use crate::shared::ids::GroupFolder;
use crate::store::Store;
use std::collections::BTreeMap;

/// Groups whose chats received new stored messages, with the chat that needs
/// a message job.
pub type Triggered = BTreeMap<GroupFolder, String>;

/// Moves every queued inbound message into the store. Messages for chats that
/// are not registered are dropped; store failures put the file back for the
/// next poll.
pub fn ingest_incoming(queue_paths: &QueuePaths, store: &Store) -> Result<Triggered, QueueError> {
    let mut triggered = Triggered::new();
    loop {
        let claimed = match queue::claim_oldest(queue_paths) {
            Ok(Some(claimed)) => claimed,
            Ok(None) => break,
            Err(QueueError::Parse { path, source }) => {
                tracing::warn!(path = %path, error = %source, "malformed inbound message moved to failed");
                continue;
            }
            Err(err) => return Err(err),
        };
        let message = &claimed.payload;

        let group = match store.group_by_chat(&message.chat_target) {
            Ok(group) => group,
            Err(err) => {
                tracing::error!(chat_target = %message.chat_target, error = %err, "group lookup failed");
                queue::requeue_failure(queue_paths, &claimed)?;
                break;
            }
        };
        let Some(group) = group else {
            tracing::debug!(chat_target = %message.chat_target, "message for unregistered chat dropped");
            queue::complete(&claimed)?;
            continue;
        };

        match store.insert_message(message) {
            Ok(inserted) => {
                if !inserted {
                    tracing::debug!(message_id = %message.message_id, "duplicate message ignored");
                }
                triggered.insert(group.folder, message.chat_target.clone());
                queue::complete(&claimed)?;
            }
            Err(err) => {
                tracing::error!(chat_target = %message.chat_target, error = %err, "failed to store message");
                queue::requeue_failure(queue_paths, &claimed)?;
                break;
            }
        }
    }
    Ok(triggered)
}

/// Registered chats with stored messages past their agent cursor. Run once at
/// startup so messages that arrived before a crash still get answered.
pub fn pending_catch_up(store: &Store) -> Result<Triggered, crate::store::StoreError> {
    let mut triggered = Triggered::new();
    for group in store.list_groups()? {
        if !store.messages_since_cursor(&group.chat_target)?.is_empty() {
            triggered.insert(group.folder, group.chat_target);
        }
    }
    Ok(triggered)
}
