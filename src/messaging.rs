use crate::queue::{write_outgoing, OutgoingMessage, QueueError, QueuePaths};
use crate::shared::time::now_ms;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("chat target must be non-empty")]
    EmptyTarget,
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// The chat platform as seen from the orchestrator.
pub trait Messenger: Send + Sync {
    /// Returns the platform message id.
    fn send_message(&self, chat_target: &str, text: &str) -> Result<String, MessagingError>;
}

/// Hands outbound messages to a channel adapter through `queue/outgoing/`.
#[derive(Debug)]
pub struct OutboxMessenger {
    queue: QueuePaths,
    counter: AtomicU64,
}

impl OutboxMessenger {
    pub fn new(queue: QueuePaths) -> Self {
        Self {
            queue,
            counter: AtomicU64::new(0),
        }
    }
}

impl Messenger for OutboxMessenger {
    fn send_message(&self, chat_target: &str, text: &str) -> Result<String, MessagingError> {
        if chat_target.trim().is_empty() {
            return Err(MessagingError::EmptyTarget);
        }
        let timestamp = now_ms();
        let message_id = format!(
            "out-{timestamp}-{}-{}",
            std::process::id(),
            self.counter.fetch_add(1, Ordering::Relaxed)
        );
        let path = write_outgoing(
            &self.queue,
            &OutgoingMessage {
                message_id: message_id.clone(),
                chat_target: chat_target.to_string(),
                text: text.to_string(),
                timestamp,
            },
        )?;
        tracing::debug!(chat_target, path = %path.display(), "outgoing message queued");
        Ok(message_id)
    }
}
