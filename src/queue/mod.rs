pub mod lifecycle;
pub mod message;
pub mod paths;
pub mod scheduler;

pub use lifecycle::{
    claim_oldest, complete, enqueue_incoming, recover_processing, requeue_failure,
    sorted_json_paths, write_outgoing, ClaimedMessage,
};
pub use message::{IncomingMessage, OutgoingMessage};
pub use paths::{is_valid_queue_json_filename, queue_filename, QueuePaths};
pub use scheduler::{PerKeyScheduler, Scheduled};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid queue payload in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
