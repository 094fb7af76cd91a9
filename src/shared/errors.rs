#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("cannot create state directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("another supervisor owns this state root (pid {pid})")]
    AlreadyRunning { pid: u32 },
    #[error("supervisor is not running")]
    NotRunning,
    #[error("supervisor pid {pid} survived TERM and KILL")]
    StopFailedAlive { pid: u32 },
    #[error("cannot launch background supervisor: {0}")]
    Spawn(String),
    #[error("cannot drop signal file {path}: {source}")]
    WriteSignal {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot read supervisor lock {path}: {source}")]
    ReadLock {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write supervisor lock {path}: {source}")]
    WriteLock {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    Queue(#[from] crate::queue::QueueError),
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
    #[error(transparent)]
    Mounts(#[from] crate::mounts::MountPolicyError),
}
