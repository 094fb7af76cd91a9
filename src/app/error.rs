use crate::config::ConfigError;
use crate::mounts::MountPolicyError;
use crate::queue::QueueError;
use crate::runtime::RuntimeError;
use crate::store::StoreError;
use crate::tasks::ScheduleError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Mounts(#[from] MountPolicyError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("failed to initialize logging in {path}: {source}")]
    Logging {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Invalid(String),
    #[error("unknown task `{0}`")]
    UnknownTask(String),
}
