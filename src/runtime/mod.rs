//! The long-running orchestrator: state layout, the single-supervisor lock,
//! the per-group dispatcher and the poll loops that feed it.

pub mod dispatcher;
pub mod jobs;
pub mod message_loop;
pub mod ownership_lock;
pub mod scheduler_loop;
pub mod state_paths;
pub mod supervisor;

pub use crate::shared::errors::RuntimeError;
pub use dispatcher::{GroupDispatcher, Job, JobExecutor};
pub use jobs::{JobContext, JobError};
pub use ownership_lock::{
    acquire_supervisor_lock, release_supervisor_lock, signal_reload_mounts,
    signal_stop, spawn_supervisor_process, stop_active_supervisor, supervisor_ownership_state,
    OwnershipState, StopResult,
};
pub use state_paths::{bootstrap_state_root, ensure_group_dirs, StatePaths, STORE_FILE_NAME};
pub use supervisor::run_supervisor;
