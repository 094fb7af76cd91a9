use super::dispatcher::{GroupDispatcher, Job};
use super::jobs::JobContext;
use super::message_loop::{ingest_incoming, pending_catch_up};
use super::ownership_lock::{acquire_supervisor_lock, release_supervisor_lock};
use super::scheduler_loop::claim_due_tasks;
use super::{bootstrap_state_root, RuntimeError, StatePaths};
use crate::config::Settings;
use crate::execution::{ExecutionLimits, ExecutionRunner};
use crate::ipc::{FileDropSource, IpcProcessor};
use crate::messaging::{Messenger, OutboxMessenger};
use crate::mounts::MountPolicy;
use crate::queue;
use crate::shared::time::now_ms;
use crate::store::Store;
use std::fs;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

const LOOP_WAIT: Duration = Duration::from_millis(50);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Runs the orchestrator in the foreground until a stop is signalled.
///
/// One control thread owns every poll loop and the dispatcher; executions
/// run on worker threads, at most one per group.
pub fn run_supervisor(paths: &StatePaths, settings: &Settings) -> Result<(), RuntimeError> {
    bootstrap_state_root(paths)?;
    for signal in [paths.stop_signal_path(), paths.reload_mounts_signal_path()] {
        let _ = fs::remove_file(signal);
    }
    acquire_supervisor_lock(paths)?;
    tracing::info!(pid = std::process::id(), root = %paths.root.display(), "supervisor started");

    let result = run_locked(paths, settings);

    release_supervisor_lock(paths);
    let _ = fs::remove_file(paths.stop_signal_path());
    match &result {
        Ok(()) => tracing::info!("supervisor stopped"),
        Err(err) => tracing::error!(error = %err, "supervisor failed"),
    }
    result
}

struct Intervals {
    messages: Duration,
    scheduler: Duration,
    ipc: Duration,
}

fn run_locked(paths: &StatePaths, settings: &Settings) -> Result<(), RuntimeError> {
    let privileged = settings.privileged_group()?;
    let tz = settings.tz();
    let store = Store::open(&paths.store_path())?;

    let cleared = store.clear_stale_claims()?;
    if cleared > 0 {
        tracing::warn!(count = cleared, "cleared task claims left by a previous run");
    }
    let queue_paths = paths.queue();
    let recovered = queue::recover_processing(&queue_paths)?;
    if !recovered.is_empty() {
        tracing::warn!(count = recovered.len(), "recovered in-flight inbound messages");
    }

    let policy = Arc::new(RwLock::new(MountPolicy::load(
        &settings.mount_allowlist_path()?,
    )?));
    let messenger: Arc<dyn Messenger> = Arc::new(OutboxMessenger::new(queue_paths.clone()));
    let context = Arc::new(JobContext {
        store: store.clone(),
        runner: ExecutionRunner::from_settings(paths.clone(), settings, Arc::clone(&policy)),
        messenger: Arc::clone(&messenger),
        paths: paths.clone(),
        privileged: privileged.clone(),
        assistant_name: settings.assistant_name.clone(),
        tz,
        limits: ExecutionLimits {
            timeout: settings.execution_timeout(),
            max_output_bytes: settings.max_output_bytes,
        },
    });
    let mut dispatcher = GroupDispatcher::new(context, settings.max_concurrent_executions);
    let mut ipc = IpcProcessor::new(
        Box::new(FileDropSource::new(paths.ipc_root(), paths.ipc_errors_dir())),
        store.clone(),
        messenger,
        paths.clone(),
        privileged,
        settings.trigger_token(),
        tz,
    );

    for (folder, chat_target) in pending_catch_up(&store)? {
        dispatcher.submit(folder, Job::Messages { chat_target });
    }

    let intervals = Intervals {
        messages: Duration::from_millis(settings.message_poll_interval_ms),
        scheduler: Duration::from_millis(settings.scheduler_poll_interval_ms),
        ipc: Duration::from_millis(settings.ipc_poll_interval_ms),
    };
    let started = Instant::now();
    let mut next_messages = started;
    let mut next_scheduler = started;
    let mut next_ipc = started;

    loop {
        if paths.stop_signal_path().exists() {
            tracing::info!("stop signal received");
            break;
        }
        if paths.reload_mounts_signal_path().exists() {
            let _ = fs::remove_file(paths.reload_mounts_signal_path());
            reload_mount_policy(&policy);
        }

        let now = Instant::now();
        if now >= next_messages {
            next_messages = now + intervals.messages;
            match ingest_incoming(&queue_paths, &store) {
                Ok(triggered) => {
                    for (folder, chat_target) in triggered {
                        dispatcher.submit(folder, Job::Messages { chat_target });
                    }
                }
                Err(err) => tracing::error!(error = %err, "inbound message poll failed"),
            }
        }
        if now >= next_scheduler {
            next_scheduler = now + intervals.scheduler;
            match claim_due_tasks(&store, now_ms()) {
                Ok(tasks) => {
                    for task in tasks {
                        dispatcher.submit(task.group_folder.clone(), Job::Task(task));
                    }
                }
                Err(err) => tracing::error!(error = %err, "scheduler poll failed"),
            }
        }
        if now >= next_ipc {
            next_ipc = now + intervals.ipc;
            match ipc.poll_once(now_ms()) {
                Ok(report) if report.processed + report.rejected > 0 => tracing::debug!(
                    processed = report.processed,
                    rejected = report.rejected,
                    deferred = report.deferred,
                    "ipc poll"
                ),
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "ipc poll failed"),
            }
        }

        dispatcher.wait(LOOP_WAIT);
    }

    shutdown(&store, &mut dispatcher);
    Ok(())
}

fn reload_mount_policy(policy: &RwLock<MountPolicy>) {
    let mut policy = policy.write().unwrap_or_else(PoisonError::into_inner);
    match policy.reload() {
        Ok(()) => tracing::info!(
            path = %policy.allowlist_path().display(),
            has_allowlist = policy.has_allowlist(),
            "mount allow-list reloaded"
        ),
        Err(err) => tracing::error!(error = %err, "mount allow-list reload failed, keeping previous rules"),
    }
}

/// Jobs that never started are dropped; their tasks are unclaimed so the next
/// run picks them up again. Inbound messages stay behind the agent cursor.
fn shutdown<E: super::dispatcher::JobExecutor>(store: &Store, dispatcher: &mut GroupDispatcher<E>) {
    for (group, job) in dispatcher.drain_pending() {
        if let Job::Task(task) = job {
            if let Err(err) = store.release_claim(task.id.as_str()) {
                tracing::warn!(group = %group, task_id = %task.id, error = %err, "failed to release task claim");
            }
        }
    }
    if !dispatcher.wait_for_active(SHUTDOWN_GRACE) {
        tracing::warn!(active = dispatcher.active_len(), "shutdown timed out waiting for executions");
    }
}
