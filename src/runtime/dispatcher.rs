use crate::queue::PerKeyScheduler;
use crate::shared::ids::GroupFolder;
use crate::tasks::Task;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Answer the messages stored for a chat since its cursor.
    Messages { chat_target: String },
    /// Run a task the scheduler has already claimed.
    Task(Task),
}

impl Job {
    pub fn is_messages(&self) -> bool {
        matches!(self, Self::Messages { .. })
    }
}

/// Does the work for one job. Implementations own their failure handling;
/// a job never reports an error back to the dispatcher.
pub trait JobExecutor: Send + Sync + 'static {
    fn execute(&self, group: &GroupFolder, job: Job);
}

/// Sends the completion even if the executor panics, so the group's slot is
/// always released.
struct CompletionGuard {
    group: Option<GroupFolder>,
    tx: Sender<GroupFolder>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(group) = self.group.take() {
            let _ = self.tx.send(group);
        }
    }
}

/// Runs jobs on worker threads with at most one job in flight per group and
/// at most `max_concurrent` overall. Jobs for a busy group wait in FIFO order.
pub struct GroupDispatcher<E: JobExecutor> {
    executor: Arc<E>,
    max_concurrent: usize,
    scheduler: PerKeyScheduler<GroupFolder, Job>,
    completions_tx: Sender<GroupFolder>,
    completions_rx: Receiver<GroupFolder>,
}

impl<E: JobExecutor> GroupDispatcher<E> {
    pub fn new(executor: Arc<E>, max_concurrent: usize) -> Self {
        let (completions_tx, completions_rx) = mpsc::channel();
        Self {
            executor,
            max_concurrent: max_concurrent.max(1),
            scheduler: PerKeyScheduler::default(),
            completions_tx,
            completions_rx,
        }
    }

    /// Queues a job. A message job for a group that already has one waiting
    /// is coalesced into it and `false` is returned.
    pub fn submit(&mut self, group: GroupFolder, job: Job) -> bool {
        if job.is_messages() && self.scheduler.has_pending(&group, Job::is_messages) {
            tracing::debug!(group = %group, "message job coalesced");
            return false;
        }
        self.scheduler.enqueue(group, job);
        true
    }

    /// Releases finished groups and starts whatever is runnable.
    pub fn pump(&mut self) {
        while let Ok(group) = self.completions_rx.try_recv() {
            self.scheduler.complete(&group);
        }
        self.start_runnable();
    }

    /// Blocks up to `timeout` for one completion, then pumps.
    pub fn wait(&mut self, timeout: Duration) {
        match self.completions_rx.recv_timeout(timeout) {
            Ok(group) => self.scheduler.complete(&group),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
        }
        self.pump();
    }

    /// Drops every job that has not started yet and returns them.
    pub fn drain_pending(&mut self) -> Vec<(GroupFolder, Job)> {
        self.scheduler
            .drain_pending()
            .into_iter()
            .map(|item| (item.key, item.value))
            .collect()
    }

    /// Waits for in-flight jobs without starting new ones. Returns false if
    /// some were still running at the deadline.
    pub fn wait_for_active(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.scheduler.active_len() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.completions_rx.recv_timeout(remaining.min(Duration::from_millis(100))) {
                Ok(group) => self.scheduler.complete(&group),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
        true
    }

    pub fn active_len(&self) -> usize {
        self.scheduler.active_len()
    }

    pub fn pending_len(&self) -> usize {
        self.scheduler.pending_len()
    }

    pub fn is_idle(&self) -> bool {
        self.active_len() == 0 && self.pending_len() == 0
    }

    fn start_runnable(&mut self) {
        let available = self.max_concurrent.saturating_sub(self.scheduler.active_len());
        for scheduled in self.scheduler.dequeue_runnable(available) {
            let executor = Arc::clone(&self.executor);
            let guard = CompletionGuard {
                group: Some(scheduled.key),
                tx: self.completions_tx.clone(),
            };
            thread::spawn(move || {
                if let Some(group) = guard.group.clone() {
                    executor.execute(&group, scheduled.value);
                }
                drop(guard);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        running: Mutex<HashMap<String, usize>>,
        max_seen: Mutex<HashMap<String, usize>>,
        total_max: Mutex<usize>,
        runs: Mutex<Vec<String>>,
    }

    impl JobExecutor for Recorder {
        fn execute(&self, group: &GroupFolder, job: Job) {
            let key = group.to_string();
            {
                let mut running = self.running.lock().expect("lock");
                let count = running.entry(key.clone()).or_default();
                *count += 1;
                let mut max_seen = self.max_seen.lock().expect("lock");
                let seen = max_seen.entry(key.clone()).or_default();
                *seen = (*seen).max(*count);
                let total: usize = running.values().sum();
                let mut total_max = self.total_max.lock().expect("lock");
                *total_max = (*total_max).max(total);
            }
            thread::sleep(Duration::from_millis(30));
            let label = match job {
                Job::Messages { chat_target } => format!("{key}:messages:{chat_target}"),
                Job::Task(task) => format!("{key}:task:{}", task.id),
            };
            self.runs.lock().expect("lock").push(label);
            *self.running.lock().expect("lock").entry(key).or_default() -= 1;
        }
    }

    fn folder(name: &str) -> GroupFolder {
        GroupFolder::parse(name).expect("folder")
    }

    fn run_to_idle<E: JobExecutor>(dispatcher: &mut GroupDispatcher<E>) {
        let deadline = Instant::now() + Duration::from_secs(10);
        dispatcher.pump();
        while !dispatcher.is_idle() {
            assert!(Instant::now() < deadline, "dispatcher did not go idle");
            dispatcher.wait(Duration::from_millis(20));
        }
    }

    #[test]
    fn one_job_per_group_at_a_time() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = GroupDispatcher::new(Arc::clone(&recorder), 8);
        for i in 0..4 {
            dispatcher.enqueue_message_like(folder("alpha"), format!("alpha-{i}"));
            dispatcher.enqueue_message_like(folder("beta"), format!("beta-{i}"));
        }
        run_to_idle(&mut dispatcher);

        let max_seen = recorder.max_seen.lock().expect("lock");
        assert_eq!(max_seen.get("alpha"), Some(&1));
        assert_eq!(max_seen.get("beta"), Some(&1));
        assert!(*recorder.total_max.lock().expect("lock") <= 2);
        let runs = recorder.runs.lock().expect("lock");
        assert_eq!(runs.len(), 8);
        let alpha: Vec<_> = runs.iter().filter(|r| r.starts_with("alpha")).cloned().collect();
        assert_eq!(
            alpha,
            (0..4)
                .map(|i| format!("alpha:messages:alpha-{i}"))
                .collect::<Vec<_>>()
        );
    }

    fn task(id: &str, folder_name: &str) -> Task {
        Task {
            id: crate::shared::ids::TaskId::parse(id).expect("task id"),
            group_folder: folder(folder_name),
            chat_target: format!("{folder_name}@chat"),
            prompt: "water the plants".to_string(),
            schedule_kind: crate::tasks::ScheduleKind::Interval,
            schedule_value: "60000".to_string(),
            context_mode: crate::tasks::ContextMode::Isolated,
            status: crate::tasks::TaskStatus::Active,
            next_run: Some(0),
            created_at: 0,
            last_run: None,
            last_result: None,
        }
    }

    #[test]
    fn message_and_task_jobs_for_one_group_never_overlap() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = GroupDispatcher::new(Arc::clone(&recorder), 8);
        let messages = || Job::Messages {
            chat_target: "alpha@chat".to_string(),
        };
        assert!(dispatcher.submit(folder("alpha"), Job::Task(task("task-1", "alpha"))));
        assert!(dispatcher.submit(folder("alpha"), messages()));
        assert!(dispatcher.submit(folder("alpha"), Job::Task(task("task-2", "alpha"))));
        dispatcher.pump();
        // The first job is running; a fresh trigger of either kind queues.
        assert!(dispatcher.submit(folder("alpha"), Job::Task(task("task-3", "alpha"))));
        run_to_idle(&mut dispatcher);

        assert_eq!(recorder.max_seen.lock().expect("lock").get("alpha"), Some(&1));
        assert_eq!(
            *recorder.runs.lock().expect("lock"),
            vec![
                "alpha:task:task-1".to_string(),
                "alpha:messages:alpha@chat".to_string(),
                "alpha:task:task-2".to_string(),
                "alpha:task:task-3".to_string(),
            ]
        );
    }

    #[test]
    fn global_limit_caps_parallel_groups() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = GroupDispatcher::new(Arc::clone(&recorder), 2);
        for name in ["a", "b", "c", "d", "e"] {
            dispatcher.enqueue_message_like(folder(name), name.to_string());
        }
        run_to_idle(&mut dispatcher);
        assert!(*recorder.total_max.lock().expect("lock") <= 2);
        assert_eq!(recorder.runs.lock().expect("lock").len(), 5);
    }

    #[test]
    fn pending_message_jobs_are_coalesced() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = GroupDispatcher::new(Arc::clone(&recorder), 1);
        let chat = || Job::Messages {
            chat_target: "alpha@chat".to_string(),
        };
        assert!(dispatcher.submit(folder("alpha"), chat()));
        assert!(!dispatcher.submit(folder("alpha"), chat()));
        dispatcher.pump();
        // The first is now running, so a new one may queue behind it.
        assert!(dispatcher.submit(folder("alpha"), chat()));
        assert!(!dispatcher.submit(folder("alpha"), chat()));
        run_to_idle(&mut dispatcher);
        assert_eq!(recorder.runs.lock().expect("lock").len(), 2);
    }

    #[test]
    fn drained_jobs_never_start() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = GroupDispatcher::new(Arc::clone(&recorder), 1);
        dispatcher.enqueue_message_like(folder("a"), "1".to_string());
        dispatcher.enqueue_message_like(folder("b"), "2".to_string());
        dispatcher.pump();
        assert_eq!(dispatcher.drain_pending().len(), 1);
        assert!(dispatcher.wait_for_active(Duration::from_secs(5)));
        assert_eq!(recorder.runs.lock().expect("lock").len(), 1);
    }

    impl<E: JobExecutor> GroupDispatcher<E> {
        /// Distinct chat targets so coalescing never applies.
        fn enqueue_message_like(&mut self, group: GroupFolder, chat_target: String) {
            self.scheduler.enqueue(group, Job::Messages { chat_target });
        }
    }
}
