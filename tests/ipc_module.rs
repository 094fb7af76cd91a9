use chrono_tz::Tz;
use hostclaw::group::RegisteredGroup;
use hostclaw::ipc::source::reason_path;
use hostclaw::ipc::{FileDropSource, IpcProcessor};
use hostclaw::messaging::{Messenger, OutboxMessenger};
use hostclaw::queue::{sorted_json_paths, OutgoingMessage};
use hostclaw::runtime::{bootstrap_state_root, ensure_group_dirs, StatePaths};
use hostclaw::shared::ids::GroupFolder;
use hostclaw::store::Store;
use hostclaw::tasks::{ContextMode, NewTask, ScheduleKind, TaskStatus};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

const NOW: i64 = 1_700_000_000_000;

struct Fixture {
    _dir: TempDir,
    paths: StatePaths,
    store: Store,
    processor: IpcProcessor,
}

fn group(folder: &str) -> RegisteredGroup {
    RegisteredGroup {
        chat_target: format!("{folder}@chat"),
        name: folder.to_string(),
        folder: GroupFolder::parse(folder).expect("folder"),
        trigger: "@Andy".to_string(),
        requires_trigger: true,
        additional_mounts: Vec::new(),
        added_at: 0,
    }
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().expect("tempdir");
        let paths = StatePaths::new(dir.path().join("state"));
        bootstrap_state_root(&paths).expect("bootstrap");
        let store = Store::open(&paths.store_path()).expect("store");
        for folder in ["main", "alpha", "beta"] {
            let group = group(folder);
            store.register_group(&group).expect("register");
            ensure_group_dirs(&paths, &group.folder).expect("group dirs");
        }
        let messenger: Arc<dyn Messenger> = Arc::new(OutboxMessenger::new(paths.queue()));
        let processor = IpcProcessor::new(
            Box::new(FileDropSource::new(paths.ipc_root(), paths.ipc_errors_dir())),
            store.clone(),
            messenger,
            paths.clone(),
            GroupFolder::parse("main").expect("folder"),
            "@Andy".to_string(),
            Tz::UTC,
        );
        Self {
            _dir: dir,
            paths,
            store,
            processor,
        }
    }

    fn drop_request(&self, issuer: &str, sub: &str, name: &str, body: &str) -> PathBuf {
        let dir = self.paths.ipc_root().join(issuer).join(sub);
        fs::create_dir_all(&dir).expect("request dir");
        let path = dir.join(name);
        fs::write(&path, body).expect("request");
        path
    }

    fn outgoing(&self) -> Vec<OutgoingMessage> {
        sorted_json_paths(&self.paths.queue().outgoing)
            .expect("outgoing")
            .into_iter()
            .map(|path| {
                serde_json::from_str(&fs::read_to_string(path).expect("read")).expect("parse")
            })
            .collect()
    }

    fn rejected_reason(&self, file: &str) -> String {
        let rejected = self.paths.ipc_errors_dir().join(file);
        assert!(rejected.is_file(), "missing {}", rejected.display());
        fs::read_to_string(reason_path(&rejected)).expect("reason")
    }

    fn task_for(&self, folder: &str) -> String {
        self.store
            .create_task(
                &NewTask {
                    group_folder: GroupFolder::parse(folder).expect("folder"),
                    chat_target: format!("{folder}@chat"),
                    prompt: "daily summary".to_string(),
                    schedule_kind: ScheduleKind::Interval,
                    schedule_value: "3600000".to_string(),
                    context_mode: ContextMode::Isolated,
                },
                NOW,
                &Tz::UTC,
            )
            .expect("task")
            .id
            .to_string()
    }
}

#[test]
fn non_privileged_group_cannot_schedule_for_another_group() {
    let mut fx = Fixture::new();
    let request = fx.drop_request(
        "alpha",
        "tasks",
        "schedule.json",
        r#"{"type":"schedule_task","prompt":"spy on beta","scheduleType":"interval","scheduleValue":"60000","groupFolder":"beta"}"#,
    );

    let report = fx.processor.poll_once(NOW).expect("poll");
    assert_eq!(report.rejected, 1);
    assert_eq!(report.processed, 0);
    assert!(!request.exists());
    assert!(fx.store.list_tasks().expect("tasks").is_empty());
    assert!(fx.rejected_reason("alpha-schedule.json").contains("not authorized"));
}

#[test]
fn group_schedules_for_itself_with_isolated_default_context() {
    let mut fx = Fixture::new();
    fx.drop_request(
        "alpha",
        "tasks",
        "schedule.json",
        r#"{"type":"schedule_task","prompt":"water the plants","scheduleType":"cron","scheduleValue":"0 9 * * *","groupFolder":"alpha"}"#,
    );

    let report = fx.processor.poll_once(NOW).expect("poll");
    assert_eq!(report.processed, 1);
    let tasks = fx.store.list_tasks().expect("tasks");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].group_folder.as_str(), "alpha");
    assert_eq!(tasks[0].chat_target, "alpha@chat");
    assert_eq!(tasks[0].context_mode, ContextMode::Isolated);
    assert_eq!(tasks[0].status, TaskStatus::Active);
    assert!(tasks[0].next_run.expect("next run") > NOW);
}

#[test]
fn privileged_group_schedules_for_any_registered_group() {
    let mut fx = Fixture::new();
    fx.drop_request(
        "main",
        "tasks",
        "for-beta.json",
        r#"{"type":"schedule_task","prompt":"remind beta","scheduleType":"once","scheduleValue":"2030-01-01T09:00:00Z","contextMode":"group","groupFolder":"beta"}"#,
    );
    fx.drop_request(
        "main",
        "tasks",
        "for-ghost.json",
        r#"{"type":"schedule_task","prompt":"nobody","scheduleType":"interval","scheduleValue":"60000","groupFolder":"ghost"}"#,
    );

    let report = fx.processor.poll_once(NOW).expect("poll");
    assert_eq!(report.processed, 1);
    assert_eq!(report.rejected, 1);
    let tasks = fx.store.list_tasks().expect("tasks");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].chat_target, "beta@chat");
    assert_eq!(tasks[0].context_mode, ContextMode::Group);
    fx.rejected_reason("main-for-ghost.json");
}

#[test]
fn cross_chat_send_is_rejected_and_own_chat_send_is_delivered() {
    let mut fx = Fixture::new();
    fx.drop_request(
        "alpha",
        "messages",
        "a.json",
        r#"{"type":"send_message","chatTarget":"beta@chat","text":"hello beta"}"#,
    );
    fx.drop_request(
        "alpha",
        "messages",
        "b.json",
        r#"{"type":"send_message","chatTarget":"alpha@chat","text":"hello me"}"#,
    );

    let report = fx.processor.poll_once(NOW).expect("poll");
    assert_eq!(report.processed, 1);
    assert_eq!(report.rejected, 1);

    let outgoing = fx.outgoing();
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0].chat_target, "alpha@chat");
    assert_eq!(outgoing[0].text, "hello me");
    assert!(fx.rejected_reason("alpha-a.json").contains("not authorized"));
}

#[test]
fn task_control_requires_ownership() {
    let mut fx = Fixture::new();
    let beta_task = fx.task_for("beta");
    let alpha_task = fx.task_for("alpha");
    fx.drop_request(
        "alpha",
        "tasks",
        "pause-beta.json",
        &format!(r#"{{"type":"pause_task","taskId":"{beta_task}"}}"#),
    );
    fx.drop_request(
        "alpha",
        "tasks",
        "pause-own.json",
        &format!(r#"{{"type":"pause_task","taskId":"{alpha_task}"}}"#),
    );
    fx.drop_request(
        "main",
        "tasks",
        "cancel-beta.json",
        &format!(r#"{{"type":"cancel_task","taskId":"{beta_task}"}}"#),
    );

    let report = fx.processor.poll_once(NOW).expect("poll");
    assert_eq!(report.processed, 2);
    assert_eq!(report.rejected, 1);

    let status = |id: &str| fx.store.get_task(id).expect("get").expect("task").status;
    assert_eq!(status(&alpha_task), TaskStatus::Paused);
    assert_eq!(status(&beta_task), TaskStatus::Cancelled);
    fx.rejected_reason("alpha-pause-beta.json");
}

#[test]
fn malformed_and_unknown_requests_are_kept_with_reasons() {
    let mut fx = Fixture::new();
    fx.drop_request("alpha", "tasks", "garbage.json", "{not json");
    fx.drop_request(
        "alpha",
        "tasks",
        "mystery.json",
        r#"{"type":"format_disk"}"#,
    );
    fx.drop_request(
        "alpha",
        "tasks",
        "register.json",
        r#"{"type":"register_group","chatTarget":"x@chat","name":"X","folder":"x","trigger":"@Andy"}"#,
    );

    let report = fx.processor.poll_once(NOW).expect("poll");
    assert_eq!(report.rejected, 3);
    assert!(fx.rejected_reason("alpha-garbage.json").contains("malformed"));
    assert!(fx.rejected_reason("alpha-mystery.json").contains("malformed"));
    assert!(fx.rejected_reason("alpha-register.json").contains("not authorized"));
    assert!(fx.store.group_by_chat("x@chat").expect("lookup").is_none());
}

#[test]
fn privileged_group_registers_new_group() {
    let mut fx = Fixture::new();
    fx.drop_request(
        "main",
        "tasks",
        "register.json",
        r#"{"type":"register_group","chatTarget":"book-club@chat","name":"Book club","folder":"books","trigger":""}"#,
    );

    let report = fx.processor.poll_once(NOW).expect("poll");
    assert_eq!(report.processed, 1);
    let group = fx
        .store
        .group_by_chat("book-club@chat")
        .expect("lookup")
        .expect("registered");
    assert_eq!(group.folder.as_str(), "books");
    assert_eq!(group.trigger, "@Andy");
    assert!(group.requires_trigger);
    assert!(fx.paths.ipc_group_dir(&group.folder).join("tasks").is_dir());
}
