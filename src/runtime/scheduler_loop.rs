use crate::store::{Store, StoreError};
use crate::tasks::Task;

/// Claims every due task. A task that another tick already claimed, or that
/// changed since it was read, is left alone.
pub fn claim_due_tasks(store: &Store, now: i64) -> Result<Vec<Task>, StoreError> {
    let mut claimed = Vec::new();
    for task in store.due_tasks(now)? {
        if store.claim_task(&task, now)? {
            tracing::debug!(task_id = %task.id, group = %task.group_folder, "task claimed");
            claimed.push(task);
        }
    }
    Ok(claimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::ids::GroupFolder;
    use crate::tasks::{ContextMode, NewTask, ScheduleKind};
    use chrono_tz::Tz;
    use tempfile::tempdir;

    #[test]
    fn due_task_is_claimed_once() {
        let dir = tempdir().expect("tempdir");
        let store = Store::open(&dir.path().join("store.db")).expect("store");
        let task = store
            .create_task(
                &NewTask {
                    group_folder: GroupFolder::parse("family").expect("folder"),
                    chat_target: "family@chat".to_string(),
                    prompt: "ping".to_string(),
                    schedule_kind: ScheduleKind::Interval,
                    schedule_value: "60000".to_string(),
                    context_mode: ContextMode::Isolated,
                },
                0,
                &Tz::UTC,
            )
            .expect("create");

        assert!(claim_due_tasks(&store, 59_999).expect("tick").is_empty());
        let claimed = claim_due_tasks(&store, 60_000).expect("tick");
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, task.id);
        assert!(claim_due_tasks(&store, 60_000).expect("second tick").is_empty());
    }
}
