use super::{sql, Store, StoreError};
use crate::shared::ids::{GroupFolder, TaskId};
use crate::tasks::{
    first_run, resume_run, valid_transition, ContextMode, NewTask, RunStatus, ScheduleKind, Task,
    TaskRunLog, TaskStatus,
};
use chrono_tz::Tz;
use rusqlite::{params, OptionalExtension, Row};

const TASK_COLUMNS: &str = "id, group_folder, chat_target, prompt, schedule_kind, schedule_value, \
     context_mode, status, next_run, created_at, last_run, last_result";

/// What the scheduler records once a claimed task has been handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiringOutcome {
    pub task_id: TaskId,
    pub started_at: i64,
    pub duration_ms: i64,
    pub run_status: RunStatus,
    pub summary: Option<String>,
    /// `None` finishes the task.
    pub next_run: Option<i64>,
    /// Status to apply when the task is still active. Management changes made
    /// while the run was in flight win over this.
    pub status: TaskStatus,
}

struct RawTask {
    id: String,
    group_folder: String,
    chat_target: String,
    prompt: String,
    schedule_kind: String,
    schedule_value: String,
    context_mode: String,
    status: String,
    next_run: Option<i64>,
    created_at: i64,
    last_run: Option<i64>,
    last_result: Option<String>,
}

impl RawTask {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            group_folder: row.get(1)?,
            chat_target: row.get(2)?,
            prompt: row.get(3)?,
            schedule_kind: row.get(4)?,
            schedule_value: row.get(5)?,
            context_mode: row.get(6)?,
            status: row.get(7)?,
            next_run: row.get(8)?,
            created_at: row.get(9)?,
            last_run: row.get(10)?,
            last_result: row.get(11)?,
        })
    }

    fn into_task(self) -> Result<Task, StoreError> {
        Ok(Task {
            id: TaskId::parse(&self.id).map_err(|_| corrupt("task id", &self.id))?,
            group_folder: GroupFolder::parse(&self.group_folder)
                .map_err(|_| corrupt("group_folder", &self.group_folder))?,
            chat_target: self.chat_target,
            prompt: self.prompt,
            schedule_kind: ScheduleKind::parse(&self.schedule_kind)
                .map_err(|_| corrupt("schedule_kind", &self.schedule_kind))?,
            schedule_value: self.schedule_value,
            context_mode: ContextMode::parse(&self.context_mode)
                .map_err(|_| corrupt("context_mode", &self.context_mode))?,
            status: TaskStatus::parse(&self.status)
                .ok_or_else(|| corrupt("status", &self.status))?,
            next_run: self.next_run,
            created_at: self.created_at,
            last_run: self.last_run,
            last_result: self.last_result,
        })
    }
}

fn corrupt(column: &'static str, value: &str) -> StoreError {
    StoreError::Corrupt {
        column,
        value: value.to_string(),
    }
}

impl Store {
    /// Validates the schedule and persists an `active` task due at its first
    /// occurrence. Nothing is written when the schedule is invalid.
    pub fn create_task(&self, new: &NewTask, now: i64, tz: &Tz) -> Result<Task, StoreError> {
        let spec = crate::tasks::ScheduleSpec {
            kind: new.schedule_kind,
            value: &new.schedule_value,
        };
        let next_run = first_run(spec, now, tz)?;
        let id = TaskId::generate(now).map_err(|err| StoreError::IdGeneration(err.to_string()))?;
        let task = Task {
            id,
            group_folder: new.group_folder.clone(),
            chat_target: new.chat_target.clone(),
            prompt: new.prompt.clone(),
            schedule_kind: new.schedule_kind,
            schedule_value: new.schedule_value.trim().to_string(),
            context_mode: new.context_mode,
            status: TaskStatus::Active,
            next_run: Some(next_run),
            created_at: now,
            last_run: None,
            last_result: None,
        };

        let connection = self.connect()?;
        connection
            .execute(
                "
                INSERT INTO scheduled_tasks (
                    id, group_folder, chat_target, prompt, schedule_kind, schedule_value,
                    context_mode, status, next_run, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ",
                params![
                    task.id.as_str(),
                    task.group_folder.as_str(),
                    task.chat_target,
                    task.prompt,
                    task.schedule_kind.as_str(),
                    task.schedule_value,
                    task.context_mode.as_str(),
                    task.status.as_str(),
                    task.next_run,
                    task.created_at,
                ],
            )
            .map_err(sql)?;
        Ok(task)
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let connection = self.connect()?;
        let raw = connection
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE id = ?1"),
                params![id],
                RawTask::from_row,
            )
            .optional()
            .map_err(sql)?;
        raw.map(RawTask::into_task).transpose()
    }

    pub fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.query_tasks(
            &format!("SELECT {TASK_COLUMNS} FROM scheduled_tasks ORDER BY created_at ASC, id ASC"),
            params![],
        )
    }

    pub fn list_tasks_for_group(&self, folder: &GroupFolder) -> Result<Vec<Task>, StoreError> {
        self.query_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE group_folder = ?1 \
                 ORDER BY created_at ASC, id ASC"
            ),
            params![folder.as_str()],
        )
    }

    /// Active, unclaimed tasks whose `next_run` has passed, oldest first.
    pub fn due_tasks(&self, now: i64) -> Result<Vec<Task>, StoreError> {
        self.query_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM scheduled_tasks \
                 WHERE status = 'active' AND claimed_at IS NULL \
                   AND next_run IS NOT NULL AND next_run <= ?1 \
                 ORDER BY next_run ASC, id ASC"
            ),
            params![now],
        )
    }

    /// Compare-and-swap claim against the `next_run` the caller observed.
    /// Returns false when another poll claimed it first or the task changed.
    pub fn claim_task(&self, task: &Task, now: i64) -> Result<bool, StoreError> {
        let connection = self.connect()?;
        let updated = connection
            .execute(
                "
                UPDATE scheduled_tasks SET claimed_at = ?1
                WHERE id = ?2 AND status = 'active' AND claimed_at IS NULL AND next_run = ?3
                ",
                params![now, task.id.as_str(), task.next_run],
            )
            .map_err(sql)?;
        Ok(updated == 1)
    }

    /// Appends the run log and moves the task on in one transaction, releasing
    /// the claim.
    pub fn finish_firing(&self, outcome: &FiringOutcome) -> Result<(), StoreError> {
        let mut connection = self.connect()?;
        let tx = connection.transaction().map_err(sql)?;
        insert_run_log(
            &tx,
            &outcome.task_id,
            outcome.started_at,
            outcome.duration_ms,
            outcome.run_status,
            outcome.summary.as_deref(),
        )?;

        // SET expressions all read the pre-update row.
        let final_status = match outcome.next_run {
            Some(_) => outcome.status,
            None => TaskStatus::Completed,
        };
        let updated = tx
            .execute(
                "
                UPDATE scheduled_tasks SET
                    last_run = ?2,
                    last_result = ?3,
                    claimed_at = NULL,
                    next_run = CASE WHEN status = 'cancelled' THEN NULL ELSE ?4 END,
                    status = CASE
                        WHEN status = 'cancelled' THEN status
                        WHEN status = 'paused' AND ?4 IS NOT NULL THEN status
                        ELSE ?5
                    END
                WHERE id = ?1
                ",
                params![
                    outcome.task_id.as_str(),
                    outcome.started_at,
                    outcome.summary,
                    outcome.next_run,
                    final_status.as_str(),
                ],
            )
            .map_err(sql)?;
        if updated == 0 {
            return Err(StoreError::TaskNotFound(outcome.task_id.to_string()));
        }
        tx.commit().map_err(sql)
    }

    /// Records a skipped firing of a once task whose group is gone and takes it
    /// off the due list without completing it. Registering the group again
    /// re-arms it.
    pub fn park_task(&self, id: &TaskId, started_at: i64, summary: &str) -> Result<(), StoreError> {
        let mut connection = self.connect()?;
        let tx = connection.transaction().map_err(sql)?;
        insert_run_log(&tx, id, started_at, 0, RunStatus::Skipped, Some(summary))?;
        let updated = tx
            .execute(
                "
                UPDATE scheduled_tasks
                SET last_run = ?2, last_result = ?3, claimed_at = NULL, next_run = NULL
                WHERE id = ?1
                ",
                params![id.as_str(), started_at, summary],
            )
            .map_err(sql)?;
        if updated == 0 {
            return Err(StoreError::TaskNotFound(id.to_string()));
        }
        tx.commit().map_err(sql)
    }

    /// Gives back a claim for a task that was never run.
    pub fn release_claim(&self, id: &str) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection
            .execute(
                "UPDATE scheduled_tasks SET claimed_at = NULL WHERE id = ?1",
                params![id],
            )
            .map_err(sql)?;
        Ok(())
    }

    /// Claims left behind by a process that died mid-run.
    pub fn clear_stale_claims(&self) -> Result<usize, StoreError> {
        let connection = self.connect()?;
        connection
            .execute(
                "UPDATE scheduled_tasks SET claimed_at = NULL WHERE claimed_at IS NOT NULL",
                params![],
            )
            .map_err(sql)
    }

    /// Pause, resume or cancel. Resuming recomputes a stale `next_run`;
    /// cancelling clears it.
    pub fn set_task_status(
        &self,
        id: &str,
        to: TaskStatus,
        now: i64,
        tz: &Tz,
    ) -> Result<Task, StoreError> {
        let mut task = self
            .get_task(id)?
            .ok_or_else(|| StoreError::TaskNotFound(id.to_string()))?;
        if !valid_transition(task.status, to) {
            return Err(StoreError::InvalidTransition {
                task_id: id.to_string(),
                from: task.status.as_str(),
                to: to.as_str(),
            });
        }

        let next_run = match to {
            TaskStatus::Active => Some(resume_run(task.schedule(), task.next_run, now, tz)?),
            TaskStatus::Cancelled => None,
            TaskStatus::Paused | TaskStatus::Completed => task.next_run,
        };

        let connection = self.connect()?;
        let updated = connection
            .execute(
                "UPDATE scheduled_tasks SET status = ?2, next_run = ?3 WHERE id = ?1 AND status = ?4",
                params![id, to.as_str(), next_run, task.status.as_str()],
            )
            .map_err(sql)?;
        if updated == 0 {
            // Raced with a firing or another management call.
            return Err(StoreError::InvalidTransition {
                task_id: id.to_string(),
                from: task.status.as_str(),
                to: to.as_str(),
            });
        }
        task.status = to;
        task.next_run = next_run;
        Ok(task)
    }

    pub fn delete_task(&self, id: &str) -> Result<bool, StoreError> {
        let connection = self.connect()?;
        let deleted = connection
            .execute("DELETE FROM scheduled_tasks WHERE id = ?1", params![id])
            .map_err(sql)?;
        Ok(deleted == 1)
    }

    /// Most recent runs first.
    pub fn list_run_logs(&self, task_id: &str, limit: usize) -> Result<Vec<TaskRunLog>, StoreError> {
        let connection = self.connect()?;
        let mut statement = connection
            .prepare(
                "
                SELECT task_id, started_at, duration_ms, status, result_summary
                FROM task_run_logs
                WHERE task_id = ?1
                ORDER BY started_at DESC, id DESC
                LIMIT ?2
                ",
            )
            .map_err(sql)?;
        let rows = statement
            .query_map(params![task_id, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .map_err(sql)?;

        let mut out = Vec::new();
        for row in rows {
            let (task_id, started_at, duration_ms, status, result_summary) = row.map_err(sql)?;
            out.push(TaskRunLog {
                task_id: TaskId::parse(&task_id).map_err(|_| corrupt("task id", &task_id))?,
                started_at,
                duration_ms,
                status: RunStatus::parse(&status).ok_or_else(|| corrupt("run status", &status))?,
                result_summary,
            });
        }
        Ok(out)
    }

    fn query_tasks(
        &self,
        query: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<Task>, StoreError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(query).map_err(sql)?;
        let rows = statement.query_map(args, RawTask::from_row).map_err(sql)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(sql)?.into_task()?);
        }
        Ok(out)
    }
}

fn insert_run_log(
    tx: &rusqlite::Transaction<'_>,
    id: &TaskId,
    started_at: i64,
    duration_ms: i64,
    status: RunStatus,
    summary: Option<&str>,
) -> Result<(), StoreError> {
    tx.execute(
        "
        INSERT INTO task_run_logs (task_id, started_at, duration_ms, status, result_summary)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ",
        params![id.as_str(), started_at, duration_ms, status.as_str(), summary],
    )
    .map_err(sql)?;
    Ok(())
}
