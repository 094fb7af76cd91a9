use crate::tasks::ScheduleError;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod groups;
pub mod messages;
pub mod tasks;

pub use messages::StoredMessage;
pub use tasks::FiringOutcome;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create store parent {path}: {source}")]
    CreateParent {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
    #[error("invalid {column} `{value}` in database")]
    Corrupt { column: &'static str, value: String },
    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("task `{0}` not found")]
    TaskNotFound(String),
    #[error("task `{task_id}` cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: &'static str,
        to: &'static str,
    },
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("failed to generate task id: {0}")]
    IdGeneration(String),
    #[error("invalid group: {0}")]
    InvalidGroup(String),
}

pub(crate) fn sql(source: rusqlite::Error) -> StoreError {
    StoreError::Sql { source }
}

/// Durable state: tasks and their run history, the chat registry, sessions
/// and stored chat messages. Every operation opens its own connection so the
/// handle can be cloned freely across worker threads.
#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::CreateParent {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS scheduled_tasks (
                    id TEXT PRIMARY KEY,
                    group_folder TEXT NOT NULL,
                    chat_target TEXT NOT NULL,
                    prompt TEXT NOT NULL,
                    schedule_kind TEXT NOT NULL,
                    schedule_value TEXT NOT NULL,
                    context_mode TEXT NOT NULL,
                    status TEXT NOT NULL,
                    next_run INTEGER,
                    created_at INTEGER NOT NULL,
                    last_run INTEGER,
                    last_result TEXT,
                    claimed_at INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_due
                    ON scheduled_tasks(status, next_run);

                CREATE TABLE IF NOT EXISTS task_run_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    task_id TEXT NOT NULL,
                    started_at INTEGER NOT NULL,
                    duration_ms INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    result_summary TEXT,
                    FOREIGN KEY (task_id) REFERENCES scheduled_tasks(id) ON DELETE CASCADE
                );
                CREATE INDEX IF NOT EXISTS idx_task_run_logs_task
                    ON task_run_logs(task_id, started_at);

                CREATE TABLE IF NOT EXISTS registered_groups (
                    chat_target TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    folder TEXT NOT NULL UNIQUE,
                    trigger_word TEXT NOT NULL,
                    requires_trigger INTEGER NOT NULL,
                    additional_mounts TEXT NOT NULL,
                    added_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    group_folder TEXT PRIMARY KEY,
                    session_id TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS messages (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    message_id TEXT NOT NULL,
                    chat_target TEXT NOT NULL,
                    sender_name TEXT NOT NULL,
                    text TEXT NOT NULL,
                    timestamp INTEGER NOT NULL,
                    UNIQUE (chat_target, message_id)
                );

                CREATE TABLE IF NOT EXISTS router_state (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
                ",
            )
            .map_err(sql)
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let connection = Connection::open(&self.db_path).map_err(|source| StoreError::Open {
            path: self.db_path.display().to_string(),
            source,
        })?;
        connection.busy_timeout(BUSY_TIMEOUT).map_err(sql)?;
        connection
            .execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(sql)?;
        Ok(connection)
    }
}
