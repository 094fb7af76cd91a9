//! Command-line surface of the `hostclaw` binary.

use crate::tasks::{ContextMode, ScheduleKind};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// hostclaw: runs chat-triggered and scheduled agent executions in isolated
/// per-group sandboxes.
#[derive(Parser, Debug)]
#[command(name = "hostclaw")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// State root; defaults to `$HOSTCLAW_STATE_ROOT` or `~/.hostclaw`.
    #[arg(long, global = true, value_name = "PATH")]
    pub state_root: Option<PathBuf>,

    /// Enable debug logging for hostclaw modules.
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the state root, default config and store.
    Setup,

    /// Start the orchestrator.
    ///
    /// Runs in the foreground unless `--detach` is given.
    Start(StartArgs),

    /// Stop the running orchestrator.
    Stop,

    /// Queue an inbound chat message, as a channel adapter would.
    Send(SendArgs),

    /// Manage the chat registry.
    #[command(subcommand)]
    Groups(GroupsCommand),

    /// Manage scheduled tasks.
    #[command(subcommand)]
    Tasks(TasksCommand),

    /// Inspect and reload the mount allow-list.
    #[command(subcommand)]
    Mounts(MountsCommand),

    #[command(name = "__supervisor", hide = true)]
    Supervisor,
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Run the orchestrator as a background process.
    #[arg(long, action = ArgAction::SetTrue)]
    pub detach: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    pub chat_target: String,
    pub sender: String,
    pub text: String,
}

#[derive(Subcommand, Debug)]
pub enum GroupsCommand {
    /// Register (or update) a chat and its group folder.
    Register(RegisterGroupArgs),
    /// List registered groups.
    List,
}

#[derive(Args, Debug)]
pub struct RegisterGroupArgs {
    pub chat_target: String,
    pub name: String,
    pub folder: String,

    /// Trigger word; defaults to `@<assistant_name>`.
    #[arg(long)]
    pub trigger: Option<String>,

    /// Answer every message, not just those containing the trigger.
    #[arg(long, action = ArgAction::SetTrue)]
    pub no_trigger: bool,

    /// Additional read-only host directory (repeatable).
    #[arg(long = "mount", value_name = "HOST_PATH")]
    pub mounts: Vec<String>,

    /// Additional host directory requested read-write (repeatable).
    #[arg(long = "mount-rw", value_name = "HOST_PATH")]
    pub rw_mounts: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum TasksCommand {
    /// Create a scheduled task.
    Create(CreateTaskArgs),
    /// List tasks, optionally for one group.
    List {
        #[arg(long)]
        group: Option<String>,
    },
    Pause {
        task_id: String,
    },
    Resume {
        task_id: String,
    },
    Cancel {
        task_id: String,
    },
    Delete {
        task_id: String,
    },
    /// Show the most recent firings of a task.
    Runs {
        task_id: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Args, Debug)]
pub struct CreateTaskArgs {
    /// Group folder that owns the task.
    #[arg(long)]
    pub group: String,

    /// Schedule kind: cron, interval or once.
    #[arg(long = "type", value_parser = parse_schedule_kind)]
    pub schedule_type: ScheduleKind,

    /// Cron expression, interval in milliseconds, or a local/RFC 3339 timestamp.
    #[arg(long = "value")]
    pub schedule_value: String,

    /// Whether the run resumes the group's session.
    #[arg(long = "context", value_parser = parse_context_mode, default_value = "group")]
    pub context_mode: ContextMode,

    pub prompt: String,
}

#[derive(Subcommand, Debug)]
pub enum MountsCommand {
    /// Evaluate one mount request against the allow-list.
    Check(MountCheckArgs),
    /// Ask the running orchestrator to re-read the allow-list.
    Reload,
}

#[derive(Args, Debug)]
pub struct MountCheckArgs {
    pub group: String,
    pub host_path: String,
    #[arg(long)]
    pub container_path: Option<String>,
    #[arg(long, action = ArgAction::SetTrue)]
    pub rw: bool,
}

fn parse_schedule_kind(raw: &str) -> Result<ScheduleKind, String> {
    ScheduleKind::parse(raw).map_err(|err| err.to_string())
}

fn parse_context_mode(raw: &str) -> Result<ContextMode, String> {
    ContextMode::parse(raw).map_err(|err| err.to_string())
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as Parser>::parse()
    }
}
