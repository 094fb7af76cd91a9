use crate::app::cli::{Cli, Command};
use crate::app::command_support::resolve_state_root;
use crate::app::AppError;
use crate::shared::logging::{init_cli_logging, init_logging};

pub mod chat;
pub mod daemon;
pub mod groups;
pub mod mounts;
pub mod tasks;

/// Runs one parsed command and returns its plain-text report.
pub fn run_cli(cli: Cli) -> Result<String, AppError> {
    let paths = resolve_state_root(cli.state_root)?;

    // The long-running forms log to the state root; everything else to stderr.
    let runs_supervisor = matches!(
        cli.command,
        Command::Supervisor | Command::Start(crate::app::cli::StartArgs { detach: false })
    );
    let _log_guard = if runs_supervisor {
        let log_dir = paths.logs_dir();
        Some(
            init_logging(&log_dir, cli.verbose).map_err(|source| AppError::Logging {
                path: log_dir.display().to_string(),
                source,
            })?,
        )
    } else {
        init_cli_logging(cli.verbose);
        None
    };

    match cli.command {
        Command::Setup => daemon::cmd_setup(&paths),
        Command::Start(args) => daemon::cmd_start(&paths, args.detach),
        Command::Stop => daemon::cmd_stop(&paths),
        Command::Supervisor => daemon::cmd_supervisor(&paths),
        Command::Send(args) => chat::cmd_send(&paths, &args),
        Command::Groups(command) => groups::cmd_groups(&paths, command),
        Command::Tasks(command) => tasks::cmd_tasks(&paths, command),
        Command::Mounts(command) => mounts::cmd_mounts(&paths, command),
    }
}
