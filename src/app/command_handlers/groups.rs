use crate::app::cli::{GroupsCommand, RegisterGroupArgs};
use crate::app::command_support::{load_settings, open_store, parse_folder, render_time};
use crate::app::AppError;
use crate::group::RegisteredGroup;
use crate::mounts::MountRequest;
use crate::runtime::{ensure_group_dirs, StatePaths};
use crate::shared::time::now_ms;

pub fn cmd_groups(paths: &StatePaths, command: GroupsCommand) -> Result<String, AppError> {
    match command {
        GroupsCommand::Register(args) => register(paths, args),
        GroupsCommand::List => list(paths),
    }
}

fn register(paths: &StatePaths, args: RegisterGroupArgs) -> Result<String, AppError> {
    let settings = load_settings(paths)?;
    let store = open_store(paths)?;
    let folder = parse_folder(&args.folder)?;
    let additional_mounts = args
        .mounts
        .into_iter()
        .map(|host_path| (host_path, true))
        .chain(args.rw_mounts.into_iter().map(|host_path| (host_path, false)))
        .map(|(host_path, read_only)| MountRequest {
            host_path,
            container_path: None,
            read_only,
        })
        .collect();

    let group = RegisteredGroup {
        chat_target: args.chat_target,
        name: args.name,
        folder,
        trigger: args.trigger.unwrap_or_else(|| settings.trigger_token()),
        requires_trigger: !args.no_trigger,
        additional_mounts,
        added_at: now_ms(),
    };
    store.register_group(&group)?;
    ensure_group_dirs(paths, &group.folder)?;

    let privileged = settings.privileged_group()?;
    Ok(format!(
        "group registered\nchat_target={}\nfolder={}\ntrigger={}\nrequires_trigger={}\nprivileged={}",
        group.chat_target,
        group.folder,
        group.trigger,
        group.requires_trigger,
        group.folder == privileged
    ))
}

fn list(paths: &StatePaths) -> Result<String, AppError> {
    let store = open_store(paths)?;
    Ok(store
        .list_groups()?
        .into_iter()
        .map(|group| {
            format!(
                "{}\t{}\t{}\ttrigger={}\trequires_trigger={}\tmounts={}\tadded_at={}",
                group.folder,
                group.chat_target,
                group.name,
                group.trigger,
                group.requires_trigger,
                group.additional_mounts.len(),
                render_time(Some(group.added_at))
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}
