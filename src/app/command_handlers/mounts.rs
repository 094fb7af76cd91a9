use crate::app::cli::{MountCheckArgs, MountsCommand};
use crate::app::command_support::{load_settings, open_store, parse_folder};
use crate::app::AppError;
use crate::group::GroupIdentity;
use crate::mounts::{MountPolicy, MountRequest};
use crate::runtime::{signal_reload_mounts, StatePaths};

pub fn cmd_mounts(paths: &StatePaths, command: MountsCommand) -> Result<String, AppError> {
    match command {
        MountsCommand::Check(args) => check(paths, args),
        MountsCommand::Reload => {
            signal_reload_mounts(paths)?;
            Ok("mount allow-list reload requested".to_string())
        }
    }
}

/// A denial is a normal answer here, not a command failure.
fn check(paths: &StatePaths, args: MountCheckArgs) -> Result<String, AppError> {
    let settings = load_settings(paths)?;
    let store = open_store(paths)?;
    let folder = parse_folder(&args.group)?;
    if store.group_by_folder(&folder)?.is_none() {
        return Err(AppError::Invalid(format!("group `{folder}` is not registered")));
    }
    let identity = GroupIdentity {
        is_privileged: folder == settings.privileged_group()?,
        folder,
    };
    let policy = MountPolicy::load(&settings.mount_allowlist_path()?)?;
    let request = MountRequest {
        host_path: args.host_path,
        container_path: args.container_path,
        read_only: !args.rw,
    };

    Ok(match policy.resolve(&identity, &request) {
        Ok(mount) => format!(
            "allowed=true\nhost_path={}\ncontainer_path={}/{}\nread_only={}",
            mount.host_path.display(),
            crate::mounts::EXTRA_MOUNT_ROOT,
            mount.container_path,
            mount.read_only
        ),
        Err(denied) => format!("allowed=false\nreason={denied}"),
    })
}
