use crate::app::cli::{CreateTaskArgs, TasksCommand};
use crate::app::command_support::{load_settings, open_store, parse_folder, render_time};
use crate::app::AppError;
use crate::runtime::StatePaths;
use crate::shared::time::now_ms;
use crate::tasks::{NewTask, Task, TaskStatus};

pub fn cmd_tasks(paths: &StatePaths, command: TasksCommand) -> Result<String, AppError> {
    match command {
        TasksCommand::Create(args) => create(paths, args),
        TasksCommand::List { group } => list(paths, group.as_deref()),
        TasksCommand::Pause { task_id } => set_status(paths, &task_id, TaskStatus::Paused),
        TasksCommand::Resume { task_id } => set_status(paths, &task_id, TaskStatus::Active),
        TasksCommand::Cancel { task_id } => set_status(paths, &task_id, TaskStatus::Cancelled),
        TasksCommand::Delete { task_id } => delete(paths, &task_id),
        TasksCommand::Runs { task_id, limit } => runs(paths, &task_id, limit),
    }
}

fn create(paths: &StatePaths, args: CreateTaskArgs) -> Result<String, AppError> {
    let settings = load_settings(paths)?;
    let store = open_store(paths)?;
    let folder = parse_folder(&args.group)?;
    let group = store
        .group_by_folder(&folder)?
        .ok_or_else(|| AppError::Invalid(format!("group `{folder}` is not registered")))?;

    let task = store.create_task(
        &NewTask {
            group_folder: group.folder,
            chat_target: group.chat_target,
            prompt: args.prompt,
            schedule_kind: args.schedule_type,
            schedule_value: args.schedule_value,
            context_mode: args.context_mode,
        },
        now_ms(),
        &settings.tz(),
    )?;
    Ok(format!(
        "task created\ntask_id={}\nstatus={}\nnext_run={}",
        task.id,
        task.status.as_str(),
        render_time(task.next_run)
    ))
}

fn list(paths: &StatePaths, group: Option<&str>) -> Result<String, AppError> {
    let store = open_store(paths)?;
    let tasks = match group {
        Some(raw) => store.list_tasks_for_group(&parse_folder(raw)?)?,
        None => store.list_tasks()?,
    };
    Ok(tasks.iter().map(render_task_line).collect::<Vec<_>>().join("\n"))
}

fn render_task_line(task: &Task) -> String {
    format!(
        "{}\t{}\t{}\t{}:{}\tcontext={}\tnext_run={}\tlast_run={}",
        task.id,
        task.group_folder,
        task.status.as_str(),
        task.schedule_kind.as_str(),
        task.schedule_value,
        task.context_mode.as_str(),
        render_time(task.next_run),
        render_time(task.last_run)
    )
}

fn set_status(paths: &StatePaths, task_id: &str, to: TaskStatus) -> Result<String, AppError> {
    let settings = load_settings(paths)?;
    let store = open_store(paths)?;
    let task = store.set_task_status(task_id, to, now_ms(), &settings.tz())?;
    Ok(format!(
        "task updated\ntask_id={}\nstatus={}\nnext_run={}",
        task.id,
        task.status.as_str(),
        render_time(task.next_run)
    ))
}

fn delete(paths: &StatePaths, task_id: &str) -> Result<String, AppError> {
    let store = open_store(paths)?;
    if !store.delete_task(task_id)? {
        return Err(AppError::UnknownTask(task_id.to_string()));
    }
    Ok(format!("task deleted\ntask_id={task_id}"))
}

fn runs(paths: &StatePaths, task_id: &str, limit: usize) -> Result<String, AppError> {
    let store = open_store(paths)?;
    if store.get_task(task_id)?.is_none() {
        return Err(AppError::UnknownTask(task_id.to_string()));
    }
    Ok(store
        .list_run_logs(task_id, limit)?
        .into_iter()
        .map(|log| {
            format!(
                "{}\t{}\tduration_ms={}\t{}",
                render_time(Some(log.started_at)),
                log.status.as_str(),
                log.duration_ms,
                log.result_summary.unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}
