use crate::app::cli::SendArgs;
use crate::app::command_support::ensure_runtime_root;
use crate::app::AppError;
use crate::queue::{enqueue_incoming, IncomingMessage};
use crate::runtime::StatePaths;
use crate::shared::time::now_ms;

pub fn cmd_send(paths: &StatePaths, args: &SendArgs) -> Result<String, AppError> {
    if args.chat_target.trim().is_empty() {
        return Err(AppError::Invalid("chat target must be non-empty".to_string()));
    }
    ensure_runtime_root(paths)?;
    let timestamp = now_ms();
    let message = IncomingMessage {
        message_id: format!("cli-{timestamp}-{}", std::process::id()),
        chat_target: args.chat_target.clone(),
        sender_name: args.sender.clone(),
        text: args.text.clone(),
        timestamp,
    };
    let path = enqueue_incoming(&paths.queue(), &message)?;
    Ok(format!(
        "message queued\nmessage_id={}\npath={}",
        message.message_id,
        path.display()
    ))
}
