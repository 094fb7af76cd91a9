pub mod cli;
pub mod command_handlers;
pub mod command_support;
pub mod error;

pub use cli::Cli;
pub use command_handlers::run_cli;
pub use error::AppError;
