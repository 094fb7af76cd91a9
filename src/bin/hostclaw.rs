use hostclaw::app::{run_cli, Cli};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    match run_cli(cli) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{output}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
