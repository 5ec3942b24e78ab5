use clap::{CommandFactory, Parser};
use registry_sync::cli::{Cli, Runner};
use registry_sync::logging::init_tracing;
use registry_sync::SyncError;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::parse().from_env() {
        Ok(cli) => cli,
        Err(e) => return failure(e),
    };
    init_tracing(cli.verbose, cli.quiet);

    match Runner::new(cli).run().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => failure(e),
    }
}

fn failure(error: SyncError) -> ExitCode {
    match error {
        SyncError::Usage(message) => {
            eprintln!("Error: {}\n", message);
            if let Some(sync) = Cli::command().find_subcommand_mut("sync") {
                let _ = sync.print_help();
            }
            ExitCode::from(2)
        }
        e => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
