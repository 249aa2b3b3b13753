//! holoscan CLI

use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use holoscan_cli::cmd;
use holoscan_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // --log-level wins over RUST_LOG
    let filter = match cli.log_level {
        Some(level) => EnvFilter::new(level.directive()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Package(args) => cmd::package::package(&args).await,
        Commands::Run(args) => cmd::run::run(&args),
        Commands::Version => cmd::version::version(),
        Commands::Nics => cmd::nics::nics(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            if let Some(detail) = e.detail() {
                debug!("{detail:#}");
            }
            ExitCode::from(e.exit_code())
        }
    }
}
