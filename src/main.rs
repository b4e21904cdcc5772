use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cloud_job_runner::cli::{self, Cli};
use cloud_job_runner::errors::{DeployError, EXIT_FAILURE};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise warnings only, or debug with --verbose
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match cli::dispatch(&cli).await {
        Ok(code) => code,
        Err(e) => match e.downcast_ref::<DeployError>() {
            Some(DeployError::Cancelled) => {
                println!("Cancelled.");
                DeployError::Cancelled.exit_code()
            }
            Some(err) => {
                eprintln!("Error: {}", err);
                err.exit_code()
            }
            None => {
                eprintln!("Error: {:#}", e);
                EXIT_FAILURE
            }
        },
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
