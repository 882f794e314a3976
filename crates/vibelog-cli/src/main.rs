//! vibelog CLI binary entrypoint.

use std::io;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use vibelog_cli::cli::{Cli, Commands};
use vibelog_cli::commands::{McpStdioCommand, RunCommand, ServeCommand};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let url = cli.url.clone();
    let log_dir = cli.log_dir.clone();
    let command = cli.into_command();

    // Capture sessions share the terminal with the child, so stay quiet there.
    let default_filter = match command {
        Commands::Serve(_) => "vibelog=info",
        Commands::Run(_) | Commands::McpStdio => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(io::stderr)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(command, url, log_dir));
    // Detached reader threads must not keep the process alive.
    runtime.shutdown_background();

    match result {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    command: Commands,
    url: String,
    log_dir: Option<std::path::PathBuf>,
) -> anyhow::Result<i32> {
    match command {
        Commands::Run(args) => RunCommand::new(url, log_dir)
            .execute(&args)
            .await
            .context("capture session failed"),
        Commands::Serve(args) => {
            ServeCommand::new(log_dir)
                .execute(&args)
                .await
                .context("collector failed")?;
            Ok(0)
        }
        Commands::McpStdio => {
            McpStdioCommand::new(url)
                .execute()
                .await
                .context("mcp bridge failed")?;
            Ok(0)
        }
    }
}
