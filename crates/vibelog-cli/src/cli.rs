//! Command-line argument parsing with clap.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::client::DEFAULT_COLLECTOR_URL;

/// vibelog - capture terminal sessions for AI assistants.
///
/// Without a subcommand, runs the trailing command under a captured
/// terminal: `vibelog -n web -- npm run dev`.
#[derive(Parser, Debug, Clone)]
#[command(name = "vibelog")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Collector URL.
    #[arg(long, global = true, env = "VIBELOG_URL", default_value = DEFAULT_COLLECTOR_URL)]
    pub url: String,

    /// Log directory of the collector.
    #[arg(long, global = true, env = "VIBELOG_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Capture arguments when no subcommand is given.
    #[command(flatten)]
    pub capture: CaptureArgs,
}

impl Cli {
    /// The subcommand to run, treating a bare command line as `run`.
    #[must_use]
    pub fn into_command(self) -> Commands {
        self.command.unwrap_or(Commands::Run(self.capture))
    }
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a command and capture its terminal session.
    Run(CaptureArgs),

    /// Run the collector in the foreground.
    Serve(ServeArgs),

    /// Bridge MCP JSON-RPC between stdio and the collector.
    McpStdio,
}

/// Arguments for a capture session.
#[derive(Args, Debug, Clone, Default)]
pub struct CaptureArgs {
    /// Stream name (defaults to the program name).
    #[arg(short, long)]
    pub name: Option<String>,

    /// Do not record typed input.
    #[arg(long)]
    pub no_stdin: bool,

    /// Command and arguments to run.
    #[arg(id = "argv", trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

/// Arguments for `serve`.
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "VIBELOG_BIND", default_value = "127.0.0.1:51234")]
    pub bind: SocketAddr,

    /// Days to keep inactive streams.
    #[arg(long, default_value_t = 4)]
    pub retention_days: u64,
}
