//! Foreground collector command.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;
use vibelog_logs::paths::log_directory;
use vibelog_server::{CollectorConfig, CollectorServer};

use crate::cli::ServeArgs;
use crate::error::CliError;
use crate::signal;

/// Serve command executor.
#[derive(Debug, Clone)]
pub struct ServeCommand {
    log_dir: PathBuf,
}

impl ServeCommand {
    /// Create a serve command. `log_dir` defaults to the standard location.
    #[must_use]
    pub fn new(log_dir: Option<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.unwrap_or_else(log_directory),
        }
    }

    /// Collector configuration for `args`.
    #[must_use]
    pub fn config(&self, args: &ServeArgs) -> CollectorConfig {
        CollectorConfig::new(&self.log_dir)
            .with_bind_addr(args.bind)
            .with_retention(Duration::from_secs(args.retention_days.saturating_mul(24 * 3600)))
    }

    /// Run the collector until SIGINT or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the log directory cannot be opened or the address
    /// cannot be bound.
    pub async fn execute(&self, args: &ServeArgs) -> Result<(), CliError> {
        let server = CollectorServer::new(self.config(args))?;
        info!(bind = %args.bind, log_dir = %self.log_dir.display(), "Starting collector");
        server
            .serve_with_shutdown(async {
                let _ = signal::termination().await;
            })
            .await?;
        Ok(())
    }
}
