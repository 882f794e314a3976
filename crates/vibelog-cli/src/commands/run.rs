//! Capture session command.
//!
//! Makes sure a collector is running (electing this process to start one if
//! needed), then runs the command under a captured pty and ships its session.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;
use vibelog_logs::paths::{lock_path, log_directory};

use crate::capture::{CaptureAgent, CaptureConfig, default_stream_name};
use crate::cli::CaptureArgs;
use crate::client::CollectorClient;
use crate::error::{CaptureError, CliError};
use crate::leader::{DetachedLauncher, LeaderSupervisor, SupervisorConfig};
use crate::shipper::{BatchShipper, ShipperConfig};

/// Run command executor.
#[derive(Debug, Clone)]
pub struct RunCommand {
    collector_url: String,
    log_dir: PathBuf,
    shipper_config: ShipperConfig,
}

impl RunCommand {
    /// Create a run command. `log_dir` defaults to the standard location.
    #[must_use]
    pub fn new(collector_url: impl Into<String>, log_dir: Option<PathBuf>) -> Self {
        Self {
            collector_url: collector_url.into(),
            log_dir: log_dir.unwrap_or_else(log_directory),
            shipper_config: ShipperConfig::default(),
        }
    }

    /// Set the shipper configuration.
    #[must_use]
    pub fn with_shipper_config(mut self, config: ShipperConfig) -> Self {
        self.shipper_config = config;
        self
    }

    /// Execute the capture session and return the child's exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if no command was given, the collector URL is
    /// invalid, or the session could not be started.
    pub async fn execute(&self, args: &CaptureArgs) -> Result<i32, CliError> {
        if args.command.is_empty() {
            return Err(CaptureError::EmptyCommand.into());
        }
        let name = args
            .name
            .clone()
            .or_else(|| default_stream_name(&args.command))
            .ok_or(CaptureError::EmptyCommand)?;

        let supervisor_config =
            SupervisorConfig::new(lock_path(&self.log_dir)).with_collector_url(&self.collector_url);
        let client = Arc::new(
            CollectorClient::new(&self.collector_url)?
                .with_probe_timeout(supervisor_config.probe_timeout),
        );
        let supervisor = Arc::new(LeaderSupervisor::new(
            supervisor_config,
            client.clone(),
            Arc::new(self.launcher()?),
        ));

        let state = supervisor.ensure_leadership().await;
        debug!(state = ?state, stream = %name, "Leadership settled");
        let watchdog = supervisor.spawn_watchdog();

        let shipper = Arc::new(
            BatchShipper::new(&name, self.shipper_config.clone(), client)
                .with_failure_hook(supervisor.clone()),
        );
        let config = CaptureConfig::new(args.command.clone()).with_capture_stdin(!args.no_stdin);
        let result = CaptureAgent::new(config, shipper).run().await;

        watchdog.abort();
        supervisor.release();
        result.map_err(CliError::from)
    }

    fn launcher(&self) -> Result<DetachedLauncher, CliError> {
        let mut launcher = DetachedLauncher::current_exe()?
            .with_arg("--log-dir")
            .with_arg(self.log_dir.clone());
        if let Some(addr) = bind_addr_from_url(&self.collector_url) {
            launcher = launcher.with_arg("--bind").with_arg(addr.to_string());
        }
        Ok(launcher)
    }
}

/// The socket address a locally launched collector should bind for `url`.
#[must_use]
pub fn bind_addr_from_url(url: &str) -> Option<SocketAddr> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))?;
    let authority = rest.split('/').next()?;
    let authority = authority.replace("localhost", "127.0.0.1");
    authority.parse().ok()
}
