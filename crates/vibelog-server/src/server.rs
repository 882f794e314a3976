//! Collector server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};
use vibelog_logs::PurgeReport;

use crate::config::CollectorConfig;
use crate::error::{ServerError, ServerResult};
use crate::routes::create_router;
use crate::state::CollectorState;

/// The local log collector.
///
/// Serves ingest, health and the MCP protocol, and runs the retention sweep
/// for as long as it is serving.
#[derive(Debug, Clone)]
pub struct CollectorServer {
    state: Arc<CollectorState>,
}

impl CollectorServer {
    /// Create a collector, opening the log store from `config.log_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the log directory cannot be opened.
    pub fn new(config: CollectorConfig) -> ServerResult<Self> {
        Ok(Self {
            state: Arc::new(CollectorState::new(config)?),
        })
    }

    /// Create a collector around existing state.
    #[must_use]
    pub const fn from_state(state: Arc<CollectorState>) -> Self {
        Self { state }
    }

    /// Get the collector state for external access.
    #[must_use]
    pub fn state(&self) -> Arc<CollectorState> {
        self.state.clone()
    }

    /// Create the router without starting the server.
    pub fn router(&self) -> axum::Router {
        create_router(self.state.clone())
    }

    /// Bind the configured address.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(&self) -> ServerResult<TcpListener> {
        let addr = self.state.config().bind_addr;
        TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(addr, e))
    }

    /// Bind the configured address and serve until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails or the server stops unexpectedly.
    pub async fn serve_with_shutdown<F>(&self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind().await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` completes.
    ///
    /// The retention sweep runs once immediately and then on the configured
    /// interval until the server stops.
    ///
    /// # Errors
    ///
    /// Returns an error if the server stops unexpectedly.
    pub async fn serve_on<F>(&self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: Option<SocketAddr> = listener.local_addr().ok();
        info!(
            addr = ?addr,
            log_dir = %self.state.config().log_dir.display(),
            "Collector listening"
        );

        let purge_task = spawn_purge_task(self.state.clone());
        let router = create_router(self.state.clone());

        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()));

        purge_task.abort();
        info!("Collector shut down");
        result
    }
}

/// Runs one retention sweep and announces removals to listeners.
pub async fn run_purge(state: Arc<CollectorState>) -> PurgeReport {
    let sweep_state = state.clone();
    let report = match tokio::task::spawn_blocking(move || sweep_state.purger().purge()).await {
        Ok(report) => report,
        Err(e) => {
            warn!(error = %e, "Retention sweep task failed");
            return PurgeReport::default();
        }
    };

    if !report.is_empty() {
        state.broadcaster().notify_list_changed();
    }
    report
}

/// Spawns the retention scheduler: one sweep now, then one per interval.
pub fn spawn_purge_task(state: Arc<CollectorState>) -> JoinHandle<()> {
    let period = state.config().purge_interval.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            // First tick completes immediately.
            ticker.tick().await;
            let _ = run_purge(state.clone()).await;
        }
    })
}
