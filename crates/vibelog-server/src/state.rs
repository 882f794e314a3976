//! Shared state for the collector server.

use std::sync::Arc;
use std::time::Instant;

use vibelog_logs::{
    AppendOutcome, LogStore, QueryEngine, RetentionPolicy, RetentionPurger, sanitize_name,
    stream_uri,
};

use crate::config::CollectorConfig;
use crate::error::ServerResult;
use crate::notifications::Broadcaster;

/// State shared by every handler and timer.
#[derive(Debug)]
pub struct CollectorState {
    /// Collector configuration.
    config: Arc<CollectorConfig>,
    /// Stream storage.
    store: Arc<LogStore>,
    /// Reads over the store.
    query: QueryEngine,
    /// Retention sweeper.
    purger: RetentionPurger,
    /// Live notification registry.
    broadcaster: Arc<Broadcaster>,
    /// Server start time.
    start_time: Instant,
}

impl CollectorState {
    /// Opens the log store under `config.log_dir` and builds the state.
    ///
    /// # Errors
    ///
    /// Returns an error if the log directory cannot be created or listed.
    pub fn new(config: CollectorConfig) -> ServerResult<Self> {
        let store = Arc::new(LogStore::open(&config.log_dir)?);
        Ok(Self::with_store(config, store))
    }

    /// Builds the state around an already opened store.
    #[must_use]
    pub fn with_store(config: CollectorConfig, store: Arc<LogStore>) -> Self {
        let purger = RetentionPurger::new(store.clone(), RetentionPolicy::new(config.retention));
        let broadcaster = Arc::new(Broadcaster::new(config.notification_capacity));
        Self {
            config: Arc::new(config),
            query: QueryEngine::new(store.clone()),
            store,
            purger,
            broadcaster,
            start_time: Instant::now(),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Get the log store.
    #[must_use]
    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    /// Get the query engine.
    #[must_use]
    pub const fn query(&self) -> &QueryEngine {
        &self.query
    }

    /// Get the retention purger.
    #[must_use]
    pub const fn purger(&self) -> &RetentionPurger {
        &self.purger
    }

    /// Get the notification broadcaster.
    #[must_use]
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Get server uptime in seconds.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Appends an NDJSON body to a stream and publishes the matching
    /// notification.
    ///
    /// The name is sanitized first. Blank lines are ignored; a body without
    /// content writes nothing and notifies nobody.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub fn ingest(&self, raw_name: &str, body: &str) -> ServerResult<AppendOutcome> {
        let name = sanitize_name(raw_name);
        let outcome = self.store.append_batch(&name, body.lines())?;
        match outcome {
            AppendOutcome::Created { .. } => {
                self.broadcaster.notify_list_changed();
            }
            AppendOutcome::Updated { .. } => {
                self.broadcaster.notify_updated(&stream_uri(&name));
            }
            AppendOutcome::Unchanged => {}
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{LIST_CHANGED, RESOURCE_UPDATED};
    use tempfile::TempDir;

    fn make_test_state() -> (Arc<CollectorState>, TempDir) {
        let dir = TempDir::new().unwrap();
        let state = CollectorState::new(CollectorConfig::new(dir.path())).unwrap();
        (Arc::new(state), dir)
    }

    #[test]
    fn test_state_creation() {
        let (state, _dir) = make_test_state();

        assert!(state.store().is_empty());
        assert_eq!(state.broadcaster().subscriber_count(), 0);
        assert!(state.uptime_secs() < 2);
    }

    #[tokio::test]
    async fn test_ingest_notifies_create_then_update() {
        let (state, _dir) = make_test_state();
        let mut sub = state.broadcaster().subscribe();

        let outcome = state.ingest("My App!", "{\"ts\":1,\"message\":\"a\"}\n").unwrap();
        assert_eq!(outcome, AppendOutcome::Created { lines: 1 });
        assert_eq!(sub.recv().await.unwrap().method(), LIST_CHANGED);

        let outcome = state.ingest("my_app_", "{\"ts\":2,\"message\":\"b\"}\n").unwrap();
        assert_eq!(outcome, AppendOutcome::Updated { lines: 1 });
        let note = sub.recv().await.unwrap();
        assert_eq!(note.method(), RESOURCE_UPDATED);
        assert_eq!(note.params()["uri"], "log://my_app_");
    }

    #[test]
    fn test_empty_ingest_is_silent() {
        let (state, _dir) = make_test_state();
        let _sub = state.broadcaster().subscribe();

        let outcome = state.ingest("demo", "\n\n").unwrap();
        assert_eq!(outcome, AppendOutcome::Unchanged);
        assert!(!state.store().contains("demo"));
    }

    #[test]
    fn test_ingest_of_unsanitizable_name_fails() {
        let (state, _dir) = make_test_state();
        assert!(state.ingest("", "{\"ts\":1,\"message\":\"a\"}").is_err());
    }
}
