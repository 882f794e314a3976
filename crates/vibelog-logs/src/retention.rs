//! Time-based retention for stream files.

use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::store::{LogStore, stream_files};

/// Default maximum age of a stream before it is purged.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(4 * 24 * 60 * 60);

/// How long streams are kept after their last write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Maximum age measured from file modification time.
    pub max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_RETENTION,
        }
    }
}

impl RetentionPolicy {
    /// Creates a policy with the given maximum age.
    #[must_use]
    pub const fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    /// Returns true if a file last modified at `modified` is past the window.
    #[must_use]
    pub fn is_expired(&self, modified: SystemTime, now: SystemTime) -> bool {
        now.duration_since(modified)
            .is_ok_and(|age| age > self.max_age)
    }
}

/// Outcome of a single purge sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Names of the streams removed, in file name order.
    pub removed: Vec<String>,
    /// Files that could not be inspected or removed.
    pub failed: usize,
}

impl PurgeReport {
    /// Returns true if nothing was removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }
}

/// Deletes stream files older than the retention window.
#[derive(Debug, Clone)]
pub struct RetentionPurger {
    store: Arc<LogStore>,
    policy: RetentionPolicy,
}

impl RetentionPurger {
    /// Creates a purger over `store`.
    #[must_use]
    pub const fn new(store: Arc<LogStore>, policy: RetentionPolicy) -> Self {
        Self { store, policy }
    }

    /// Returns the active policy.
    #[must_use]
    pub const fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Runs one sweep.
    ///
    /// Files are checked and removed while holding the store lock, so a
    /// concurrent append either lands before the check or recreates the
    /// stream afterwards. Per-file errors are logged and counted.
    pub fn purge(&self) -> PurgeReport {
        self.purge_at(SystemTime::now())
    }

    fn purge_at(&self, now: SystemTime) -> PurgeReport {
        let mut report = PurgeReport::default();

        let files = match stream_files(self.store.dir()) {
            Ok(files) => files,
            Err(e) => {
                warn!(dir = %self.store.dir().display(), error = %e, "Failed to list log directory");
                report.failed += 1;
                return report;
            }
        };

        self.store.with_index(|index| {
            for (name, path) in files {
                let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                    Ok(modified) => modified,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to stat stream file");
                        report.failed += 1;
                        continue;
                    }
                };

                if !self.policy.is_expired(modified, now) {
                    continue;
                }

                match fs::remove_file(&path) {
                    Ok(()) => {
                        index.remove(&name);
                        debug!(stream = %name, "Purged stale stream");
                        report.removed.push(name);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to delete stale stream");
                        report.failed += 1;
                    }
                }
            }
        });

        if !report.is_empty() {
            info!(removed = report.removed.len(), "Retention sweep removed streams");
        }
        report
    }
}
