//! Append-only stream storage with an in-memory index.
//!
//! This module provides:
//! - [`LogStore`] - One NDJSON file per stream plus an index of stream metadata
//! - [`StreamInfo`] - Index entry for a stream
//! - [`StreamSummary`] - Index entry augmented with derived activity age
//! - [`AppendOutcome`] - Whether an append created or updated a stream
//!
//! The index is seeded from file metadata at startup and kept current by
//! appends. All index reads and file mutations go through one mutex, so an
//! append and a purge never interleave on the same stream.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{LogError, Result};
use crate::paths;
use crate::record::{is_sanitized, stream_uri};

/// Index entry for a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    /// Sanitized stream name.
    pub name: String,
    /// When the stream was created.
    pub started: DateTime<Utc>,
    /// Last time the stream received data.
    pub last_activity: DateTime<Utc>,
    /// Number of record lines; approximate for streams loaded at startup.
    pub line_count: u64,
    /// Size of the backing file in bytes.
    pub size_bytes: u64,
}

impl StreamInfo {
    /// External URI of this stream.
    #[must_use]
    pub fn uri(&self) -> String {
        stream_uri(&self.name)
    }
}

/// An index entry with its activity age computed at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    /// The index entry.
    #[serde(flatten)]
    pub info: StreamInfo,
    /// Whole seconds since the last activity.
    pub secs_since_activity: u64,
}

/// Result of appending to a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The stream did not exist before this append.
    Created {
        /// Lines written.
        lines: usize,
    },
    /// The stream already existed.
    Updated {
        /// Lines written.
        lines: usize,
    },
    /// Nothing to write.
    Unchanged,
}

impl AppendOutcome {
    /// Number of lines written.
    #[must_use]
    pub const fn lines(&self) -> usize {
        match self {
            Self::Created { lines } | Self::Updated { lines } => *lines,
            Self::Unchanged => 0,
        }
    }
}

/// File-backed stream store.
pub struct LogStore {
    dir: PathBuf,
    index: Mutex<HashMap<String, StreamInfo>>,
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("dir", &self.dir)
            .field("streams", &self.index.lock().len())
            .finish()
    }
}

impl LogStore {
    /// Opens the store, creating the directory and seeding the index from
    /// the metadata of existing stream files.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or listed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut index = HashMap::new();
        for (name, path) in stream_files(&dir)? {
            match fs::metadata(&path) {
                Ok(meta) => {
                    let modified = meta.modified().map(to_utc).unwrap_or_else(|_| Utc::now());
                    let started = meta.created().map(to_utc).unwrap_or(modified);
                    index.insert(
                        name.clone(),
                        StreamInfo {
                            name,
                            started,
                            last_activity: modified,
                            line_count: 0,
                            size_bytes: meta.len(),
                        },
                    );
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable stream file"),
            }
        }

        info!(dir = %dir.display(), streams = index.len(), "Log store opened");

        Ok(Self {
            dir,
            index: Mutex::new(index),
        })
    }

    /// Returns the storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the backing file path for a stream.
    #[must_use]
    pub fn path_for(&self, name: &str) -> PathBuf {
        paths::stream_path(&self.dir, name)
    }

    /// Appends a single serialized record line.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not sanitized or the write fails.
    pub fn append(&self, name: &str, line: &str) -> Result<AppendOutcome> {
        self.append_batch(name, std::iter::once(line))
    }

    /// Appends every non-blank line, newline-terminated, in one write.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not sanitized or the write fails.
    /// A failed write is not retried.
    pub fn append_batch<I, S>(&self, name: &str, lines: I) -> Result<AppendOutcome>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !is_sanitized(name) {
            return Err(LogError::InvalidName(name.to_string()));
        }

        let mut buf = String::new();
        let mut count = 0usize;
        for line in lines {
            let line = line.as_ref().trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() {
                continue;
            }
            buf.push_str(line);
            buf.push('\n');
            count += 1;
        }
        if count == 0 {
            return Ok(AppendOutcome::Unchanged);
        }

        let path = self.path_for(name);
        let mut index = self.index.lock();

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(buf.as_bytes())?;
        writer.flush()?;
        let size_bytes = writer.get_ref().metadata()?.len();

        let now = Utc::now();
        let outcome = match index.get_mut(name) {
            Some(info) => {
                info.last_activity = now;
                info.size_bytes = size_bytes;
                info.line_count += count as u64;
                AppendOutcome::Updated { lines: count }
            }
            None => {
                index.insert(
                    name.to_string(),
                    StreamInfo {
                        name: name.to_string(),
                        started: now,
                        last_activity: now,
                        line_count: count as u64,
                        size_bytes,
                    },
                );
                AppendOutcome::Created { lines: count }
            }
        };
        drop(index);

        debug!(stream = %name, lines = count, bytes = size_bytes, "Appended records");
        Ok(outcome)
    }

    /// Snapshot of the index, sorted by name, with activity age derived now.
    #[must_use]
    pub fn list_streams(&self) -> Vec<StreamSummary> {
        let now = Utc::now();
        let mut streams: Vec<StreamSummary> = self
            .index
            .lock()
            .values()
            .map(|info| StreamSummary {
                secs_since_activity: (now - info.last_activity).num_seconds().max(0) as u64,
                info: info.clone(),
            })
            .collect();
        streams.sort_by(|a, b| a.info.name.cmp(&b.info.name));
        streams
    }

    /// Returns the index entry for a stream.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<StreamInfo> {
        self.index.lock().get(name).cloned()
    }

    /// Returns true if the stream is indexed.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.lock().contains_key(name)
    }

    /// Returns the number of indexed streams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    /// Returns true if no streams are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.lock().is_empty()
    }

    /// Deletes a stream's file and index entry.
    ///
    /// Returns `false` if the stream was not indexed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut index = self.index.lock();
        if index.remove(name).is_none() {
            return Ok(false);
        }
        match fs::remove_file(self.path_for(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        drop(index);
        info!(stream = %name, "Removed stream");
        Ok(true)
    }

    /// Replaces the line count with one observed by reading the whole file.
    pub fn correct_line_count(&self, name: &str, line_count: u64) {
        if let Some(info) = self.index.lock().get_mut(name) {
            info.line_count = line_count;
        }
    }

    /// Runs `f` with exclusive access to the index.
    pub(crate) fn with_index<R>(&self, f: impl FnOnce(&mut HashMap<String, StreamInfo>) -> R) -> R {
        let mut index = self.index.lock();
        f(&mut index)
    }
}

/// Lists `(name, path)` for every stream file in `dir`.
pub(crate) fn stream_files(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut files: Vec<(String, PathBuf)> = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter_map(|p| paths::stream_name(&p).map(|name| (name, p)))
        .collect();
    files.sort();
    Ok(files)
}

fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_temp_store() -> (LogStore, TempDir) {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = LogStore::open(temp_dir.path()).expect("open store");
        (store, temp_dir)
    }

    #[test]
    fn store_creates_directory() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join("nested/logs");
        let store = LogStore::open(&path);
        assert!(store.is_ok());
        assert!(path.exists());
    }

    #[test]
    fn append_writes_line_and_creates_entry() {
        let (store, dir) = make_temp_store();

        let outcome = store.append("test", "hello").expect("append");
        assert_eq!(outcome, AppendOutcome::Created { lines: 1 });

        let content = fs::read_to_string(dir.path().join("test.ndjson")).expect("read");
        assert_eq!(content, "hello\n");

        let info = store.get("test").expect("indexed");
        assert_eq!(info.line_count, 1);
        assert_eq!(info.size_bytes, 6);
        assert_eq!(info.uri(), "log://test");
    }

    #[test]
    fn second_append_reports_update() {
        let (store, _dir) = make_temp_store();

        let _ = store.append("test", "one").expect("append");
        let outcome = store.append_batch("test", ["two", "", "three\n"]).expect("append");
        assert_eq!(outcome, AppendOutcome::Updated { lines: 2 });

        let info = store.get("test").expect("indexed");
        assert_eq!(info.line_count, 3);
        assert_eq!(info.size_bytes, "one\ntwo\nthree\n".len() as u64);
    }

    #[test]
    fn blank_batch_is_unchanged() {
        let (store, dir) = make_temp_store();

        let outcome = store.append_batch("empty", ["", "   "]).expect("append");
        assert_eq!(outcome, AppendOutcome::Unchanged);
        assert!(!store.contains("empty"));
        assert!(!dir.path().join("empty.ndjson").exists());
    }

    #[test]
    fn append_rejects_unsanitized_names() {
        let (store, _dir) = make_temp_store();

        let result = store.append("../escape", "x");
        assert!(matches!(result, Err(LogError::InvalidName(_))));
        let result = store.append("Upper", "x");
        assert!(matches!(result, Err(LogError::InvalidName(_))));
    }

    #[test]
    fn open_seeds_index_from_existing_files() {
        let temp_dir = TempDir::new().expect("create temp dir");
        fs::write(temp_dir.path().join("old.ndjson"), "a\nb\n").expect("write");
        fs::write(temp_dir.path().join("server.lock"), "123").expect("write");

        let store = LogStore::open(temp_dir.path()).expect("open store");
        assert_eq!(store.len(), 1);

        let info = store.get("old").expect("indexed");
        assert_eq!(info.line_count, 0);
        assert_eq!(info.size_bytes, 4);
    }

    #[test]
    fn list_streams_is_sorted_and_derives_age() {
        let (store, _dir) = make_temp_store();

        let _ = store.append("zeta", "1").expect("append");
        let _ = store.append("alpha", "1").expect("append");

        let streams = store.list_streams();
        let names: Vec<&str> = streams.iter().map(|s| s.info.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert!(streams.iter().all(|s| s.secs_since_activity < 5));
    }

    #[test]
    fn remove_deletes_file_and_entry() {
        let (store, dir) = make_temp_store();

        let _ = store.append("gone", "1").expect("append");
        assert!(store.remove("gone").expect("remove"));
        assert!(!store.contains("gone"));
        assert!(!dir.path().join("gone.ndjson").exists());
        assert!(!store.remove("gone").expect("remove again"));
    }

    #[test]
    fn correct_line_count_updates_entry() {
        let (store, _dir) = make_temp_store();

        let _ = store.append("demo", "1").expect("append");
        store.correct_line_count("demo", 42);
        assert_eq!(store.get("demo").map(|i| i.line_count), Some(42));

        store.correct_line_count("missing", 1);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn concurrent_appends_keep_every_line() {
        let (store, dir) = make_temp_store();
        let store = std::sync::Arc::new(store);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let _ = store.append("shared", &format!("{t}-{i}")).expect("append");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }

        let content = fs::read_to_string(dir.path().join("shared.ndjson")).expect("read");
        assert_eq!(content.lines().count(), 200);
        assert_eq!(store.get("shared").map(|i| i.line_count), Some(200));
    }
}
